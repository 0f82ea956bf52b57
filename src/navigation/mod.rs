//! # Navigation
//!
//! The navigator turns one incoming update (command, callback token or free
//! text) plus the user's current [`NavState`] into an [`Outcome`]: the replies
//! to send and the next state. It knows nothing about the Telegram transport,
//! which keeps every flow testable against [`crate::db::MemoryStore`].
//!
//! Every update passes the same gates in order: administrator routing, ban
//! check, rate limit, rules agreement. Failures never escape [`Navigator::handle`];
//! they become the generic error reply and leave the state untouched.

use anyhow::Result;
use chrono::{FixedOffset, Utc};
use serde_json::json;
use std::sync::Arc;
use teloxide::utils::html::escape;
use tracing::{debug, error, info, warn};

use crate::bot::ui_builder::{
    author_help_keyboard, back_to_grades_keyboard, back_to_menu_keyboard, grade_keyboard, main_menu_keyboard,
    rules_keyboard, search_results_keyboard, subject_keyboard, textbook_detail_keyboard,
    textbook_keyboard,
};
use crate::callback::{BackTarget, CallbackAction, MenuItem};
use crate::catalog::{Grade, Subject, Textbook};
use crate::commands::Command;
use crate::db::{Ban, LogKind, Store, User, UserProfile};
use crate::dialogue::NavState;
use crate::format::{format_datetime, format_file_size, paginate, start_of_day};
use crate::localization::{t_args_lang, t_lang};
use crate::rate_limiter::RateLimiter;
use crate::storage::TextbookStorage;

pub mod admin;
pub mod reply;

pub use admin::{parse_ban_args, BanArgs, BanArgsError};
pub use reply::{BroadcastJob, Delivery, Outcome, Reply, Screen, Transition};

/// Textbooks per list page
pub const TEXTBOOKS_PER_PAGE: usize = 10;
/// Maximum results returned by `/find`
pub const SEARCH_LIMIT: i64 = 20;

/// The user behind an update
#[derive(Debug, Clone, Default)]
pub struct Actor {
    pub profile: UserProfile,
    /// Telegram client language, e.g. `ru` or `en-US`
    pub language_code: Option<String>,
}

impl Actor {
    pub fn id(&self) -> i64 {
        self.profile.id
    }

    pub fn lang(&self) -> Option<&str> {
        self.language_code.as_deref()
    }
}

/// One inbound update
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Command(Command),
    /// Raw callback data from an inline button
    Callback(String),
    Text(String),
}

/// Conversation controller shared by all handlers
pub struct Navigator<S> {
    store: S,
    storage: TextbookStorage,
    limiter: Arc<RateLimiter>,
    admin_id: i64,
    stats_offset: FixedOffset,
}

impl<S: Store> Navigator<S> {
    pub fn new(
        store: S,
        storage: TextbookStorage,
        limiter: Arc<RateLimiter>,
        admin_id: i64,
        stats_offset: FixedOffset,
    ) -> Self {
        Self {
            store,
            storage,
            limiter,
            admin_id,
            stats_offset,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn storage(&self) -> &TextbookStorage {
        &self.storage
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        user_id == self.admin_id
    }

    /// Process one update. Never fails: errors become the generic error reply.
    pub async fn handle(&self, actor: &Actor, state: &NavState, event: Event) -> Outcome {
        match self.route(actor, state, &event).await {
            Ok(outcome) => {
                debug!(user_id = actor.id(), transition = ?outcome.transition, "Update handled");
                outcome
            }
            Err(e) => {
                error!(user_id = actor.id(), event = ?event, error = %e, "Failed to handle update");
                Outcome::stay(vec![Reply::Alert(t_lang("error-general", actor.lang()))])
            }
        }
    }

    async fn route(&self, actor: &Actor, state: &NavState, event: &Event) -> Result<Outcome> {
        let user_id = actor.id();
        let lang = actor.lang();

        if let Event::Command(command) = event {
            if command.is_admin() {
                return self.admin_command(actor, command).await;
            }
        }

        if self.is_admin(user_id) && *state == NavState::AwaitingBroadcast {
            match event {
                Event::Text(text) => return self.start_broadcast(actor, text).await,
                Event::Command(Command::Cancel) => {
                    info!(user_id, "Broadcast cancelled");
                    return Ok(Outcome::reset(vec![Reply::Message(t_lang(
                        "broadcast-cancelled",
                        lang,
                    ))]));
                }
                _ => {}
            }
        }

        if let Some(ban) = self.store.active_ban(user_id, Utc::now()).await? {
            info!(user_id, reason = %ban.reason, "Blocked update from banned user");
            return Ok(Outcome::stay(vec![Reply::Alert(self.ban_notice(&ban, lang))]));
        }

        if self.limiter.is_limited(user_id) {
            return Ok(Outcome::stay(vec![Reply::Alert(t_lang(
                "error-rate-limit",
                lang,
            ))]));
        }

        if let Event::Command(Command::Start) = event {
            return self.start(actor).await;
        }

        let user = match self.store.get_user(user_id).await? {
            Some(user) => {
                self.store.touch_user(&actor.profile).await?;
                user
            }
            None => self.register(actor).await?,
        };

        let action = match event {
            Event::Callback(data) => Some(data.parse::<CallbackAction>()),
            _ => None,
        };

        if let Some(Ok(CallbackAction::AgreeRules)) = action {
            return self.agree_rules(actor, &user).await;
        }

        if !user.agreed_to_rules {
            debug!(user_id, "Rules not accepted yet, prompting again");
            return Ok(Outcome::enter(
                NavState::AwaitingRulesAgreement,
                vec![Reply::Screen(rules_screen(lang))],
            ));
        }

        match (event, action) {
            (Event::Callback(data), Some(Err(e))) => {
                warn!(user_id, data = %data, error = %e, "Malformed callback data");
                self.render_state(state, lang).await
            }
            (Event::Callback(_), Some(Ok(action))) => self.callback(actor, state, action).await,
            (Event::Command(command), _) => self.command(actor, command).await,
            (Event::Text(_), _) => Ok(Outcome::stay(vec![Reply::Message(t_lang(
                "use-menu",
                lang,
            ))])),
            (Event::Callback(_), None) => self.render_state(state, lang).await,
        }
    }

    async fn register(&self, actor: &Actor) -> Result<User> {
        let (user, created) = self.store.get_or_create_user(&actor.profile).await?;
        if created {
            self.audit(
                LogKind::UserAction,
                Some(user.id),
                "user_registered",
                json!({ "username": user.username, "first_name": user.first_name }),
            )
            .await;
        }
        Ok(user)
    }

    async fn start(&self, actor: &Actor) -> Result<Outcome> {
        let lang = actor.lang();
        let user = self.register(actor).await?;
        self.audit(LogKind::UserAction, Some(user.id), "start_command", json!({}))
            .await;

        if !user.agreed_to_rules {
            return Ok(Outcome::enter(
                NavState::AwaitingRulesAgreement,
                vec![Reply::Screen(rules_screen(lang))],
            ));
        }

        let text = t_args_lang(
            "welcome-back",
            &[("name", &escape(&user.display_name()))],
            lang,
        );
        Ok(Outcome::reset(vec![Reply::Screen(Screen {
            text,
            keyboard: main_menu_keyboard(lang),
        })]))
    }

    async fn agree_rules(&self, actor: &Actor, user: &User) -> Result<Outcome> {
        let lang = actor.lang();
        if !user.agreed_to_rules {
            self.store.agree_to_rules(user.id).await?;
            self.audit(LogKind::UserAction, Some(user.id), "rules_accepted", json!({}))
                .await;
            info!(user_id = user.id, "User accepted the rules");
        }

        Ok(Outcome::reset(vec![
            Reply::Toast(t_lang("rules-accepted", lang)),
            Reply::Screen(main_menu_screen(lang)),
        ]))
    }

    async fn command(&self, actor: &Actor, command: &Command) -> Result<Outcome> {
        let lang = actor.lang();
        match command {
            Command::Help => Ok(Outcome::stay(vec![Reply::Screen(help_screen(lang))])),
            Command::About => Ok(Outcome::stay(vec![Reply::Screen(self.about_screen(lang).await?)])),
            Command::Search | Command::Textbooks => Ok(Outcome::enter(
                NavState::SelectingGrade,
                vec![Reply::Screen(grades_screen(lang))],
            )),
            Command::Find(query) => self.find(actor, query).await,
            Command::Cancel => Ok(Outcome::reset(vec![Reply::Screen(main_menu_screen(lang))])),
            // Start and administrator commands are routed before this point
            _ => Ok(Outcome::reset(vec![Reply::Screen(main_menu_screen(lang))])),
        }
    }

    async fn find(&self, actor: &Actor, query: &str) -> Result<Outcome> {
        let lang = actor.lang();
        let query = query.trim();
        if query.is_empty() {
            return Ok(Outcome::stay(vec![Reply::Message(t_lang("find-usage", lang))]));
        }

        let results = self.store.search_textbooks(query, SEARCH_LIMIT).await?;
        info!(user_id = actor.id(), query, found = results.len(), "Textbook search");

        let text = if results.is_empty() {
            t_args_lang("search-empty", &[("query", &escape(query))], lang)
        } else {
            t_args_lang(
                "search-results",
                &[("query", &escape(query)), ("count", &results.len().to_string())],
                lang,
            )
        };
        Ok(Outcome::stay(vec![Reply::Screen(Screen {
            text,
            keyboard: search_results_keyboard(&results, lang),
        })]))
    }

    async fn callback(
        &self,
        actor: &Actor,
        state: &NavState,
        action: CallbackAction,
    ) -> Result<Outcome> {
        let lang = actor.lang();
        debug!(user_id = actor.id(), action = %action, "Callback action");

        match action {
            CallbackAction::Noop => Ok(Outcome::stay(vec![])),
            CallbackAction::AuthorHelp => Ok(Outcome::stay(vec![Reply::Screen(author_help_screen(lang))])),
            // Accepted rules are handled by the gate in `route`
            CallbackAction::AgreeRules => Ok(Outcome::reset(vec![Reply::Screen(main_menu_screen(lang))])),
            CallbackAction::Menu(MenuItem::Textbooks) => Ok(Outcome::enter(
                NavState::SelectingGrade,
                vec![Reply::Screen(grades_screen(lang))],
            )),
            CallbackAction::Menu(MenuItem::Help) => Ok(Outcome::enter(
                NavState::MainMenu,
                vec![Reply::Screen(help_screen(lang))],
            )),
            CallbackAction::Menu(MenuItem::About) => Ok(Outcome::enter(
                NavState::MainMenu,
                vec![Reply::Screen(self.about_screen(lang).await?)],
            )),
            CallbackAction::Grade(grade) => self.show_subjects(grade, lang).await,
            CallbackAction::Subject { grade, subject } => {
                self.show_textbooks(grade, subject, 0, lang).await
            }
            CallbackAction::Page {
                grade,
                subject,
                page,
            } => self.show_textbooks(grade, subject, page, lang).await,
            CallbackAction::Textbook(textbook_id) => {
                self.show_textbook(state, textbook_id, lang).await
            }
            CallbackAction::Download(textbook_id) => self.download(actor, textbook_id).await,
            CallbackAction::Back(target) => self.back(state, target, lang).await,
        }
    }

    async fn show_subjects(&self, grade: Grade, lang: Option<&str>) -> Result<Outcome> {
        let screen = self.subjects_screen(grade, lang).await?;
        Ok(Outcome::enter(
            NavState::SelectingSubject { grade },
            vec![Reply::Screen(screen)],
        ))
    }

    async fn show_textbooks(
        &self,
        grade: Grade,
        subject: Subject,
        page: usize,
        lang: Option<&str>,
    ) -> Result<Outcome> {
        let (screen, page) = self.textbooks_screen(grade, subject, page, lang).await?;
        Ok(Outcome::enter(
            NavState::ViewingTextbookList {
                grade,
                subject,
                page,
            },
            vec![Reply::Screen(screen)],
        ))
    }

    async fn show_textbook(
        &self,
        state: &NavState,
        textbook_id: i64,
        lang: Option<&str>,
    ) -> Result<Outcome> {
        match self.store.get_textbook(textbook_id).await? {
            Some(textbook) => Ok(Outcome::enter(
                NavState::ViewingTextbookDetail {
                    grade: textbook.grade,
                    subject: textbook.subject,
                    textbook_id,
                },
                vec![Reply::Screen(detail_screen(&textbook, lang))],
            )),
            None => {
                warn!(textbook_id, "Requested textbook no longer exists");
                let mut outcome = self.back(state, BackTarget::Textbooks, lang).await?;
                outcome
                    .replies
                    .insert(0, Reply::Alert(t_lang("error-textbook-not-found", lang)));
                Ok(outcome)
            }
        }
    }

    async fn download(&self, actor: &Actor, textbook_id: i64) -> Result<Outcome> {
        let lang = actor.lang();
        let not_found = || Outcome::stay(vec![Reply::Alert(t_lang("error-file-not-found", lang))]);

        let Some(textbook) = self.store.get_textbook(textbook_id).await? else {
            warn!(user_id = actor.id(), textbook_id, "Download requested for unknown textbook");
            return Ok(not_found());
        };

        if !self.storage.exists(&textbook.file_path).await {
            warn!(
                user_id = actor.id(),
                textbook_id,
                path = %self.storage.resolve(&textbook.file_path).display(),
                "Textbook file is missing"
            );
            return Ok(not_found());
        }

        let caption = t_args_lang(
            "download-caption",
            &[
                ("title", &escape(&textbook.title)),
                ("author", &escape(&textbook.author)),
            ],
            lang,
        );
        let delivery = Delivery {
            user_id: actor.id(),
            textbook_id,
            title: textbook.title.clone(),
            path: self.storage.resolve(&textbook.file_path),
            file_name: textbook.file_name.clone(),
            caption,
        };

        Ok(Outcome::stay(vec![
            Reply::Toast(t_lang("download-started", lang)),
            Reply::Document(delivery),
        ]))
    }

    /// Record a delivered textbook: both counters and one audit entry, each best-effort
    pub async fn complete_download(&self, delivery: &Delivery) {
        if let Err(e) = self.store.increment_download(delivery.textbook_id).await {
            warn!(textbook_id = delivery.textbook_id, error = %e, "Failed to count textbook download");
        }
        if let Err(e) = self.store.increment_user_download(delivery.user_id).await {
            warn!(user_id = delivery.user_id, error = %e, "Failed to count user download");
        }
        self.audit(
            LogKind::UserAction,
            Some(delivery.user_id),
            "textbook_downloaded",
            json!({ "textbook_id": delivery.textbook_id, "title": delivery.title }),
        )
        .await;

        info!(
            user_id = delivery.user_id,
            textbook_id = delivery.textbook_id,
            "Textbook downloaded"
        );
    }

    /// Parent menu for `target`, rebuilt from the selections stored in `state`
    async fn back(&self, state: &NavState, target: BackTarget, lang: Option<&str>) -> Result<Outcome> {
        match (target, state.grade(), state.subject()) {
            (BackTarget::Menu, _, _) => Ok(Outcome::reset(vec![Reply::Screen(main_menu_screen(lang))])),
            (BackTarget::Subjects, Some(grade), _) => self.show_subjects(grade, lang).await,
            (BackTarget::Textbooks, Some(grade), Some(subject)) => {
                let page = match state {
                    NavState::ViewingTextbookDetail { textbook_id, .. } => {
                        self.page_of(grade, subject, *textbook_id).await?
                    }
                    _ => state.page(),
                };
                self.show_textbooks(grade, subject, page, lang).await
            }
            (BackTarget::Textbooks, Some(grade), None) => self.show_subjects(grade, lang).await,
            _ => Ok(Outcome::enter(
                NavState::SelectingGrade,
                vec![Reply::Screen(grades_screen(lang))],
            )),
        }
    }

    /// List page holding `textbook_id`, or the first page
    async fn page_of(&self, grade: Grade, subject: Subject, textbook_id: i64) -> Result<usize> {
        let textbooks = self.store.get_textbooks(grade, subject).await?;
        Ok(textbooks
            .iter()
            .position(|t| t.id == textbook_id)
            .map_or(0, |index| index / TEXTBOOKS_PER_PAGE))
    }

    /// Redraw the menu for the current state
    async fn render_state(&self, state: &NavState, lang: Option<&str>) -> Result<Outcome> {
        let screen = match state {
            NavState::SelectingGrade => grades_screen(lang),
            NavState::SelectingSubject { grade } => self.subjects_screen(*grade, lang).await?,
            NavState::ViewingTextbookList {
                grade,
                subject,
                page,
            } => self.textbooks_screen(*grade, *subject, *page, lang).await?.0,
            NavState::ViewingTextbookDetail {
                grade,
                subject,
                textbook_id,
            } => match self.store.get_textbook(*textbook_id).await? {
                Some(textbook) => detail_screen(&textbook, lang),
                None => self.textbooks_screen(*grade, *subject, 0, lang).await?.0,
            },
            _ => main_menu_screen(lang),
        };
        Ok(Outcome::stay(vec![Reply::Screen(screen)]))
    }

    async fn subjects_screen(&self, grade: Grade, lang: Option<&str>) -> Result<Screen> {
        let subjects = self.store.subjects_for_grade(grade).await?;
        let grade_label = grade.label(lang);

        if subjects.is_empty() {
            return Ok(Screen {
                text: t_args_lang("no-subjects", &[("grade", &grade_label)], lang),
                keyboard: back_to_grades_keyboard(lang),
            });
        }

        Ok(Screen {
            text: t_args_lang("select-subject", &[("grade", &grade_label)], lang),
            keyboard: subject_keyboard(&subjects, grade, lang),
        })
    }

    /// Screen for one list page, with the page number clamped into range
    async fn textbooks_screen(
        &self,
        grade: Grade,
        subject: Subject,
        page: usize,
        lang: Option<&str>,
    ) -> Result<(Screen, usize)> {
        let textbooks = self.store.get_textbooks(grade, subject).await?;
        let (page, total_pages, start, end) = paginate(textbooks.len(), page, TEXTBOOKS_PER_PAGE);
        let grade_label = grade.label(lang);
        let subject_label = subject.label(lang);

        let text = if textbooks.is_empty() {
            t_args_lang(
                "no-textbooks",
                &[("grade", &grade_label), ("subject", &subject_label)],
                lang,
            )
        } else {
            t_args_lang(
                "textbook-list",
                &[
                    ("grade", &grade_label),
                    ("subject", &subject_label),
                    ("count", &textbooks.len().to_string()),
                    ("page", &(page + 1).to_string()),
                    ("pages", &total_pages.to_string()),
                ],
                lang,
            )
        };

        let keyboard = textbook_keyboard(
            &textbooks[start..end],
            grade,
            subject,
            page,
            total_pages,
            lang,
        );
        Ok((Screen { text, keyboard }, page))
    }

    async fn about_screen(&self, lang: Option<&str>) -> Result<Screen> {
        let stats = self
            .store
            .stats(start_of_day(Utc::now(), self.stats_offset))
            .await?;
        Ok(Screen {
            text: t_args_lang(
                "about-text",
                &[
                    ("users", &stats.total_users.to_string()),
                    ("textbooks", &stats.total_textbooks.to_string()),
                    ("downloads", &stats.total_downloads.to_string()),
                ],
                lang,
            ),
            keyboard: back_to_menu_keyboard(lang),
        })
    }

    fn ban_notice(&self, ban: &Ban, lang: Option<&str>) -> String {
        let until = match ban.banned_until {
            Some(until) => format_datetime(until, self.stats_offset),
            None => t_lang("ban-forever", lang),
        };
        t_args_lang(
            "banned-message",
            &[("reason", &ban.reason), ("until", &until)],
            lang,
        )
    }

    /// Append an audit entry; failures are logged and otherwise ignored
    async fn audit(&self, kind: LogKind, user_id: Option<i64>, action: &str, details: serde_json::Value) {
        if let Err(e) = self.store.log_event(kind, user_id, action, details).await {
            warn!(user_id = ?user_id, action, error = %e, "Failed to write audit log entry");
        }
    }
}

fn main_menu_screen(lang: Option<&str>) -> Screen {
    Screen {
        text: t_lang("main-menu", lang),
        keyboard: main_menu_keyboard(lang),
    }
}

fn rules_screen(lang: Option<&str>) -> Screen {
    Screen {
        text: t_lang("rules-text", lang),
        keyboard: rules_keyboard(lang),
    }
}

fn help_screen(lang: Option<&str>) -> Screen {
    Screen {
        text: t_lang("help-text", lang),
        keyboard: back_to_menu_keyboard(lang),
    }
}

fn author_help_screen(lang: Option<&str>) -> Screen {
    Screen {
        text: t_lang("author-help-text", lang),
        keyboard: author_help_keyboard(lang),
    }
}

fn grades_screen(lang: Option<&str>) -> Screen {
    Screen {
        text: t_lang("select-grade", lang),
        keyboard: grade_keyboard(lang),
    }
}

fn detail_screen(textbook: &Textbook, lang: Option<&str>) -> Screen {
    let text = t_args_lang(
        "textbook-detail",
        &[
            ("title", &escape(&textbook.title)),
            ("author", &escape(&textbook.author)),
            ("grade", &textbook.grade.label(lang)),
            ("subject", &textbook.subject.label(lang)),
            ("size", &format_file_size(textbook.file_size, lang)),
            ("downloads", &textbook.downloads.to_string()),
        ],
        lang,
    );
    Screen {
        text,
        keyboard: textbook_detail_keyboard(textbook.id, lang),
    }
}
