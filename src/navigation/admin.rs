//! Administrator commands: statistics, user and log listings, bans and broadcasts.
//!
//! Authorization is a single configured Telegram id; there is no role table.

use anyhow::Result;
use chrono::Utc;
use serde_json::json;
use teloxide::utils::html::escape;
use thiserror::Error;
use tracing::{info, warn};

use super::reply::{BroadcastJob, Outcome, Reply};
use super::{Actor, Navigator};
use crate::commands::Command;
use crate::db::{LogKind, Store};
use crate::dialogue::NavState;
use crate::format::{format_datetime, start_of_day, truncate_text};
use crate::localization::{t_args_lang, t_lang};

/// Rows shown by `/users` and `/logs`
pub const ADMIN_LIST_LIMIT: i64 = 10;
/// Longest action detail shown per `/logs` line
const LOG_DETAILS_MAX_CHARS: usize = 60;
/// Longest temporary ban accepted by `/ban`, about a hundred years
pub const MAX_BAN_DAYS: u32 = 36_500;

/// Parsed `/ban <id> <reason...> [days]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanArgs {
    pub user_id: i64,
    pub reason: String,
    /// `None` for a permanent ban
    pub days: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BanArgsError {
    #[error("missing user id")]
    MissingUserId,
    #[error("invalid user id: {0}")]
    InvalidUserId(String),
    #[error("missing ban reason")]
    MissingReason,
    #[error("ban duration of {0} days exceeds {MAX_BAN_DAYS}")]
    DurationTooLong(u32),
}

/// Parse ban arguments. A trailing number is the duration in days only when a
/// reason precedes it.
pub fn parse_ban_args(args: &str) -> Result<BanArgs, BanArgsError> {
    let tokens: Vec<&str> = args.split_whitespace().collect();
    let Some((first, rest)) = tokens.split_first() else {
        return Err(BanArgsError::MissingUserId);
    };

    let user_id = first
        .parse::<i64>()
        .map_err(|_| BanArgsError::InvalidUserId(first.to_string()))?;

    let (reason_tokens, days) = match rest.split_last() {
        Some((last, init)) if !init.is_empty() && last.chars().all(|c| c.is_ascii_digit()) => {
            match last.parse::<u32>() {
                Ok(days) => (init, Some(days)),
                Err(_) => (rest, None),
            }
        }
        _ => (rest, None),
    };

    if reason_tokens.is_empty() {
        return Err(BanArgsError::MissingReason);
    }
    if let Some(days) = days.filter(|d| *d > MAX_BAN_DAYS) {
        return Err(BanArgsError::DurationTooLong(days));
    }

    Ok(BanArgs {
        user_id,
        reason: reason_tokens.join(" "),
        days: days.filter(|d| *d > 0),
    })
}

impl<S: Store> Navigator<S> {
    pub(super) async fn admin_command(&self, actor: &Actor, command: &Command) -> Result<Outcome> {
        let lang = actor.lang();
        if !self.is_admin(actor.id()) {
            info!(user_id = actor.id(), command = command.name(), "Denied administrator command");
            return Ok(Outcome::stay(vec![Reply::Message(t_lang(
                "admin-access-denied",
                lang,
            ))]));
        }

        info!(admin_id = actor.id(), command = command.name(), "Administrator command");
        match command {
            Command::Stats => self.admin_stats(lang).await,
            Command::Users => self.admin_users(lang).await,
            Command::Logs => self.admin_logs(lang).await,
            Command::Broadcast(text) if text.trim().is_empty() => Ok(Outcome::enter(
                NavState::AwaitingBroadcast,
                vec![Reply::Message(t_lang("broadcast-prompt", lang))],
            )),
            Command::Broadcast(text) => self.start_broadcast(actor, text).await,
            Command::Ban(args) => self.admin_ban(actor, args).await,
            Command::Unban(args) => self.admin_unban(actor, args).await,
            _ => Ok(Outcome::stay(vec![])),
        }
    }

    async fn admin_stats(&self, lang: Option<&str>) -> Result<Outcome> {
        let stats = self
            .store
            .stats(start_of_day(Utc::now(), self.stats_offset))
            .await?;

        let text = t_args_lang(
            "admin-stats",
            &[
                ("users", &stats.total_users.to_string()),
                ("active", &stats.active_today.to_string()),
                ("textbooks", &stats.total_textbooks.to_string()),
                ("downloads", &stats.total_downloads.to_string()),
                ("requests", &stats.requests_today.to_string()),
                ("banned", &stats.banned_users.to_string()),
            ],
            lang,
        );
        Ok(Outcome::stay(vec![Reply::Message(text)]))
    }

    async fn admin_users(&self, lang: Option<&str>) -> Result<Outcome> {
        let stats = self
            .store
            .stats(start_of_day(Utc::now(), self.stats_offset))
            .await?;
        let users = self.store.recent_users(ADMIN_LIST_LIMIT).await?;

        let mut text = t_args_lang(
            "admin-users-header",
            &[
                ("total", &stats.total_users.to_string()),
                ("active", &stats.active_today.to_string()),
            ],
            lang,
        );
        text.push_str("\n\n");

        if users.is_empty() {
            text.push_str(&t_lang("admin-users-empty", lang));
        }
        for user in &users {
            let line = t_args_lang(
                "admin-users-line",
                &[
                    ("name", &escape(&user.display_name())),
                    ("id", &user.id.to_string()),
                    ("downloads", &user.downloads.to_string()),
                    ("seen", &format_datetime(user.last_activity, self.stats_offset)),
                ],
                lang,
            );
            text.push_str(&line);
            text.push('\n');
        }

        Ok(Outcome::stay(vec![Reply::Message(text)]))
    }

    async fn admin_logs(&self, lang: Option<&str>) -> Result<Outcome> {
        let entries = self.store.recent_logs(ADMIN_LIST_LIMIT).await?;

        let mut text = t_lang("admin-logs-header", lang);
        text.push_str("\n\n");

        if entries.is_empty() {
            text.push_str(&t_lang("admin-logs-empty", lang));
        }
        for entry in &entries {
            let user = entry
                .user_id
                .map_or_else(|| "-".to_string(), |id| id.to_string());
            let details = truncate_text(&entry.details.to_string(), LOG_DETAILS_MAX_CHARS);
            let line = t_args_lang(
                "admin-logs-line",
                &[
                    ("time", &format_datetime(entry.created_at, self.stats_offset)),
                    ("kind", entry.kind.as_str()),
                    ("action", &escape(&entry.action)),
                    ("user", &user),
                    ("details", &escape(&details)),
                ],
                lang,
            );
            text.push_str(&line);
            text.push('\n');
        }

        Ok(Outcome::stay(vec![Reply::Message(text)]))
    }

    async fn admin_ban(&self, actor: &Actor, args: &str) -> Result<Outcome> {
        let lang = actor.lang();
        let args = match parse_ban_args(args) {
            Ok(args) => args,
            Err(e) => {
                info!(error = %e, "Rejected /ban arguments");
                return Ok(Outcome::stay(vec![Reply::Message(t_lang("admin-ban-usage", lang))]));
            }
        };

        let ban = self
            .store
            .ban_user(args.user_id, &args.reason, args.days, actor.id())
            .await?;
        self.audit(
            LogKind::Ban,
            Some(args.user_id),
            "user_banned",
            json!({ "reason": args.reason, "days": args.days, "admin_id": actor.id() }),
        )
        .await;

        let until = match ban.banned_until {
            Some(until) => format_datetime(until, self.stats_offset),
            None => t_lang("ban-forever", lang),
        };
        let text = t_args_lang(
            "admin-ban-done",
            &[
                ("id", &args.user_id.to_string()),
                ("reason", &escape(&args.reason)),
                ("until", &until),
            ],
            lang,
        );
        Ok(Outcome::stay(vec![Reply::Message(text)]))
    }

    async fn admin_unban(&self, actor: &Actor, args: &str) -> Result<Outcome> {
        let lang = actor.lang();
        let Ok(user_id) = args.trim().parse::<i64>() else {
            return Ok(Outcome::stay(vec![Reply::Message(t_lang("admin-unban-usage", lang))]));
        };

        let removed = self.store.unban_user(user_id).await?;
        let key = if removed {
            self.audit(
                LogKind::AdminAction,
                Some(user_id),
                "user_unbanned",
                json!({ "admin_id": actor.id() }),
            )
            .await;
            "admin-unban-done"
        } else {
            "admin-unban-missing"
        };

        Ok(Outcome::stay(vec![Reply::Message(t_args_lang(
            key,
            &[("id", &user_id.to_string())],
            lang,
        ))]))
    }

    /// Collect recipients and hand the broadcast to the bot layer
    pub(super) async fn start_broadcast(&self, actor: &Actor, text: &str) -> Result<Outcome> {
        let lang = actor.lang();
        let text = text.trim();
        if text.is_empty() {
            return Ok(Outcome::stay(vec![Reply::Message(t_lang("broadcast-empty", lang))]));
        }

        let recipients = self.store.broadcast_recipients().await?;
        if recipients.is_empty() {
            return Ok(Outcome::reset(vec![Reply::Message(t_lang(
                "broadcast-no-recipients",
                lang,
            ))]));
        }

        info!(admin_id = actor.id(), recipients = recipients.len(), "Starting broadcast");
        Ok(Outcome::reset(vec![
            Reply::Message(t_args_lang(
                "broadcast-started",
                &[("count", &recipients.len().to_string())],
                lang,
            )),
            Reply::Broadcast(BroadcastJob {
                admin_id: actor.id(),
                text: text.to_string(),
                recipients,
            }),
        ]))
    }

    /// Persist a finished broadcast and return the summary for the administrator
    pub async fn finish_broadcast(
        &self,
        job: &BroadcastJob,
        sent: i64,
        failed: i64,
        language_code: Option<&str>,
    ) -> String {
        if let Err(e) = self
            .store
            .save_broadcast(&job.text, sent, failed, job.admin_id)
            .await
        {
            warn!(error = %e, "Failed to save broadcast record");
        }
        self.audit(
            LogKind::AdminAction,
            Some(job.admin_id),
            "broadcast_sent",
            json!({ "sent": sent, "failed": failed, "recipients": job.recipients.len() }),
        )
        .await;

        info!(admin_id = job.admin_id, sent, failed, "Broadcast finished");
        t_args_lang(
            "broadcast-done",
            &[("sent", &sent.to_string()), ("failed", &failed.to_string())],
            language_code,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ban_with_days() {
        assert_eq!(
            parse_ban_args("123 spam in chat 7"),
            Ok(BanArgs {
                user_id: 123,
                reason: "spam in chat".to_string(),
                days: Some(7),
            })
        );
    }

    #[test]
    fn test_parse_ban_permanent() {
        let args = parse_ban_args("123 abuse").unwrap();
        assert_eq!(args.reason, "abuse");
        assert_eq!(args.days, None);

        // A lone number after the id is the reason, not the duration
        let args = parse_ban_args("123 42").unwrap();
        assert_eq!(args.reason, "42");
        assert_eq!(args.days, None);

        assert_eq!(parse_ban_args("123 flood 0").unwrap().days, None);
    }

    #[test]
    fn test_parse_ban_errors() {
        assert_eq!(parse_ban_args(""), Err(BanArgsError::MissingUserId));
        assert_eq!(
            parse_ban_args("bob spam"),
            Err(BanArgsError::InvalidUserId("bob".to_string()))
        );
        assert_eq!(parse_ban_args("123"), Err(BanArgsError::MissingReason));
    }

    #[test]
    fn test_parse_ban_rejects_huge_durations() {
        assert_eq!(
            parse_ban_args("5 spam 999999999"),
            Err(BanArgsError::DurationTooLong(999_999_999))
        );
        assert_eq!(parse_ban_args("5 spam 36500").unwrap().days, Some(MAX_BAN_DAYS));

        // Too large for u32: kept as part of the reason, permanent ban
        let args = parse_ban_args("5 spam 99999999999").unwrap();
        assert_eq!(args.reason, "spam 99999999999");
        assert_eq!(args.days, None);
    }
}
