//! UI Builder module for creating keyboards

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use crate::callback::{BackTarget, CallbackAction, MenuItem};
use crate::catalog::{Grade, Subject, Textbook};
use crate::format::truncate_text;
use crate::localization::t_lang;

/// Grades per keyboard row
pub const GRADES_PER_ROW: usize = 3;
/// Subjects per keyboard row
pub const SUBJECTS_PER_ROW: usize = 2;
/// Longest textbook title shown on a button
pub const BUTTON_TITLE_MAX_CHARS: usize = 40;

fn button(text: impl Into<String>, action: CallbackAction) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(text.into(), action.token())
}

fn main_menu_button(language_code: Option<&str>) -> InlineKeyboardButton {
    button(
        t_lang("button-main-menu", language_code),
        CallbackAction::Back(BackTarget::Menu),
    )
}

/// Button label for a textbook, e.g. "📖 Алгебра - Мордкович"
pub fn textbook_button_text(textbook: &Textbook) -> String {
    format!(
        "📖 {} - {}",
        truncate_text(&textbook.title, BUTTON_TITLE_MAX_CHARS),
        textbook.author
    )
}

pub fn main_menu_keyboard(language_code: Option<&str>) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![button(
            t_lang("button-textbooks", language_code),
            CallbackAction::Menu(MenuItem::Textbooks),
        )],
        vec![
            button(
                t_lang("button-help", language_code),
                CallbackAction::Menu(MenuItem::Help),
            ),
            button(
                t_lang("button-about", language_code),
                CallbackAction::Menu(MenuItem::About),
            ),
        ],
    ])
}

pub fn rules_keyboard(language_code: Option<&str>) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![button(
        t_lang("button-agree", language_code),
        CallbackAction::AgreeRules,
    )]])
}

/// Grades 1-11, three per row, followed by the main menu button
pub fn grade_keyboard(language_code: Option<&str>) -> InlineKeyboardMarkup {
    let grades: Vec<Grade> = Grade::all().collect();
    let mut rows: Vec<Vec<InlineKeyboardButton>> = grades
        .chunks(GRADES_PER_ROW)
        .map(|chunk| {
            chunk
                .iter()
                .map(|grade| button(grade.label(language_code), CallbackAction::Grade(*grade)))
                .collect()
        })
        .collect();

    rows.push(vec![main_menu_button(language_code)]);
    InlineKeyboardMarkup::new(rows)
}

pub fn subject_keyboard(
    subjects: &[Subject],
    grade: Grade,
    language_code: Option<&str>,
) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = subjects
        .chunks(SUBJECTS_PER_ROW)
        .map(|chunk| {
            chunk
                .iter()
                .map(|subject| {
                    button(
                        subject.label(language_code),
                        CallbackAction::Subject {
                            grade,
                            subject: *subject,
                        },
                    )
                })
                .collect()
        })
        .collect();

    rows.push(vec![
        button(
            t_lang("button-back-grades", language_code),
            CallbackAction::Back(BackTarget::Classes),
        ),
        main_menu_button(language_code),
    ]);
    InlineKeyboardMarkup::new(rows)
}

/// One page of textbooks. `page` is zero-based.
pub fn textbook_keyboard(
    page_items: &[Textbook],
    grade: Grade,
    subject: Subject,
    page: usize,
    total_pages: usize,
    language_code: Option<&str>,
) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = page_items
        .iter()
        .map(|textbook| {
            vec![button(
                textbook_button_text(textbook),
                CallbackAction::Textbook(textbook.id),
            )]
        })
        .collect();

    if total_pages > 1 {
        let mut pagination = Vec::new();
        if page > 0 {
            pagination.push(button(
                "◀️",
                CallbackAction::Page {
                    grade,
                    subject,
                    page: page - 1,
                },
            ));
        }
        pagination.push(button(
            format!("{}/{}", page + 1, total_pages),
            CallbackAction::Noop,
        ));
        if page + 1 < total_pages {
            pagination.push(button(
                "▶️",
                CallbackAction::Page {
                    grade,
                    subject,
                    page: page + 1,
                },
            ));
        }
        rows.push(pagination);
    }

    if !page_items.is_empty() {
        rows.push(vec![button(
            t_lang("button-author-help", language_code),
            CallbackAction::AuthorHelp,
        )]);
    }

    rows.push(vec![
        button(
            t_lang("button-back-subjects", language_code),
            CallbackAction::Back(BackTarget::Subjects),
        ),
        main_menu_button(language_code),
    ]);
    InlineKeyboardMarkup::new(rows)
}

/// Back to the list the author help was opened from
pub fn author_help_keyboard(language_code: Option<&str>) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        button(
            t_lang("button-back-textbooks", language_code),
            CallbackAction::Back(BackTarget::Textbooks),
        ),
        main_menu_button(language_code),
    ]])
}

pub fn textbook_detail_keyboard(textbook_id: i64, language_code: Option<&str>) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![button(
            t_lang("button-download", language_code),
            CallbackAction::Download(textbook_id),
        )],
        vec![
            button(
                t_lang("button-back-textbooks", language_code),
                CallbackAction::Back(BackTarget::Textbooks),
            ),
            main_menu_button(language_code),
        ],
    ])
}

pub fn search_results_keyboard(items: &[Textbook], language_code: Option<&str>) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = items
        .iter()
        .map(|textbook| {
            vec![button(
                format!("{} ({})", textbook_button_text(textbook), textbook.grade),
                CallbackAction::Textbook(textbook.id),
            )]
        })
        .collect();

    rows.push(vec![main_menu_button(language_code)]);
    InlineKeyboardMarkup::new(rows)
}

pub fn back_to_menu_keyboard(language_code: Option<&str>) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![main_menu_button(language_code)]])
}

/// Single "back to grades" row for a grade without textbooks
pub fn back_to_grades_keyboard(language_code: Option<&str>) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        button(
            t_lang("button-back-grades", language_code),
            CallbackAction::Back(BackTarget::Classes),
        ),
        main_menu_button(language_code),
    ]])
}
