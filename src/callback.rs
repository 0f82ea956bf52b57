//! # Callback Module
//!
//! Inline keyboard buttons carry short underscore-joined tokens such as
//! `subject_5_mathematics`. Keyboards are built from [`CallbackAction`] values
//! and incoming data is decoded back with [`str::parse`]; anything that does
//! not match a known shape is a [`CallbackError`].

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::catalog::{Grade, Subject};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallbackError {
    #[error("empty callback data")]
    Empty,
    #[error("unknown callback action: {0}")]
    UnknownAction(String),
    #[error("malformed payload for {action}: {payload}")]
    MalformedPayload {
        action: &'static str,
        payload: String,
    },
}

/// Entries of the main menu
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuItem {
    Textbooks,
    Help,
    About,
}

impl MenuItem {
    fn code(self) -> &'static str {
        match self {
            MenuItem::Textbooks => "textbooks",
            MenuItem::Help => "help",
            MenuItem::About => "about",
        }
    }
}

/// Parent screens reachable through a "back" button
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackTarget {
    Menu,
    Classes,
    Subjects,
    Textbooks,
}

impl BackTarget {
    fn code(self) -> &'static str {
        match self {
            BackTarget::Menu => "menu",
            BackTarget::Classes => "classes",
            BackTarget::Subjects => "subjects",
            BackTarget::Textbooks => "textbooks",
        }
    }
}

/// Action carried by an inline keyboard button
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    AgreeRules,
    Menu(MenuItem),
    Grade(Grade),
    Subject {
        grade: Grade,
        subject: Subject,
    },
    Page {
        grade: Grade,
        subject: Subject,
        page: usize,
    },
    Textbook(i64),
    Download(i64),
    Back(BackTarget),
    /// Where to find a textbook's author
    AuthorHelp,
    /// Inert button such as a page indicator
    Noop,
}

impl CallbackAction {
    /// Token stored in the button's callback data
    pub fn token(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CallbackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackAction::AgreeRules => f.write_str("agree_rules"),
            CallbackAction::Menu(item) => write!(f, "menu_{}", item.code()),
            CallbackAction::Grade(grade) => write!(f, "class_{}", grade),
            CallbackAction::Subject { grade, subject } => {
                write!(f, "subject_{}_{}", grade, subject.code())
            }
            CallbackAction::Page {
                grade,
                subject,
                page,
            } => write!(f, "page_{}_{}_{}", grade, page, subject.code()),
            CallbackAction::Textbook(id) => write!(f, "textbook_{}", id),
            CallbackAction::Download(id) => write!(f, "download_{}", id),
            CallbackAction::Back(target) => write!(f, "back_{}", target.code()),
            CallbackAction::AuthorHelp => f.write_str("help_author"),
            CallbackAction::Noop => f.write_str("noop"),
        }
    }
}

impl FromStr for CallbackAction {
    type Err = CallbackError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let data = data.trim();
        if data.is_empty() {
            return Err(CallbackError::Empty);
        }

        match data {
            "agree_rules" => return Ok(CallbackAction::AgreeRules),
            "noop" => return Ok(CallbackAction::Noop),
            "help_author" => return Ok(CallbackAction::AuthorHelp),
            _ => {}
        }

        let (action, payload) = data
            .split_once('_')
            .ok_or_else(|| CallbackError::UnknownAction(data.to_string()))?;

        let malformed = |action: &'static str| CallbackError::MalformedPayload {
            action,
            payload: payload.to_string(),
        };

        match action {
            "menu" => match payload {
                "textbooks" => Ok(CallbackAction::Menu(MenuItem::Textbooks)),
                "help" => Ok(CallbackAction::Menu(MenuItem::Help)),
                "about" => Ok(CallbackAction::Menu(MenuItem::About)),
                _ => Err(malformed("menu")),
            },
            "class" => payload
                .parse::<Grade>()
                .map(CallbackAction::Grade)
                .map_err(|_| malformed("class")),
            "subject" => {
                let (grade, subject) = payload.split_once('_').ok_or_else(|| malformed("subject"))?;
                Ok(CallbackAction::Subject {
                    grade: grade.parse().map_err(|_| malformed("subject"))?,
                    subject: subject.parse().map_err(|_| malformed("subject"))?,
                })
            }
            "page" => {
                let mut parts = payload.splitn(3, '_');
                let (Some(grade), Some(page), Some(subject)) =
                    (parts.next(), parts.next(), parts.next())
                else {
                    return Err(malformed("page"));
                };
                Ok(CallbackAction::Page {
                    grade: grade.parse().map_err(|_| malformed("page"))?,
                    page: page.parse().map_err(|_| malformed("page"))?,
                    subject: subject.parse().map_err(|_| malformed("page"))?,
                })
            }
            "textbook" => parse_id(payload)
                .map(CallbackAction::Textbook)
                .ok_or_else(|| malformed("textbook")),
            "download" => parse_id(payload)
                .map(CallbackAction::Download)
                .ok_or_else(|| malformed("download")),
            "back" => match payload {
                "menu" => Ok(CallbackAction::Back(BackTarget::Menu)),
                "classes" => Ok(CallbackAction::Back(BackTarget::Classes)),
                "subjects" => Ok(CallbackAction::Back(BackTarget::Subjects)),
                "textbooks" => Ok(CallbackAction::Back(BackTarget::Textbooks)),
                _ => Err(malformed("back")),
            },
            _ => Err(CallbackError::UnknownAction(action.to_string())),
        }
    }
}

fn parse_id(raw: &str) -> Option<i64> {
    raw.parse::<i64>().ok().filter(|id| *id > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grade(n: u8) -> Grade {
        Grade::try_from(n).unwrap()
    }

    #[test]
    fn test_encodes_expected_tokens() {
        assert_eq!(CallbackAction::Grade(grade(5)).token(), "class_5");
        assert_eq!(
            CallbackAction::Subject {
                grade: grade(10),
                subject: Subject::SocialStudies
            }
            .token(),
            "subject_10_social_studies"
        );
        assert_eq!(
            CallbackAction::Page {
                grade: grade(7),
                subject: Subject::PhysicalEducation,
                page: 2
            }
            .token(),
            "page_7_2_physical_education"
        );
        assert_eq!(CallbackAction::Back(BackTarget::Subjects).token(), "back_subjects");
        assert_eq!(CallbackAction::AuthorHelp.token(), "help_author");
    }

    #[test]
    fn test_decodes_subject_codes_with_underscores() {
        let action: CallbackAction = "subject_9_life_safety".parse().unwrap();
        assert_eq!(
            action,
            CallbackAction::Subject {
                grade: grade(9),
                subject: Subject::LifeSafety
            }
        );
    }

    #[test]
    fn test_every_button_token_decodes_to_itself() {
        let mut actions = vec![
            CallbackAction::AgreeRules,
            CallbackAction::AuthorHelp,
            CallbackAction::Noop,
            CallbackAction::Menu(MenuItem::Help),
            CallbackAction::Textbook(17),
            CallbackAction::Download(17),
            CallbackAction::Back(BackTarget::Menu),
        ];
        for subject in Subject::ALL {
            actions.push(CallbackAction::Page {
                grade: grade(11),
                subject,
                page: 3,
            });
        }
        for action in actions {
            assert_eq!(action.token().parse::<CallbackAction>(), Ok(action));
        }
    }

    #[test]
    fn test_rejects_malformed_tokens() {
        assert_eq!("".parse::<CallbackAction>(), Err(CallbackError::Empty));
        assert!(matches!(
            "explode".parse::<CallbackAction>(),
            Err(CallbackError::UnknownAction(_))
        ));
        assert!(matches!(
            "class_12".parse::<CallbackAction>(),
            Err(CallbackError::MalformedPayload { action: "class", .. })
        ));
        assert!(matches!(
            "subject_5".parse::<CallbackAction>(),
            Err(CallbackError::MalformedPayload { action: "subject", .. })
        ));
        assert!(matches!(
            "subject_5_alchemy".parse::<CallbackAction>(),
            Err(CallbackError::MalformedPayload { .. })
        ));
        assert!(matches!(
            "download_abc".parse::<CallbackAction>(),
            Err(CallbackError::MalformedPayload { action: "download", .. })
        ));
        assert!("download_-3".parse::<CallbackAction>().is_err());
        assert!("back_nowhere".parse::<CallbackAction>().is_err());
        assert!(matches!(
            "help_nobody".parse::<CallbackAction>(),
            Err(CallbackError::UnknownAction(_))
        ));
    }
}
