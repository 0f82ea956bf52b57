//! Navigation dialogue module holding each user's menu position.

use serde::{Deserialize, Serialize};
use teloxide::dispatching::dialogue::{Dialogue, InMemStorage};

use crate::catalog::{Grade, Subject};

/// Where the user currently is in the menu tree, plus the selections made on the way
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NavState {
    #[default]
    Start,
    AwaitingRulesAgreement,
    MainMenu,
    SelectingGrade,
    SelectingSubject {
        grade: Grade,
    },
    ViewingTextbookList {
        grade: Grade,
        subject: Subject,
        page: usize,
    },
    ViewingTextbookDetail {
        grade: Grade,
        subject: Subject,
        textbook_id: i64,
    },
    /// Administrator is composing a broadcast message
    AwaitingBroadcast,
}

impl NavState {
    /// Grade selected so far, if any
    pub fn grade(&self) -> Option<Grade> {
        match self {
            NavState::SelectingSubject { grade }
            | NavState::ViewingTextbookList { grade, .. }
            | NavState::ViewingTextbookDetail { grade, .. } => Some(*grade),
            _ => None,
        }
    }

    /// Subject selected so far, if any
    pub fn subject(&self) -> Option<Subject> {
        match self {
            NavState::ViewingTextbookList { subject, .. }
            | NavState::ViewingTextbookDetail { subject, .. } => Some(*subject),
            _ => None,
        }
    }

    /// List page to return to from a detail card
    pub fn page(&self) -> usize {
        match self {
            NavState::ViewingTextbookList { page, .. } => *page,
            _ => 0,
        }
    }
}

/// Type alias for our navigation dialogue
pub type NavDialogue = Dialogue<NavState, InMemStorage<NavState>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selections_carried_by_state() {
        let grade = Grade::try_from(5).unwrap();
        let state = NavState::ViewingTextbookDetail {
            grade,
            subject: Subject::Mathematics,
            textbook_id: 3,
        };
        assert_eq!(state.grade(), Some(grade));
        assert_eq!(state.subject(), Some(Subject::Mathematics));
        assert_eq!(NavState::MainMenu.grade(), None);
        assert_eq!(NavState::SelectingSubject { grade }.subject(), None);
    }
}
