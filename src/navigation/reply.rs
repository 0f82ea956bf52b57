//! What the navigator asks the bot layer to do after an update

use std::path::PathBuf;
use teloxide::types::InlineKeyboardMarkup;

use crate::dialogue::NavState;

/// A menu screen: HTML text plus its inline keyboard
#[derive(Debug, Clone, PartialEq)]
pub struct Screen {
    pub text: String,
    pub keyboard: InlineKeyboardMarkup,
}

/// A textbook file ready to be sent
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub user_id: i64,
    pub textbook_id: i64,
    pub title: String,
    pub path: PathBuf,
    /// Name shown to the user in the chat
    pub file_name: String,
    pub caption: String,
}

/// Broadcast to deliver on behalf of the administrator
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastJob {
    pub admin_id: i64,
    pub text: String,
    pub recipients: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Replaces the menu message for callbacks, sent as a new message for commands
    Screen(Screen),
    /// Popup answer for callbacks, plain message for commands
    Alert(String),
    /// Short notification for callbacks, dropped for commands
    Toast(String),
    /// Always a new message
    Message(String),
    Document(Delivery),
    Broadcast(BroadcastJob),
}

/// How the conversation state changes after an update
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Stay,
    Enter(NavState),
    /// Back to the top; the stored state is cleared
    Reset,
}

impl Transition {
    pub fn next_state(&self, current: &NavState) -> NavState {
        match self {
            Transition::Stay => current.clone(),
            Transition::Enter(state) => state.clone(),
            Transition::Reset => NavState::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub replies: Vec<Reply>,
    pub transition: Transition,
}

impl Outcome {
    pub fn stay(replies: Vec<Reply>) -> Self {
        Self {
            replies,
            transition: Transition::Stay,
        }
    }

    pub fn enter(state: NavState, replies: Vec<Reply>) -> Self {
        Self {
            replies,
            transition: Transition::Enter(state),
        }
    }

    pub fn reset(replies: Vec<Reply>) -> Self {
        Self {
            replies,
            transition: Transition::Reset,
        }
    }

    /// First screen among the replies
    pub fn screen(&self) -> Option<&Screen> {
        self.replies.iter().find_map(|reply| match reply {
            Reply::Screen(screen) => Some(screen),
            _ => None,
        })
    }

    /// First alert text among the replies
    pub fn alert(&self) -> Option<&str> {
        self.replies.iter().find_map(|reply| match reply {
            Reply::Alert(text) => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn delivery(&self) -> Option<&Delivery> {
        self.replies.iter().find_map(|reply| match reply {
            Reply::Document(delivery) => Some(delivery),
            _ => None,
        })
    }
}
