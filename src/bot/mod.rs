//! Bot module for handling Telegram interactions
//!
//! This module is split into several submodules:
//! - `message_handler`: Handles slash commands and plain text messages
//! - `callback_handler`: Handles inline keyboard callback queries
//! - `responder`: Turns navigator replies into Telegram API calls
//! - `broadcast`: Delivers administrator broadcasts with throttling
//! - `ui_builder`: Creates keyboards

use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::dispatching::{HandlerExt, UpdateFilterExt, UpdateHandler};
use teloxide::prelude::*;
use teloxide::types::User as TelegramUser;
use tracing::error;

use crate::commands::Command;
use crate::db::{PgStore, UserProfile};
use crate::dialogue::{NavDialogue, NavState};
use crate::navigation::{Actor, Navigator, Transition};

pub mod broadcast;
pub mod callback_handler;
pub mod message_handler;
pub mod responder;
pub mod ui_builder;

// Re-export main handler functions for use in main.rs
pub use callback_handler::callback_handler;
pub use message_handler::{command_handler, message_handler};

/// Navigator wired to the production store
pub type BotNavigator = Navigator<PgStore>;

/// Update routing: commands, then other messages, then callback queries
pub fn schema() -> UpdateHandler<anyhow::Error> {
    let messages = Update::filter_message()
        .enter_dialogue::<Message, InMemStorage<NavState>, NavState>()
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(command_handler),
        )
        .branch(dptree::endpoint(message_handler));

    let callbacks = Update::filter_callback_query()
        .enter_dialogue::<CallbackQuery, InMemStorage<NavState>, NavState>()
        .endpoint(callback_handler);

    dptree::entry().branch(messages).branch(callbacks)
}

/// Navigator view of a Telegram user
pub fn actor_from_user(user: &TelegramUser) -> Actor {
    Actor {
        profile: UserProfile {
            id: user.id.0 as i64,
            username: user.username.clone(),
            first_name: Some(user.first_name.clone()).filter(|name| !name.is_empty()),
            last_name: user.last_name.clone(),
        },
        language_code: user.language_code.clone(),
    }
}

/// Store the next conversation state
pub async fn apply_transition(dialogue: &NavDialogue, transition: &Transition) -> anyhow::Result<()> {
    match transition {
        Transition::Stay => {}
        Transition::Enter(state) => dialogue.update(state.clone()).await?,
        Transition::Reset => dialogue.exit().await?,
    }
    Ok(())
}

/// Store the next state only when every reply reached the chat. Returns
/// `false` when delivery failed and the stored state was left untouched.
pub async fn commit_after_delivery(
    dialogue: &NavDialogue,
    transition: &Transition,
    delivered: anyhow::Result<()>,
) -> anyhow::Result<bool> {
    match delivered {
        Ok(()) => {
            apply_transition(dialogue, transition).await?;
            Ok(true)
        }
        Err(e) => {
            error!(chat_id = %dialogue.chat_id(), error = %e, "Failed to deliver replies, keeping conversation state");
            Ok(false)
        }
    }
}
