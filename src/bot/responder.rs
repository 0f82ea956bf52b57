//! Sends navigator replies through the Telegram API.
//!
//! Callback queries are answered exactly once: with the first alert or toast
//! when there is one, otherwise with an empty answer to stop the spinner.

use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, InputFile, MessageId, ParseMode};
use teloxide::{ApiError, RequestError};
use tracing::{error, warn};

use super::broadcast::run_broadcast;
use crate::db::Store;
use crate::localization::t_lang;
use crate::navigation::{Actor, Delivery, Navigator, Outcome, Reply, Screen};

/// The update a set of replies answers
#[derive(Clone, Copy)]
pub enum Origin<'a> {
    Message(&'a Message),
    Callback(&'a CallbackQuery),
}

impl Origin<'_> {
    fn chat_id(&self) -> ChatId {
        match self {
            Origin::Message(msg) => msg.chat.id,
            Origin::Callback(q) => q
                .message
                .as_ref()
                .map(|m| m.chat().id)
                .unwrap_or_else(|| ChatId::from(q.from.id)),
        }
    }

    /// Menu message a callback came from, which screens replace in place
    fn menu_message(&self) -> Option<MessageId> {
        match self {
            Origin::Callback(q) => q.message.as_ref().map(|m| m.id()),
            Origin::Message(_) => None,
        }
    }
}

/// Send every reply of `outcome` in order
pub async fn deliver<S: Store + 'static>(
    bot: &Bot,
    navigator: &Arc<Navigator<S>>,
    origin: Origin<'_>,
    actor: &Actor,
    outcome: &Outcome,
) -> Result<()> {
    let chat_id = origin.chat_id();
    let mut callback_answered = false;

    for reply in &outcome.replies {
        match reply {
            Reply::Screen(screen) => show_screen(bot, chat_id, origin.menu_message(), screen).await?,
            Reply::Alert(text) => match origin {
                Origin::Callback(q) if !callback_answered => {
                    bot.answer_callback_query(q.id.clone())
                        .text(text.clone())
                        .show_alert(true)
                        .await?;
                    callback_answered = true;
                }
                _ => {
                    bot.send_message(chat_id, text.clone()).await?;
                }
            },
            Reply::Toast(text) => {
                if let Origin::Callback(q) = origin {
                    if !callback_answered {
                        bot.answer_callback_query(q.id.clone()).text(text.clone()).await?;
                        callback_answered = true;
                    }
                }
            }
            Reply::Message(text) => {
                bot.send_message(chat_id, text.clone())
                    .parse_mode(ParseMode::Html)
                    .await?;
            }
            Reply::Document(delivery) => {
                send_textbook(bot, navigator, chat_id, actor, delivery).await?;
            }
            Reply::Broadcast(job) => {
                tokio::spawn(run_broadcast(
                    bot.clone(),
                    Arc::clone(navigator),
                    job.clone(),
                    chat_id,
                    actor.language_code.clone(),
                ));
            }
        }
    }

    if let Origin::Callback(q) = origin {
        if !callback_answered {
            if let Err(e) = bot.answer_callback_query(q.id.clone()).await {
                warn!(user_id = actor.id(), error = %e, "Failed to answer callback query");
            }
        }
    }

    Ok(())
}

/// Best-effort generic error after a failed delivery
pub async fn report_failure(bot: &Bot, origin: Origin<'_>, actor: &Actor) {
    let text = t_lang("error-general", actor.lang());
    if let Origin::Callback(q) = origin {
        // Fails harmlessly when the query was already answered
        let _ = bot.answer_callback_query(q.id.clone()).await;
    }
    if let Err(e) = bot.send_message(origin.chat_id(), text).await {
        warn!(user_id = actor.id(), error = %e, "Failed to send error message");
    }
}

/// Replace the menu message when possible, otherwise send a new one
async fn show_screen(
    bot: &Bot,
    chat_id: ChatId,
    menu_message: Option<MessageId>,
    screen: &Screen,
) -> Result<()> {
    if let Some(message_id) = menu_message {
        let edited = bot
            .edit_message_text(chat_id, message_id, screen.text.clone())
            .parse_mode(ParseMode::Html)
            .reply_markup(screen.keyboard.clone())
            .await;

        match edited {
            Ok(_) | Err(RequestError::Api(ApiError::MessageNotModified)) => return Ok(()),
            Err(e) => warn!(chat_id = %chat_id, error = %e, "Failed to edit menu message, sending a new one"),
        }
    }

    bot.send_message(chat_id, screen.text.clone())
        .parse_mode(ParseMode::Html)
        .reply_markup(screen.keyboard.clone())
        .await?;
    Ok(())
}

/// Send the file; counters and the audit entry are only recorded after Telegram accepted it
async fn send_textbook<S: Store>(
    bot: &Bot,
    navigator: &Navigator<S>,
    chat_id: ChatId,
    actor: &Actor,
    delivery: &Delivery,
) -> Result<()> {
    if let Err(e) = bot.send_chat_action(chat_id, ChatAction::UploadDocument).await {
        warn!(chat_id = %chat_id, error = %e, "Failed to send upload action");
    }

    let file = InputFile::file(delivery.path.clone()).file_name(delivery.file_name.clone());
    let sent = bot
        .send_document(chat_id, file)
        .caption(delivery.caption.clone())
        .parse_mode(ParseMode::Html)
        .await;

    match sent {
        Ok(_) => {
            navigator.complete_download(delivery).await;
            Ok(())
        }
        Err(e) => {
            error!(
                user_id = delivery.user_id,
                textbook_id = delivery.textbook_id,
                error = %e,
                "Failed to send textbook"
            );
            bot.send_message(chat_id, t_lang("error-general", actor.lang()))
                .await?;
            Ok(())
        }
    }
}
