//! Message Handler module for processing incoming Telegram messages

use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::debug;

use super::responder::{deliver, report_failure, Origin};
use super::{actor_from_user, commit_after_delivery, BotNavigator};
use crate::commands::Command;
use crate::dialogue::{NavDialogue, NavState};
use crate::navigation::Event;

/// Handle a recognised slash command
pub async fn command_handler(
    bot: Bot,
    msg: Message,
    cmd: Command,
    dialogue: NavDialogue,
    state: NavState,
    navigator: Arc<BotNavigator>,
) -> Result<()> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    let actor = actor_from_user(user);
    debug!(user_id = actor.id(), command = cmd.name(), state = ?state, "Received command");

    let outcome = navigator.handle(&actor, &state, Event::Command(cmd)).await;
    let delivered = deliver(&bot, &navigator, Origin::Message(&msg), &actor, &outcome).await;
    if !commit_after_delivery(&dialogue, &outcome.transition, delivered).await? {
        report_failure(&bot, Origin::Message(&msg), &actor).await;
    }
    Ok(())
}

/// Handle any other message: free text, media, unknown commands
pub async fn message_handler(
    bot: Bot,
    msg: Message,
    dialogue: NavDialogue,
    state: NavState,
    navigator: Arc<BotNavigator>,
) -> Result<()> {
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    let actor = actor_from_user(user);
    debug!(user_id = actor.id(), state = ?state, "Received message");

    let text = msg.text().unwrap_or_default().to_string();
    let outcome = navigator.handle(&actor, &state, Event::Text(text)).await;
    let delivered = deliver(&bot, &navigator, Origin::Message(&msg), &actor, &outcome).await;
    if !commit_after_delivery(&dialogue, &outcome.transition, delivered).await? {
        report_failure(&bot, Origin::Message(&msg), &actor).await;
    }
    Ok(())
}
