//! Callback Handler module for processing inline keyboard callback queries

use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::debug;

use super::responder::{deliver, report_failure, Origin};
use super::{actor_from_user, commit_after_delivery, BotNavigator};
use crate::dialogue::{NavDialogue, NavState};
use crate::navigation::Event;

/// Handle callback queries from inline keyboards
pub async fn callback_handler(
    bot: Bot,
    q: CallbackQuery,
    dialogue: NavDialogue,
    state: NavState,
    navigator: Arc<BotNavigator>,
) -> Result<()> {
    let actor = actor_from_user(&q.from);
    let data = q.data.clone().unwrap_or_default();
    debug!(user_id = actor.id(), data = %data, state = ?state, "Received callback query");

    let outcome = navigator.handle(&actor, &state, Event::Callback(data)).await;
    let delivered = deliver(&bot, &navigator, Origin::Callback(&q), &actor, &outcome).await;
    if !commit_after_delivery(&dialogue, &outcome.transition, delivered).await? {
        report_failure(&bot, Origin::Callback(&q), &actor).await;
    }
    Ok(())
}
