//! Administrator broadcast delivery

use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use tracing::{debug, warn};

use crate::db::Store;
use crate::navigation::{BroadcastJob, Navigator};

/// Pause between two broadcast messages, keeping well under Telegram flood limits
pub const BROADCAST_DELAY: Duration = Duration::from_millis(100);

/// Send `job` to every recipient, then store the result and report to the administrator
pub async fn run_broadcast<S: Store + 'static>(
    bot: Bot,
    navigator: Arc<Navigator<S>>,
    job: BroadcastJob,
    admin_chat: ChatId,
    language_code: Option<String>,
) {
    let mut sent: i64 = 0;
    let mut failed: i64 = 0;

    for recipient in &job.recipients {
        match bot.send_message(ChatId(*recipient), job.text.clone()).await {
            Ok(_) => sent += 1,
            Err(e) => {
                failed += 1;
                debug!(user_id = recipient, error = %e, "Broadcast message not delivered");
            }
        }
        tokio::time::sleep(BROADCAST_DELAY).await;
    }

    let summary = navigator
        .finish_broadcast(&job, sent, failed, language_code.as_deref())
        .await;

    if let Err(e) = bot
        .send_message(admin_chat, summary)
        .parse_mode(ParseMode::Html)
        .await
    {
        warn!(error = %e, "Failed to send broadcast summary");
    }
}
