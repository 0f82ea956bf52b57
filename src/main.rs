use anyhow::Result;
use std::sync::Arc;
use teloxide::dispatching::dialogue::InMemStorage;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{error, info, warn};

use ruuchebnik::bot::{schema, BotNavigator};
use ruuchebnik::commands::Command;
use ruuchebnik::config::Settings;
use ruuchebnik::db::{connect, init_database_schema, PgStore};
use ruuchebnik::dialogue::NavState;
use ruuchebnik::localization::init_localization;
use ruuchebnik::logging::init_tracing;
use ruuchebnik::rate_limiter::RateLimiter;
use ruuchebnik::storage::TextbookStorage;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            // Logging is not configured yet, fall back to the default format
            init_tracing(Default::default());
            error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };

    init_tracing(settings.log_format);
    info!("Starting RUУчебник Telegram bot");

    init_localization()?;

    let pool = connect(&settings.database).await?;
    init_database_schema(&pool).await?;

    let storage = TextbookStorage::new(&settings.textbooks_dir);
    if let Err(e) = tokio::fs::create_dir_all(storage.root()).await {
        warn!(path = %storage.root().display(), error = %e, "Failed to create textbooks directory");
    }

    let limiter = Arc::new(RateLimiter::new(
        settings.rate_limit.max_requests,
        settings.rate_limit.window(),
    ));
    RateLimiter::spawn_sweeper(
        Arc::clone(&limiter),
        settings.rate_limit.sweep_interval(),
        settings.rate_limit.cleanup_horizon(),
    );

    let navigator: Arc<BotNavigator> = Arc::new(BotNavigator::new(
        PgStore::new(pool),
        storage,
        limiter,
        settings.admin_id,
        settings.stats_offset,
    ));

    let bot = Bot::new(settings.bot_token);

    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!(error = %e, "Failed to publish bot commands");
    }

    info!(admin_id = settings.admin_id, "Bot initialized, starting dispatcher");

    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![navigator, InMemStorage::<NavState>::new()])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Bot stopped");
    Ok(())
}
