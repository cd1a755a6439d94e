use crate::bot;
use crate::bot::handlers::{get_user_id_safe, Command};
use crate::config::BotSettings;
use anyhow::{anyhow, Context, Result};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use tracing::{debug, error, info};
use tubecast_core::config::{RelaySettings, SUPERVISOR_HEALTHY_SESSION_SECS};
use tubecast_core::utils::{supervise, BackoffPolicy};
use tubecast_core::{contains_link, CacheStore, DeliveryPipeline, YtdlpFetcher};

/// Run the Telegram transport until a clean shutdown.
///
/// A session that fails or panics is restarted with capped exponential
/// backoff. A session that ran for a while before failing restores the full
/// restart budget.
///
/// # Errors
///
/// Returns the last session error once restarts in quick succession have
/// all failed.
pub async fn run_supervised(settings: Arc<BotSettings>) -> Result<()> {
    supervise(
        BackoffPolicy::supervisor(),
        Duration::from_secs(SUPERVISOR_HEALTHY_SESSION_SECS),
        "Bot session",
        || run_session(settings.clone()),
    )
    .await
}

/// One bot session: verify the token, load state, dispatch updates.
async fn run_session(settings: Arc<BotSettings>) -> Result<()> {
    let bot = Bot::new(settings.telegram.telegram_token.clone());
    let me = bot.get_me().await.context("Telegram token check failed")?;
    info!(username = ?me.user.username, "Authorized as bot");

    let pipeline = init_pipeline(&settings.relay).await?;
    let handler = setup_handler();

    info!("Bot is running...");

    let dispatch = async move {
        Dispatcher::builder(bot, handler)
            .dependencies(dptree::deps![pipeline])
            .default_handler(|upd| async move {
                debug!(update_id = ?upd.id, "Ignoring unsupported update");
            })
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;
    };

    AssertUnwindSafe(dispatch)
        .catch_unwind()
        .await
        .map_err(|_| anyhow!("Dispatcher panicked"))?;

    info!("Dispatcher stopped.");
    Ok(())
}

async fn init_pipeline(relay: &RelaySettings) -> Result<Arc<DeliveryPipeline>> {
    tokio::fs::create_dir_all(&relay.audio_dir)
        .await
        .with_context(|| format!("Failed to create {}", relay.audio_dir.display()))?;

    let cache = CacheStore::load(&relay.cache_file).await?;
    let fetcher = YtdlpFetcher::new(relay.ytdlp_path.clone(), relay.audio_dir.clone());
    info!(
        audio_dir = %relay.audio_dir.display(),
        ytdlp = %relay.ytdlp_path,
        "Delivery pipeline initialized."
    );

    Ok(Arc::new(DeliveryPipeline::new(
        Arc::new(cache),
        Arc::new(fetcher),
    )))
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    Update::filter_message()
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(
            dptree::filter(|msg: Message| msg.text().is_some_and(contains_link))
                .endpoint(handle_link),
        )
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    pipeline: Arc<DeliveryPipeline>,
) -> Result<(), teloxide::RequestError> {
    let res = match cmd {
        Command::Start => bot::handlers::start(bot, msg).await,
        Command::Healthcheck => bot::handlers::healthcheck(bot, msg).await,
        Command::Stats => bot::handlers::stats(bot, msg, pipeline).await,
    };
    if let Err(e) = res {
        error!("Command error: {}", e);
    }
    respond(())
}

async fn handle_link(
    bot: Bot,
    msg: Message,
    pipeline: Arc<DeliveryPipeline>,
) -> Result<(), teloxide::RequestError> {
    let user_id = get_user_id_safe(&msg);
    if let Err(e) = bot::handlers::handle_link(bot, msg, pipeline).await {
        error!("Link handler error for user {}: {}", user_id, e);
    }
    respond(())
}
