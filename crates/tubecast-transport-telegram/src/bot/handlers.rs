use crate::bot::TelegramChatTransport;
use anyhow::Result;
use std::sync::Arc;
use teloxide::{prelude::*, types::ReplyParameters, utils::command::BotCommands};
use tracing::{debug, info};
use tubecast_core::DeliveryPipeline;

/// Greeting sent in reply to `/start`.
pub const GREETING_TEXT: &str =
    "👋 Hi! Send me a YouTube link and I will reply with its audio track.";

// Helper function to get user name from Message
fn get_user_name(msg: &Message) -> String {
    if let Some(ref user) = msg.from {
        if let Some(ref username) = user.username {
            return username.clone();
        }
        if !user.first_name.is_empty() {
            return user.first_name.clone();
        }
    }
    "Unknown".to_string()
}

/// Safe extraction of user ID from a message.
/// Returns 0 if the user information is missing.
pub fn get_user_id_safe(msg: &Message) -> i64 {
    msg.from.as_ref().map_or(0, |u| u.id.0.cast_signed())
}

/// Supported commands for the bot
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    /// Show the greeting
    #[command(description = "Start the bot.")]
    Start,
    /// Check bot health
    #[command(description = "Check bot health.")]
    Healthcheck,
    /// Show cache statistics
    #[command(description = "Show bot statistics.")]
    Stats,
}

/// Reply to `/healthcheck`.
pub const HEALTHCHECK_TEXT: &str = "OK";

/// Reply to `/stats`.
#[must_use]
pub fn stats_text(cached: usize) -> String {
    format!("📊 Cached tracks: {cached}")
}

async fn reply(bot: &Bot, msg: &Message, text: impl Into<String>) -> Result<()> {
    bot.send_message(msg.chat.id, text)
        .reply_parameters(ReplyParameters::new(msg.id))
        .await?;
    Ok(())
}

/// Start command handler
///
/// # Errors
///
/// Returns an error if the greeting cannot be sent.
pub async fn start(bot: Bot, msg: Message) -> Result<()> {
    let user_id = get_user_id_safe(&msg);
    let user_name = get_user_name(&msg);

    info!("User {user_id} ({user_name}) initiated /start command.");
    reply(&bot, &msg, GREETING_TEXT).await
}

/// Liveness check: answers as long as the dispatcher is processing updates.
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn healthcheck(bot: Bot, msg: Message) -> Result<()> {
    debug!(chat_id = %msg.chat.id, user_id = get_user_id_safe(&msg), "Healthcheck");
    reply(&bot, &msg, HEALTHCHECK_TEXT).await
}

/// Reports how many tracks can be resent without a download.
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn stats(bot: Bot, msg: Message, pipeline: Arc<DeliveryPipeline>) -> Result<()> {
    let cached = pipeline.cache().len().await;
    info!(user_id = get_user_id_safe(&msg), cached, "Stats requested");
    reply(&bot, &msg, stats_text(cached)).await
}

/// Link handler - runs one delivery for the message text.
/// Delivery failures are reported to the chat, not returned.
pub async fn handle_link(bot: Bot, msg: Message, pipeline: Arc<DeliveryPipeline>) -> Result<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let user_id = get_user_id_safe(&msg);
    info!("Link received from user {user_id}.");

    let transport = TelegramChatTransport::new(bot, msg.chat.id, msg.id);
    let outcome = pipeline.deliver(&transport, text).await;

    info!(user_id, ?outcome, "Link handled");
    Ok(())
}
