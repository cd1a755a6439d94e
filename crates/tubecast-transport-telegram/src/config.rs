//! Telegram transport settings.

use config::ConfigError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tubecast_core::config::RelaySettings;

/// Telegram transport settings loaded from environment variables.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct TelegramSettings {
    /// Telegram Bot API token.
    pub telegram_token: String,
}

/// Combined settings used by the Telegram transport layer.
#[derive(Debug, Clone)]
pub struct BotSettings {
    /// Relay settings shared across transport handlers.
    pub relay: Arc<RelaySettings>,
    /// Telegram-specific settings.
    pub telegram: Arc<TelegramSettings>,
}

impl BotSettings {
    /// Create a new combined settings bundle.
    #[must_use]
    pub fn new(relay: RelaySettings, telegram: TelegramSettings) -> Self {
        Self {
            relay: Arc::new(relay),
            telegram: Arc::new(telegram),
        }
    }
}

impl TelegramSettings {
    /// Create new settings by loading from environment and files.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails or the token is missing.
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_config(tubecast_core::config::build_config()?)
    }

    fn from_config(config: config::Config) -> Result<Self, ConfigError> {
        let settings: Self = config.try_deserialize()?;
        if settings.telegram_token.trim().is_empty() {
            return Err(ConfigError::Message("telegram_token is empty".to_string()));
        }
        Ok(settings)
    }
}
