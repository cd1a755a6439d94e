use anyhow::{anyhow, Result};
use async_trait::async_trait;
use teloxide::payloads::SendMessage;
use teloxide::prelude::*;
use teloxide::requests::JsonRequest;
use teloxide::types::{ChatId, FileId, InputFile, MessageId, ReplyParameters};
use tracing::debug;
use tubecast_core::pipeline::{ChatTransport, StatusHandle};
use tubecast_core::{CacheEntry, FetchedAudio};

/// Telegram chat bound to the message that triggered a delivery.
pub struct TelegramChatTransport {
    bot: Bot,
    chat_id: ChatId,
    reply_to: MessageId,
}

impl TelegramChatTransport {
    /// Create a transport that replies to `reply_to` in `chat_id`.
    pub const fn new(bot: Bot, chat_id: ChatId, reply_to: MessageId) -> Self {
        Self {
            bot,
            chat_id,
            reply_to,
        }
    }

    /// Text message threaded under the triggering message.
    fn text_reply(&self, text: &str) -> JsonRequest<SendMessage> {
        self.bot
            .send_message(self.chat_id, text)
            .reply_parameters(ReplyParameters::new(self.reply_to))
    }
}

#[async_trait]
impl ChatTransport for TelegramChatTransport {
    async fn reply_text(&self, text: &str) -> Result<()> {
        self.text_reply(text).await?;
        Ok(())
    }

    async fn post_status(&self, text: &str) -> Result<StatusHandle> {
        let msg = self.text_reply(text).await?;
        Ok(StatusHandle(msg.id.0))
    }

    async fn delete_status(&self, status: StatusHandle) -> Result<()> {
        self.bot
            .delete_message(self.chat_id, MessageId(status.0))
            .await?;
        Ok(())
    }

    async fn send_cached_audio(&self, entry: &CacheEntry) -> Result<()> {
        self.bot
            .send_audio(
                self.chat_id,
                InputFile::file_id(FileId(entry.file_id.clone())),
            )
            .title(entry.title.clone())
            .performer(entry.author.clone())
            .reply_parameters(ReplyParameters::new(self.reply_to))
            .await?;
        Ok(())
    }

    async fn send_audio_file(&self, audio: &FetchedAudio) -> Result<String> {
        let msg = self
            .bot
            .send_audio(self.chat_id, InputFile::file(audio.path.clone()))
            .title(audio.title.clone())
            .performer(audio.author.clone())
            .reply_parameters(ReplyParameters::new(self.reply_to))
            .await?;

        // Telegram may answer with a document instead of an audio for odd containers
        let file_id = msg
            .audio()
            .map(|a| a.file.id.0.clone())
            .or_else(|| msg.document().map(|d| d.file.id.0.clone()))
            .ok_or_else(|| anyhow!("Telegram response carries no file handle"))?;

        debug!(chat_id = %self.chat_id, file_id = %file_id, "Uploaded audio");
        Ok(file_id)
    }
}
