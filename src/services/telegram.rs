use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::ChatId;

use crate::error::{AppError, AppResult};
use crate::services::dispatch::MessageSender;

#[derive(Clone)]
pub struct TelegramService {
    bot: Bot,
}

impl TelegramService {
    pub async fn new(token: String) -> AppResult<Self> {
        let bot = Bot::new(token);

        // Verify the bot token by getting bot info
        match bot.get_me().await {
            Ok(me) => {
                tracing::info!("Telegram bot initialized: @{}", me.username());
                Ok(Self { bot })
            }
            Err(e) => {
                tracing::error!("Failed to initialize Telegram bot: {}", e);
                Err(AppError::Telegram(format!(
                    "Failed to initialize bot: {}",
                    e
                )))
            }
        }
    }

    /// Send a plain-text message and return the Telegram-assigned message id.
    /// No parse mode is set, so user-authored content needs no escaping.
    pub async fn send(&self, chat_id: i64, text: &str) -> AppResult<i32> {
        let request = self
            .bot
            .send_message(ChatId(chat_id), text)
            .disable_web_page_preview(true);

        match request.await {
            Ok(sent_message) => {
                tracing::debug!(
                    "Telegram message sent to {}: message_id={}",
                    chat_id,
                    sent_message.id
                );
                Ok(sent_message.id.0)
            }
            Err(e) => {
                tracing::warn!("Failed to send Telegram message to {}: {}", chat_id, e);
                Err(AppError::Telegram(format!("Failed to send message: {}", e)))
            }
        }
    }
}

#[async_trait]
impl MessageSender for TelegramService {
    async fn send_message(&self, chat_id: i64, text: &str) -> AppResult<i64> {
        self.send(chat_id, text).await.map(i64::from)
    }
}
