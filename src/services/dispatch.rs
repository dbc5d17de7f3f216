//! Telegram push delivery for a notification's pending recipients.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use rand::Rng;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::config::DispatchConfig;
use crate::db::{
    BotSessionRepository, Notification, NotificationRecipient, NotificationRepository,
    RecipientRepository,
};
use crate::error::{AppError, AppResult};

/// Outbound messaging provider.
#[async_trait]
pub trait MessageSender: Send + Sync + 'static {
    /// Send `text` to the chat and return the provider's message id.
    async fn send_message(&self, chat_id: i64, text: &str) -> AppResult<i64>;
}

/// Answers "does this user have a linked chat, and which one".
#[async_trait]
pub trait ChatDirectory: Send + Sync + 'static {
    async fn chat_id_for_user(&self, user_id: i64) -> AppResult<Option<i64>>;
}

/// Chat lookup backed by the bot's authenticated sessions.
pub struct BotSessionDirectory {
    pool: SqlitePool,
}

impl BotSessionDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatDirectory for BotSessionDirectory {
    async fn chat_id_for_user(&self, user_id: i64) -> AppResult<Option<i64>> {
        BotSessionRepository::find_chat_id(&self.pool, user_id).await
    }
}

/// Process-wide dispatch counters.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    runs: AtomicU64,
    delivered: AtomicU64,
    already_delivered: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchMetricsSnapshot {
    pub runs: u64,
    pub delivered: u64,
    pub already_delivered: u64,
    pub skipped: u64,
    pub failed: u64,
    pub dropped: u64,
}

impl DispatchMetrics {
    pub fn snapshot(&self) -> DispatchMetricsSnapshot {
        DispatchMetricsSnapshot {
            runs: self.runs.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            already_delivered: self.already_delivered.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn record(&self, report: &DispatchReport) {
        self.runs.fetch_add(1, Ordering::Relaxed);
        self.delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.already_delivered
            .fetch_add(report.already_delivered as u64, Ordering::Relaxed);
        self.skipped.fetch_add(report.skipped as u64, Ordering::Relaxed);
        self.failed.fetch_add(report.failed as u64, Ordering::Relaxed);
    }
}

/// Outcome of one dispatch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Rows that were still undelivered when the run started.
    pub pending: usize,
    pub delivered: usize,
    /// Sent, but another run recorded the delivery first.
    pub already_delivered: usize,
    /// No linked Telegram chat.
    pub skipped: usize,
    /// Left pending after exhausting retries.
    pub failed: usize,
}

enum Outcome {
    Delivered,
    AlreadyDelivered,
    Skipped,
    Failed,
}

/// Text of the Telegram push for a notification.
pub fn format_push(notification: &Notification) -> String {
    format!("🔔 {}\n\n{}", notification.title, notification.message)
}

/// Exponential backoff without jitter: `initial * 2^attempt`, capped at `max`.
pub fn backoff_delay(initial_ms: u64, max_ms: u64, attempt: u32) -> Duration {
    let mut delay = initial_ms;
    for _ in 0..attempt {
        delay = delay.saturating_mul(2);
        if delay >= max_ms {
            break;
        }
    }
    Duration::from_millis(delay.min(max_ms))
}

/// Heuristics to decide whether a send failure is likely transient. Only known
/// transient shapes are retried; anything else waits for the next run.
fn is_retryable(err: &AppError) -> bool {
    let e = match err {
        AppError::Telegram(msg) => msg.to_lowercase(),
        _ => return false,
    };

    e.contains("too many requests")
        || e.contains("retry after")
        || e.contains("429")
        || e.contains("timeout")
        || e.contains("timed out")
        || e.contains("temporarily unavailable")
        || e.contains("service unavailable")
        || e.contains("bad gateway")
        || e.contains("internal server error")
        || e.contains("connection reset")
        || e.contains("connection refused")
        || e.contains("error sending request")
        || e.contains("network error")
}

/// The chat can never receive messages from this bot.
fn is_permanent(err: &AppError) -> bool {
    let e = match err {
        AppError::Telegram(msg) => msg.to_lowercase(),
        _ => return false,
    };

    e.contains("chat not found")
        || e.contains("bot was blocked")
        || e.contains("user is deactivated")
        || e.contains("bot can't initiate conversation")
        || e.contains("forbidden")
}

/// Sends the Telegram push for a notification to every recipient that has not
/// received it yet, and records the outcome per recipient.
pub struct DeliveryDispatcher {
    pool: SqlitePool,
    sender: Arc<dyn MessageSender>,
    directory: Arc<dyn ChatDirectory>,
    config: DispatchConfig,
    metrics: Arc<DispatchMetrics>,
}

impl DeliveryDispatcher {
    pub fn new(
        pool: SqlitePool,
        sender: Arc<dyn MessageSender>,
        directory: Arc<dyn ChatDirectory>,
        config: DispatchConfig,
        metrics: Arc<DispatchMetrics>,
    ) -> Self {
        Self {
            pool,
            sender,
            directory,
            config,
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<DispatchMetrics> {
        &self.metrics
    }

    /// Attempt delivery to all pending recipients of the notification.
    ///
    /// Only failures to load the notification or its recipients are returned;
    /// per-recipient send failures are logged and counted in the report.
    pub async fn dispatch(&self, notification_id: i64) -> AppResult<DispatchReport> {
        let notification = match NotificationRepository::find_by_id(&self.pool, notification_id)
            .await?
        {
            Some(n) => n,
            None => {
                tracing::debug!(
                    "Notification {} no longer exists; nothing to dispatch",
                    notification_id
                );
                return Ok(DispatchReport::default());
            }
        };

        if !notification.send_telegram {
            return Ok(DispatchReport::default());
        }

        let pending = RecipientRepository::pending_telegram(&self.pool, notification_id).await?;
        let text = format_push(&notification);
        let text = text.as_str();
        let concurrency = self.config.per_notification_concurrency.max(1);

        let mut report = DispatchReport {
            pending: pending.len(),
            ..Default::default()
        };

        let outcomes: Vec<Outcome> = stream::iter(pending)
            .map(|recipient| self.deliver(notification_id, recipient, text))
            .buffer_unordered(concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                Outcome::Delivered => report.delivered += 1,
                Outcome::AlreadyDelivered => report.already_delivered += 1,
                Outcome::Skipped => report.skipped += 1,
                Outcome::Failed => report.failed += 1,
            }
        }

        self.metrics.record(&report);

        tracing::info!(
            "Dispatched notification {}: pending={}, delivered={}, already_delivered={}, skipped={}, failed={}",
            notification_id,
            report.pending,
            report.delivered,
            report.already_delivered,
            report.skipped,
            report.failed
        );

        Ok(report)
    }

    async fn deliver(
        &self,
        notification_id: i64,
        recipient: NotificationRecipient,
        text: &str,
    ) -> Outcome {
        let chat_id = match self.directory.chat_id_for_user(recipient.user_id).await {
            Ok(Some(chat_id)) => chat_id,
            Ok(None) => return Outcome::Skipped,
            Err(e) => {
                tracing::warn!(
                    "Chat lookup failed for user {} (notification {}): {}",
                    recipient.user_id,
                    notification_id,
                    e
                );
                return Outcome::Failed;
            }
        };

        let message_id = match self.send_with_retry(chat_id, text).await {
            Ok(id) => id,
            Err(e) if is_permanent(&e) => {
                tracing::warn!(
                    "Telegram rejected notification {} for user {}, not retrying: {}",
                    notification_id,
                    recipient.user_id,
                    e
                );
                if let Err(e) =
                    RecipientRepository::mark_telegram_rejected(&self.pool, recipient.id).await
                {
                    tracing::error!(
                        "Failed to record Telegram rejection for recipient {}: {:?}",
                        recipient.id,
                        e
                    );
                }
                return Outcome::Failed;
            }
            Err(e) => {
                tracing::warn!(
                    "Telegram push for notification {} to user {} failed: {}",
                    notification_id,
                    recipient.user_id,
                    e
                );
                return Outcome::Failed;
            }
        };

        match RecipientRepository::mark_telegram_delivered(&self.pool, recipient.id, message_id)
            .await
        {
            Ok(true) => Outcome::Delivered,
            Ok(false) => {
                tracing::debug!(
                    "Recipient {} was already marked delivered by a concurrent dispatch",
                    recipient.id
                );
                Outcome::AlreadyDelivered
            }
            Err(e) => {
                tracing::error!(
                    "Failed to record Telegram delivery for recipient {}: {:?}",
                    recipient.id,
                    e
                );
                Outcome::Failed
            }
        }
    }

    /// One provider call per attempt, each bounded by the send timeout; transient
    /// failures back off exponentially with a little jitter.
    async fn send_with_retry(&self, chat_id: i64, text: &str) -> AppResult<i64> {
        let timeout = Duration::from_millis(self.config.send_timeout_ms);
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            let result = match tokio::time::timeout(timeout, self.sender.send_message(chat_id, text))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(AppError::Telegram(format!(
                    "send timed out after {}ms",
                    self.config.send_timeout_ms
                ))),
            };

            let err = match result {
                Ok(message_id) => return Ok(message_id),
                Err(e) => e,
            };

            attempt += 1;
            if attempt >= max_attempts || !is_retryable(&err) {
                return Err(err);
            }

            let base = backoff_delay(
                self.config.initial_backoff_ms,
                self.config.max_backoff_ms,
                attempt - 1,
            );
            let jitter_cap = (base.as_millis() as u64 / 4).max(1);
            let delay = base + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_cap));

            tracing::debug!(
                "Retrying Telegram send to {} in {:?} (attempt {}/{}): {}",
                chat_id,
                delay,
                attempt + 1,
                max_attempts,
                err
            );
            tokio::time::sleep(delay).await;
        }
    }
}
