//! In-process dispatch queue and the periodic re-dispatch sweep.
//!
//! Creating a notification only enqueues its id; a fixed pool of workers pulls
//! ids off a bounded channel and runs [`DeliveryDispatcher::dispatch`]. An id
//! that is already queued or being dispatched is not queued a second time.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::{DispatchConfig, SweepConfig};
use crate::db::NotificationRepository;
use crate::services::dispatch::{DeliveryDispatcher, DispatchMetrics};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Already waiting or in flight.
    Duplicate,
    /// Queue full or closed; the sweep will pick it up later.
    Dropped,
}

#[derive(Clone)]
pub struct DispatchQueue {
    tx: mpsc::Sender<i64>,
    in_flight: Arc<Mutex<HashSet<i64>>>,
    metrics: Arc<DispatchMetrics>,
}

impl DispatchQueue {
    /// Start `config.workers` dispatch workers. Workers exit when `shutdown`
    /// fires or every queue handle has been dropped.
    pub fn start(
        dispatcher: Arc<DeliveryDispatcher>,
        config: &DispatchConfig,
        shutdown: &broadcast::Sender<()>,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let (queue, rx) = Self::channel(config.queue_capacity, dispatcher.metrics().clone());
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let in_flight = queue.in_flight.clone();

        let mut handles = Vec::new();
        for worker in 0..config.workers.max(1) {
            let rx = rx.clone();
            let in_flight = in_flight.clone();
            let dispatcher = dispatcher.clone();
            let mut shutdown_rx = shutdown.subscribe();

            handles.push(tokio::spawn(async move {
                tracing::debug!("Dispatch worker {} started", worker);
                loop {
                    let next = tokio::select! {
                        _ = shutdown_rx.recv() => {
                            tracing::info!("Dispatch worker {} received shutdown signal", worker);
                            break;
                        }
                        id = async { rx.lock().await.recv().await } => id,
                    };

                    let Some(notification_id) = next else {
                        tracing::debug!("Dispatch queue closed; worker {} exiting", worker);
                        break;
                    };

                    if let Err(e) = dispatcher.dispatch(notification_id).await {
                        tracing::error!(
                            "Dispatch of notification {} failed: {:?}",
                            notification_id,
                            e
                        );
                    }

                    if let Ok(mut set) = in_flight.lock() {
                        set.remove(&notification_id);
                    }
                }
            }));
        }

        (queue, handles)
    }

    pub(crate) fn channel(
        capacity: usize,
        metrics: Arc<DispatchMetrics>,
    ) -> (Self, mpsc::Receiver<i64>) {
        let (tx, rx) = mpsc::channel::<i64>(capacity.max(1));
        let queue = DispatchQueue {
            tx,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            metrics,
        };
        (queue, rx)
    }

    /// Queue a notification for dispatch without waiting for capacity.
    pub fn enqueue(&self, notification_id: i64) -> EnqueueOutcome {
        {
            let Ok(mut set) = self.in_flight.lock() else {
                return EnqueueOutcome::Dropped;
            };
            if !set.insert(notification_id) {
                return EnqueueOutcome::Duplicate;
            }
        }

        match self.tx.try_send(notification_id) {
            Ok(()) => EnqueueOutcome::Queued,
            Err(e) => {
                if let Ok(mut set) = self.in_flight.lock() {
                    set.remove(&notification_id);
                }
                self.metrics.record_dropped();
                tracing::warn!(
                    "Could not queue notification {} for dispatch: {}",
                    notification_id,
                    e
                );
                EnqueueOutcome::Dropped
            }
        }
    }

    pub fn metrics(&self) -> &Arc<DispatchMetrics> {
        &self.metrics
    }
}

/// Re-queue recent notifications that still have undelivered Telegram rows.
/// Returns how many ids were newly queued.
pub async fn sweep_once(pool: &SqlitePool, queue: &DispatchQueue, max_age_hours: i64) -> usize {
    let since = Utc::now().naive_utc() - chrono::Duration::hours(max_age_hours);

    let ids = match NotificationRepository::find_with_pending_telegram(pool, since).await {
        Ok(ids) => ids,
        Err(e) => {
            tracing::error!("Re-dispatch sweep failed to load pending notifications: {:?}", e);
            return 0;
        }
    };

    let queued = ids
        .iter()
        .filter(|id| queue.enqueue(**id) == EnqueueOutcome::Queued)
        .count();

    if queued > 0 {
        tracing::info!("Re-dispatch sweep queued {} notification(s)", queued);
    }
    queued
}

/// Periodic sweep task; the first pass runs one interval after startup.
pub fn spawn_redispatch_sweeper(
    pool: SqlitePool,
    queue: DispatchQueue,
    config: &SweepConfig,
    shutdown: &broadcast::Sender<()>,
) -> JoinHandle<()> {
    let interval = Duration::from_secs(config.interval_seconds.max(1));
    let max_age_hours = config.max_age_hours;
    let mut shutdown_rx = shutdown.subscribe();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Re-dispatch sweeper received shutdown signal");
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }

            sweep_once(&pool, &queue, max_age_hours).await;
        }
    })
}
