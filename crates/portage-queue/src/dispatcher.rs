//! The queue dispatcher: polls the store for due items and drives them
//! through their connector's queue handler.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use portage_core::{
    defaults, ActionType, ConnectorRegistry, Error, Persistence, QueueItem, QueueStore,
    QueueVerdict, Result,
};

/// Configuration for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Polling interval in milliseconds. Zero falls back to the store's
    /// configured interval.
    pub poll_interval_ms: u64,
    /// Maximum items processed concurrently per tick.
    pub max_concurrent: usize,
    /// Whether to process the queue at all.
    pub enabled: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 0,
            max_concurrent: defaults::DISPATCH_MAX_CONCURRENT,
            enabled: true,
        }
    }
}

impl DispatcherConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `QUEUE_DISPATCH_ENABLED` | `true` | Enable/disable queue processing |
    /// | `QUEUE_MAX_CONCURRENT` | `4` | Max items processed concurrently |
    /// | `QUEUE_POLL_INTERVAL_MS` | store setting | Polling interval |
    pub fn from_env() -> Self {
        let enabled = std::env::var("QUEUE_DISPATCH_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent = std::env::var("QUEUE_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::DISPATCH_MAX_CONCURRENT)
            .max(1);

        let poll_interval_ms = std::env::var("QUEUE_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);

        Self {
            poll_interval_ms,
            max_concurrent,
            enabled,
        }
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }
}

/// Event emitted by the dispatcher.
#[derive(Debug, Clone)]
pub enum DispatcherEvent {
    Started,
    Stopped,
    /// A handler was invoked for an item.
    ItemDispatched {
        item_id: Uuid,
        connector_id: String,
        action: ActionType,
    },
    /// An item finished and left the active queue.
    ItemCompleted { item_id: Uuid },
    /// A backend confirmed an upload.
    UploadConfirmed { upload_id: String },
    /// An item failed and was rescheduled.
    ItemPostponed {
        item_id: Uuid,
        attempts: i32,
        error: String,
    },
    /// An item escalated to manual intervention.
    ItemEscalated { item_id: Uuid, error: String },
}

/// Handle for controlling a running dispatcher.
pub struct DispatcherHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<DispatcherEvent>,
}

impl DispatcherHandle {
    /// Signal the dispatcher to shut down gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for dispatcher events.
    pub fn events(&self) -> broadcast::Receiver<DispatcherEvent> {
        self.event_rx.resubscribe()
    }
}

/// Polls the queue store and invokes connector handlers.
pub struct Dispatcher {
    store: Arc<dyn QueueStore>,
    persistence: Arc<dyn Persistence>,
    registry: Arc<ConnectorRegistry>,
    config: DispatcherConfig,
    event_tx: broadcast::Sender<DispatcherEvent>,
}

/// Shared references handed to spawned item tasks.
#[derive(Clone)]
struct DispatcherRef {
    store: Arc<dyn QueueStore>,
    persistence: Arc<dyn Persistence>,
    registry: Arc<ConnectorRegistry>,
    event_tx: broadcast::Sender<DispatcherEvent>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn QueueStore>,
        persistence: Arc<dyn Persistence>,
        registry: Arc<ConnectorRegistry>,
        config: DispatcherConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            store,
            persistence,
            registry,
            config,
            event_tx,
        }
    }

    /// Start the dispatcher and return a handle for control.
    pub fn start(self) -> DispatcherHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        DispatcherHandle {
            shutdown_tx,
            event_rx,
        }
    }

    /// Run one claim-and-process pass without the polling loop. Returns the
    /// number of items processed.
    pub async fn tick(&self) -> Result<usize> {
        let refs = self.refs();
        Self::process_due(&refs, self.config.max_concurrent).await
    }

    fn refs(&self) -> DispatcherRef {
        DispatcherRef {
            store: self.store.clone(),
            persistence: self.persistence.clone(),
            registry: self.registry.clone(),
            event_tx: self.event_tx.clone(),
        }
    }

    fn poll_interval(&self) -> Duration {
        if self.config.poll_interval_ms > 0 {
            Duration::from_millis(self.config.poll_interval_ms)
        } else {
            self.store.options().poll_interval
        }
    }

    /// The dispatcher loop. Claims up to `max_concurrent` due items per
    /// tick, processes them concurrently, and only sleeps when the queue
    /// was empty.
    #[instrument(skip_all)]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("queue dispatcher is disabled, not starting");
            return;
        }

        info!(
            poll_interval_ms = self.poll_interval().as_millis() as u64,
            max_concurrent = self.config.max_concurrent,
            connectors = self.registry.queue_handler_ids().len(),
            "queue dispatcher started"
        );
        let _ = self.event_tx.send(DispatcherEvent::Started);

        let poll_interval = self.poll_interval();
        let refs = self.refs();

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!("queue dispatcher received shutdown signal");
                break;
            }

            let processed = match Self::process_due(&refs, self.config.max_concurrent).await {
                Ok(n) => n,
                Err(e) => {
                    error!(error = %e, "queue claim failed");
                    0
                }
            };

            if processed == 0 {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("queue dispatcher received shutdown signal");
                        break;
                    }
                    _ = sleep(poll_interval) => {}
                }
            }
        }

        let _ = self.event_tx.send(DispatcherEvent::Stopped);
        info!("queue dispatcher stopped");
    }

    async fn process_due(refs: &DispatcherRef, max_concurrent: usize) -> Result<usize> {
        let handler_ids = refs.registry.queue_handler_ids();
        if handler_ids.is_empty() {
            return Ok(0);
        }

        let claimed = refs
            .store
            .claim_due(&handler_ids, Utc::now(), max_concurrent)
            .await?;
        if claimed.is_empty() {
            return Ok(0);
        }
        debug!(claimed = claimed.len(), "processing queue batch");

        let mut tasks = JoinSet::new();
        let total = claimed.len();
        for item in claimed {
            let refs = refs.clone();
            tasks.spawn(async move {
                Self::process_item(&refs, item).await;
            });
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = ?e, "queue item task panicked");
            }
        }
        Ok(total)
    }

    #[instrument(skip_all, fields(item_id = %item.id, connector_id = %item.connector_id, action = %item.action, attempts = item.attempts))]
    async fn process_item(refs: &DispatcherRef, item: QueueItem) {
        let Some(handler) = refs.registry.queue_handler(&item.connector_id) else {
            // Registry changed between claim and dispatch; put the claim
            // back without counting an attempt.
            warn!("no queue handler for claimed item, releasing");
            if let Err(e) = refs.store.release(item.id).await {
                error!(error = %e, "failed to release claimed item");
            }
            return;
        };

        let _ = refs.event_tx.send(DispatcherEvent::ItemDispatched {
            item_id: item.id,
            connector_id: item.connector_id.clone(),
            action: item.action.clone(),
        });

        let started = std::time::Instant::now();
        let verdict = handler.handle_queue(item.clone()).await;
        debug!(
            duration_ms = started.elapsed().as_millis() as u64,
            success = verdict.is_ok(),
            "queue handler returned"
        );

        // Handler errors are retryable failures, never a dispatcher crash.
        let verdict = match verdict {
            Ok(v) => v,
            Err(e) => QueueVerdict::Retry(e.to_string()),
        };

        if let Err(e) = Self::apply_verdict(refs, &item, verdict).await {
            error!(error = %e, "failed to apply queue verdict");
        }
    }

    async fn apply_verdict(
        refs: &DispatcherRef,
        item: &QueueItem,
        verdict: QueueVerdict,
    ) -> Result<()> {
        match verdict {
            QueueVerdict::CompleteItem => {
                refs.store.complete(item.id).await?;
                let _ = refs
                    .event_tx
                    .send(DispatcherEvent::ItemCompleted { item_id: item.id });
            }
            QueueVerdict::CompleteUpload(result) => {
                refs.persistence.set_uploaded(&item.upload_id, &result).await?;
                refs.store.complete(item.id).await?;
                info!(upload_id = %item.upload_id, ext_id = %result.ext_id, "upload confirmed by backend");
                let _ = refs.event_tx.send(DispatcherEvent::UploadConfirmed {
                    upload_id: item.upload_id.clone(),
                });
                let _ = refs
                    .event_tx
                    .send(DispatcherEvent::ItemCompleted { item_id: item.id });
            }
            QueueVerdict::Backoff(message) => {
                warn!(error = %message, "handler requested backoff, escalating to manual intervention");
                refs.store.mark_error(item, &message, None, true).await?;
                let _ = refs.event_tx.send(DispatcherEvent::ItemEscalated {
                    item_id: item.id,
                    error: message,
                });
            }
            QueueVerdict::Retry(message) => {
                let policy = refs.store.options().backoff;
                let attempts = item.attempts + 1;
                if policy.exhausted(attempts) {
                    warn!(attempts, error = %message, "retry budget exhausted, escalating to manual intervention");
                    refs.store.mark_error(item, &message, None, true).await?;
                    let _ = refs.event_tx.send(DispatcherEvent::ItemEscalated {
                        item_id: item.id,
                        error: message,
                    });
                } else {
                    let delay = policy.postpone_for(attempts);
                    let due = Utc::now()
                        + chrono::Duration::from_std(delay)
                            .unwrap_or_else(|_| chrono::Duration::days(365));
                    debug!(attempts, delay_secs = delay.as_secs(), error = %message, "postponing item");
                    refs.store.mark_error(item, &message, Some(due), false).await?;
                    let _ = refs.event_tx.send(DispatcherEvent::ItemPostponed {
                        item_id: item.id,
                        attempts,
                        error: message,
                    });
                }
            }
        }
        Ok(())
    }
}
