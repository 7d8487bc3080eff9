use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::try_join_all;
use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;

use super::broker::{BrokerConnection, BrokerConnector};
use super::envelope::QueueMessage;
use super::errors::{QueueError, Result};
use crate::retry::{RetryConfig, with_retry};

/// Default bound on how long shutdown waits for in-flight sends.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Backoff used while (re)connecting to the broker.
    pub reconnect: RetryConfig,
    pub shutdown_timeout: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            reconnect: RetryConfig::default(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

/// Publishes activity messages through a lazily opened broker connection.
///
/// The connection is opened on the first send and replaced whenever it
/// reports itself unhealthy. Shared by every batch of every repository a
/// worker processes.
pub struct QueueService {
    connector: Arc<dyn BrokerConnector>,
    connection: Mutex<Option<Arc<dyn BrokerConnection>>>,
    options: QueueOptions,
    in_flight: TaskTracker,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for QueueService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueService")
            .field("options", &self.options)
            .field("in_flight", &self.in_flight.len())
            .field("shut_down", &self.shut_down.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl QueueService {
    pub fn new(connector: Arc<dyn BrokerConnector>, options: QueueOptions) -> Self {
        Self {
            connector,
            connection: Mutex::new(None),
            options,
            in_flight: TaskTracker::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Publish every message and wait for all acknowledgements.
    ///
    /// An empty batch returns immediately without touching the broker.
    pub async fn send_batch(&self, messages: Vec<QueueMessage>) -> Result<usize> {
        if messages.is_empty() {
            return Ok(0);
        }
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(QueueError::ShutDown);
        }
        self.in_flight.track_future(self.publish_all(messages)).await
    }

    async fn publish_all(&self, messages: Vec<QueueMessage>) -> Result<usize> {
        let connection = self.ensure_connected().await?;
        try_join_all(
            messages
                .iter()
                .map(|message| connection.publish(&message.key, &message.payload)),
        )
        .await?;

        tracing::debug!(count = messages.len(), "Published messages");
        Ok(messages.len())
    }

    async fn ensure_connected(&self) -> Result<Arc<dyn BrokerConnection>> {
        let mut slot = self.connection.lock().await;
        if let Some(connection) = slot.as_ref() {
            if connection.is_healthy().await {
                return Ok(Arc::clone(connection));
            }
            tracing::warn!("Broker connection unhealthy, reconnecting");
            if let Some(stale) = slot.take() {
                if let Err(e) = stale.close().await {
                    tracing::debug!(error = %e, "Failed to close stale broker connection");
                }
            }
        }

        let connection: Arc<dyn BrokerConnection> = with_retry(
            || self.connector.connect(),
            self.options.reconnect.clone().into_backoff(),
            |_| true,
            "broker connect",
        )
        .await?
        .into();
        *slot = Some(Arc::clone(&connection));
        Ok(connection)
    }

    /// Stop accepting sends, wait (bounded) for in-flight ones, then flush and close.
    pub async fn shutdown(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.in_flight.close();
        if tokio::time::timeout(self.options.shutdown_timeout, self.in_flight.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                pending = self.in_flight.len(),
                timeout_secs = self.options.shutdown_timeout.as_secs(),
                "Timed out waiting for in-flight messages"
            );
        }

        if let Some(connection) = self.connection.lock().await.take() {
            connection.flush().await?;
            connection.close().await?;
        }
        tracing::info!("Queue service shut down");
        Ok(())
    }
}
