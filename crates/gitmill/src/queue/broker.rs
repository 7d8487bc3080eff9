use async_trait::async_trait;

use super::errors::Result;

/// An open connection to a message broker.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Publish one payload and wait for the broker to acknowledge it.
    async fn publish(&self, key: &str, payload: &str) -> Result<()>;

    /// Cheap liveness check; `false` makes the queue service reconnect.
    async fn is_healthy(&self) -> bool;

    /// Push out anything buffered client-side.
    async fn flush(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Opens broker connections.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn BrokerConnection>>;
}

/// Redis Streams broker backed by a `deadpool-redis` pool.
///
/// Every message becomes one `XADD <stream> MAXLEN ~ <n> * key <key> payload <json>` entry.
#[cfg(feature = "redis")]
pub mod redis_streams {
    use async_trait::async_trait;
    use deadpool_redis::redis::cmd;
    use deadpool_redis::{Config as RedisConfig, Pool, Runtime};

    use super::{BrokerConnection, BrokerConnector};
    use crate::queue::errors::{QueueError, Result};

    /// Connector configuration.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct RedisStreamsConfig {
        pub url: String,
        pub stream: String,
        /// Approximate stream length cap.
        pub max_len: u64,
    }

    #[derive(Debug, Clone)]
    pub struct RedisStreamsConnector {
        config: RedisStreamsConfig,
    }

    impl RedisStreamsConnector {
        pub fn new(config: RedisStreamsConfig) -> Self {
            Self { config }
        }
    }

    #[async_trait]
    impl BrokerConnector for RedisStreamsConnector {
        async fn connect(&self) -> Result<Box<dyn BrokerConnection>> {
            let pool = RedisConfig::from_url(self.config.url.as_str())
                .create_pool(Some(Runtime::Tokio1))
                .map_err(|e| QueueError::connection(e.to_string()))?;

            let connection = RedisStreamsConnection {
                pool,
                stream: self.config.stream.clone(),
                max_len: self.config.max_len,
            };
            if !connection.is_healthy().await {
                return Err(QueueError::connection(format!(
                    "redis broker for stream {} did not answer PING",
                    self.config.stream
                )));
            }
            tracing::info!(stream = %self.config.stream, "Connected to Redis Streams broker");
            Ok(Box::new(connection))
        }
    }

    struct RedisStreamsConnection {
        pool: Pool,
        stream: String,
        max_len: u64,
    }

    #[async_trait]
    impl BrokerConnection for RedisStreamsConnection {
        async fn publish(&self, key: &str, payload: &str) -> Result<()> {
            let mut conn = self
                .pool
                .get()
                .await
                .map_err(|e| QueueError::publish(key, e.to_string()))?;

            let _entry_id: String = cmd("XADD")
                .arg(&self.stream)
                .arg("MAXLEN")
                .arg("~")
                .arg(self.max_len)
                .arg("*")
                .arg("key")
                .arg(key)
                .arg("payload")
                .arg(payload)
                .query_async(&mut conn)
                .await
                .map_err(|e| QueueError::publish(key, e.to_string()))?;
            Ok(())
        }

        async fn is_healthy(&self) -> bool {
            let Ok(mut conn) = self.pool.get().await else {
                return false;
            };
            let pong: std::result::Result<String, _> = cmd("PING").query_async(&mut conn).await;
            pong.is_ok()
        }

        async fn flush(&self) -> Result<()> {
            // XADD is acknowledged synchronously, nothing is buffered
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.pool.close();
            Ok(())
        }
    }
}
