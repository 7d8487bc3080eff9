//! In-process broker. Messages are kept in memory and never leave the process.
//!
//! Used by `gitmill run` when no broker URL is configured, and by tests that
//! need to inspect what was published or inject broker failures.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::broker::{BrokerConnection, BrokerConnector};
use super::errors::{QueueError, Result};

/// A message as the broker received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub key: String,
    pub payload: String,
}

#[derive(Debug, Default)]
struct State {
    published: Mutex<Vec<PublishedMessage>>,
    connects: AtomicUsize,
    healthy: AtomicBool,
    fail_publishes: AtomicBool,
    closed: AtomicBool,
}

/// Shared handle; clones observe the same messages.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    state: Arc<State>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        let state = State::default();
        state.healthy.store(true, Ordering::SeqCst);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state
            .published
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }

    /// Number of connections opened so far.
    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.state.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.state.fail_publishes.store(fail, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerConnector for MemoryBroker {
    async fn connect(&self) -> Result<Box<dyn BrokerConnection>> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        // a fresh connection starts out healthy
        self.state.healthy.store(true, Ordering::SeqCst);
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl BrokerConnection for MemoryBroker {
    async fn publish(&self, key: &str, payload: &str) -> Result<()> {
        if self.state.fail_publishes.load(Ordering::SeqCst) {
            return Err(QueueError::publish(key, "broker rejected the message"));
        }
        let mut published = self
            .state
            .published
            .lock()
            .map_err(|_| QueueError::publish(key, "message log is poisoned"))?;
        published.push(PublishedMessage {
            key: key.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        self.state.healthy.load(Ordering::SeqCst)
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
