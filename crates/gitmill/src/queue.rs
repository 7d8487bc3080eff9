//! Outbound activity messages.
//!
//! [`QueueService`] owns one broker connection and publishes batches of
//! [`QueueMessage`]s through it. The broker itself sits behind the
//! [`BrokerConnector`] / [`BrokerConnection`] traits; Redis Streams is the
//! production implementation and [`memory::MemoryBroker`] keeps everything
//! in-process.

mod broker;
mod envelope;
mod errors;
pub mod memory;
mod service;

#[cfg(feature = "redis")]
pub use broker::redis_streams;
pub use broker::{BrokerConnection, BrokerConnector};
pub use envelope::{
    Envelope, EnvelopePayload, INLINE_MESSAGE_TYPE, MAX_MESSAGE_BYTES, MessageRoute,
    QueueMessage, RESULT_MESSAGE_TYPE, TRUNCATION_HEADROOM_BYTES, message_key,
    truncate_to_boundary,
};
pub use errors::{QueueError, Result};
pub use service::{DEFAULT_SHUTDOWN_TIMEOUT, QueueOptions, QueueService};
