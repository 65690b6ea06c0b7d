pub mod amqp;
pub mod job;

use async_trait::async_trait;
use thiserror::Error;

pub use amqp::AmqpBus;
pub use job::{subject_for_source, SyncJob, SYNC_SUBJECTS};

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus connection failed: {0}")]
    Connect(String),

    #[error("publish to '{subject}' failed: {reason}")]
    Publish { subject: String, reason: String },

    #[error("consume from '{subject}' failed: {reason}")]
    Consume { subject: String, reason: String },

    #[error("acknowledge failed: {0}")]
    Ack(String),
}

/// Transport abstraction over the durable message bus.
///
/// Subjects are dotted routing keys (`connector.sync.<source-type>`); each
/// subject is backed by one durable queue. Delivery is at-least-once: the
/// receipt returned with each message must be acked after processing.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a payload to a subject (fire-and-forget).
    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<(), BusError>;

    /// Retrieve up to `max` messages from a subject, with their receipts.
    async fn receive(&self, subject: &str, max: usize) -> Result<Vec<(Vec<u8>, String)>, BusError>;

    /// Acknowledge successful processing.
    async fn ack(&self, receipt: &str) -> Result<(), BusError>;

    /// Negative-acknowledge: requeue for redelivery or drop.
    async fn nack(&self, receipt: &str, requeue: bool) -> Result<(), BusError>;
}
