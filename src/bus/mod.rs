//! Dispatch and status channels.
//!
//! The agent only depends on the two capability traits below; [`NatsBus`]
//! is the production transport.

pub mod nats;

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::identity::AgentIdentity;

pub use nats::NatsBus;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("failed to connect to message bus: {0}")]
    Connect(String),

    #[error("failed to subscribe to {subject}: {reason}")]
    Subscribe { subject: String, reason: String },

    #[error("failed to publish to {subject}: {reason}")]
    Publish { subject: String, reason: String },

    #[error("status publish did not complete within {0:?}")]
    Timeout(Duration),

    #[error("subscription to {0} closed unexpectedly")]
    Closed(String),

    #[error("failed to encode status event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Raw inbound job messages in delivery order. Dropping the inbox tears the
/// subscription down.
pub type JobInbox = BoxStream<'static, Vec<u8>>;

#[async_trait]
pub trait DispatchChannel: Send + Sync {
    async fn subscribe(&self, subject: &str) -> Result<JobInbox, BusError>;
}

#[async_trait]
pub trait StatusChannel: Send + Sync {
    async fn publish_status(&self, payload: Vec<u8>) -> Result<(), BusError>;
}

/// Per-agent inbound subject, e.g. `jobs.dispatch.0xAbC...`.
pub fn dispatch_subject(prefix: &str, identity: &AgentIdentity) -> String {
    format!("{}.{}", prefix.trim_end_matches('.'), identity)
}
