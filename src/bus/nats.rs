use async_trait::async_trait;
use futures::StreamExt;

use super::{BusError, DispatchChannel, JobInbox, StatusChannel};

/// NATS-backed dispatch and status channel.
#[derive(Clone)]
pub struct NatsBus {
    client: async_nats::Client,
    status_subject: String,
}

impl NatsBus {
    pub async fn connect(url: &str, status_subject: impl Into<String>) -> Result<Self, BusError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| BusError::Connect(e.to_string()))?;

        tracing::info!(url, "Connected to NATS");

        Ok(Self {
            client,
            status_subject: status_subject.into(),
        })
    }
}

#[async_trait]
impl DispatchChannel for NatsBus {
    async fn subscribe(&self, subject: &str) -> Result<JobInbox, BusError> {
        let subscriber = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| BusError::Subscribe {
                subject: subject.to_string(),
                reason: e.to_string(),
            })?;

        tracing::info!(subject, "Subscribed to job dispatch subject");

        let subject = subject.to_string();
        Ok(subscriber
            .map(move |msg| {
                tracing::debug!(subject = %subject, bytes = msg.payload.len(), "Received job message");
                msg.payload.to_vec()
            })
            .boxed())
    }
}

#[async_trait]
impl StatusChannel for NatsBus {
    async fn publish_status(&self, payload: Vec<u8>) -> Result<(), BusError> {
        let publish_err = |reason: String| BusError::Publish {
            subject: self.status_subject.clone(),
            reason,
        };

        self.client
            .publish(self.status_subject.clone(), payload.into())
            .await
            .map_err(|e| publish_err(e.to_string()))?;
        self.client
            .flush()
            .await
            .map_err(|e| publish_err(e.to_string()))?;
        Ok(())
    }
}
