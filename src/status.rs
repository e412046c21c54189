use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::bus::{BusError, StatusChannel};
use crate::identity::AgentIdentity;
use crate::job::JobStatus;

/// Wire form of one lifecycle update. `timestamp` is milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub agent_identity: String,
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_locator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: i64,
}

/// A status update before it is stamped with identity and time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub job_id: String,
    pub status: JobStatus,
    pub output_locator: Option<String>,
    pub message: Option<String>,
}

impl StatusUpdate {
    pub fn processing(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Processing,
            output_locator: None,
            message: None,
        }
    }

    pub fn completed(job_id: impl Into<String>, output_locator: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Completed,
            output_locator: Some(output_locator.into()),
            message: None,
        }
    }

    pub fn failed(job_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Failed,
            output_locator: None,
            message: Some(message.into()),
        }
    }
}

pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Emits status events onto the status channel.
///
/// Every publish is bounded by a timeout so a stalled transport (for example
/// a bus that is reconnecting) cannot hold a job hostage.
#[derive(Clone)]
pub struct StatusPublisher {
    identity: AgentIdentity,
    channel: Arc<dyn StatusChannel>,
    timeout: Duration,
}

impl StatusPublisher {
    pub fn new(identity: AgentIdentity, channel: Arc<dyn StatusChannel>) -> Self {
        Self {
            identity,
            channel,
            timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Stamp and publish one update, returning the event that was sent.
    pub async fn publish(&self, update: StatusUpdate) -> Result<StatusEvent, BusError> {
        let event = StatusEvent {
            agent_identity: self.identity.to_string(),
            job_id: update.job_id,
            status: update.status,
            output_locator: update.output_locator,
            message: update.message,
            timestamp: Utc::now().timestamp_millis(),
        };
        let payload = serde_json::to_vec(&event)?;
        tokio::time::timeout(self.timeout, self.channel.publish_status(payload))
            .await
            .map_err(|_| BusError::Timeout(self.timeout))??;
        Ok(event)
    }

    /// Best-effort publish: failures are logged and otherwise ignored.
    pub async fn report(&self, update: StatusUpdate) {
        let job_id = update.job_id.clone();
        let status = update.status;
        match self.publish(update).await {
            Ok(_) => {
                tracing::debug!(job_id = %job_id, status = %status, "Published status update");
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, status = %status, error = %e, "Failed to publish status update");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        payloads: Mutex<Vec<Vec<u8>>>,
        fail: bool,
    }

    #[async_trait]
    impl StatusChannel for Recorder {
        async fn publish_status(&self, payload: Vec<u8>) -> Result<(), BusError> {
            if self.fail {
                return Err(BusError::Publish {
                    subject: "agent.status".to_string(),
                    reason: "connection closed".to_string(),
                });
            }
            self.payloads.lock().await.push(payload);
            Ok(())
        }
    }

    #[test]
    fn completed_event_wire_format() {
        let event = StatusEvent {
            agent_identity: "0xabc".to_string(),
            job_id: "job-1".to_string(),
            status: JobStatus::Completed,
            output_locator: Some("artifact://out-1".to_string()),
            message: None,
            timestamp: 1_700_000_000_000,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["status"], "completed");
        assert_eq!(value["output_locator"], "artifact://out-1");
        assert!(value.get("message").is_none());
        assert_eq!(value["timestamp"], 1_700_000_000_000i64);
    }

    #[test]
    fn failed_event_omits_output_locator() {
        let update = StatusUpdate::failed("job-2", "boom");
        assert_eq!(update.status, JobStatus::Failed);
        assert!(update.output_locator.is_none());
        assert_eq!(update.message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn publish_stamps_identity_and_timestamp() {
        let recorder = Arc::new(Recorder::default());
        let identity = AgentIdentity::from_address([0x42; 20]);
        let publisher = StatusPublisher::new(identity.clone(), recorder.clone());

        let before = Utc::now().timestamp_millis();
        let event = publisher
            .publish(StatusUpdate::processing("job-1"))
            .await
            .unwrap();

        assert_eq!(event.agent_identity, identity.to_string());
        assert!(event.timestamp >= before);

        let payloads = recorder.payloads.lock().await;
        assert_eq!(payloads.len(), 1);
        let decoded: StatusEvent = serde_json::from_slice(&payloads[0]).unwrap();
        assert_eq!(decoded, event);
    }

    struct Stalled;

    #[async_trait]
    impl StatusChannel for Stalled {
        async fn publish_status(&self, _payload: Vec<u8>) -> Result<(), BusError> {
            futures::future::pending().await
        }
    }

    #[tokio::test]
    async fn publish_gives_up_on_stalled_channel() {
        let publisher = StatusPublisher::new(AgentIdentity::from_address([3; 20]), Arc::new(Stalled))
            .with_timeout(Duration::from_millis(20));

        let result = publisher.publish(StatusUpdate::processing("job-1")).await;
        assert!(matches!(result, Err(BusError::Timeout(_))));
    }

    #[tokio::test]
    async fn report_swallows_transport_errors() {
        let recorder = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });
        let publisher = StatusPublisher::new(AgentIdentity::from_address([1; 20]), recorder);

        assert!(publisher
            .publish(StatusUpdate::processing("job-1"))
            .await
            .is_err());
        // Must not panic or propagate.
        publisher.report(StatusUpdate::processing("job-1")).await;
    }
}
