use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use super::lifecycle::JobLifecycleController;
use crate::bus::{BusError, DispatchChannel, JobInbox};
use crate::job::JobDescriptor;

/// Why the intake loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeExit {
    Shutdown,
    SubscriptionClosed,
}

/// Consumes the per-agent dispatch subject and feeds jobs to the controller
/// one at a time, in arrival order.
pub struct JobIntake {
    subject: String,
    inbox: JobInbox,
    controller: JobLifecycleController,
}

impl JobIntake {
    pub async fn subscribe(
        dispatch: &dyn DispatchChannel,
        subject: String,
        controller: JobLifecycleController,
    ) -> Result<Self, BusError> {
        let inbox = dispatch.subscribe(&subject).await?;
        tracing::info!(subject = %subject, "Job intake ready");
        Ok(Self {
            subject,
            inbox,
            controller,
        })
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Process messages until shutdown or until the subscription ends.
    ///
    /// Shutdown is only observed between jobs: a job already handed to the
    /// controller runs to its terminal status first.
    pub async fn run(mut self, shutdown: CancellationToken) -> IntakeExit {
        let exit = loop {
            let payload = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break IntakeExit::Shutdown,
                next = self.inbox.next() => match next {
                    Some(payload) => payload,
                    None => break IntakeExit::SubscriptionClosed,
                },
            };

            match JobDescriptor::decode(&payload) {
                Ok(job) => {
                    // Outcome is already published and logged by the controller.
                    let _ = self.controller.run(job).await;
                }
                Err(e) => {
                    tracing::warn!(
                        subject = %self.subject,
                        error = %e,
                        bytes = payload.len(),
                        "Discarding malformed job message"
                    );
                }
            }
        };

        match exit {
            IntakeExit::Shutdown => {
                tracing::info!(subject = %self.subject, "Job intake stopped");
            }
            IntakeExit::SubscriptionClosed => {
                tracing::error!(subject = %self.subject, "Dispatch subscription closed");
            }
        }
        exit
    }
}
