use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::artifact::ArtifactStore;
use crate::bus::{dispatch_subject, BusError, DispatchChannel, StatusChannel};
use crate::config::AgentConfig;
use crate::dashboard::{run_dashboard, DashboardState};
use crate::error::{AgentError, Result};
use crate::hwinfo::GpuInfo;
use crate::identity::AgentIdentity;
use crate::ledger::{register_capability, LedgerClient};
use crate::stats::AgentStats;
use crate::status::StatusPublisher;
use crate::worker::{
    ExecutionEngine, HeartbeatSupervisor, IntakeExit, JobIntake, JobLifecycleController,
};

/// External systems the agent talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub ledger: Arc<dyn LedgerClient>,
    pub dispatch: Arc<dyn DispatchChannel>,
    pub status: Arc<dyn StatusChannel>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub engine: Arc<dyn ExecutionEngine>,
}

/// Main agent that orchestrates all components
pub struct Agent {
    config: AgentConfig,
    identity: AgentIdentity,
    gpu: GpuInfo,
    collaborators: Collaborators,
    stats: Arc<AgentStats>,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        identity: AgentIdentity,
        gpu: GpuInfo,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            config,
            identity,
            gpu,
            collaborators,
            stats: Arc::new(AgentStats::new()),
        }
    }

    pub fn stats(&self) -> Arc<AgentStats> {
        self.stats.clone()
    }

    /// Run the agent until `shutdown` fires.
    ///
    /// 1. Registers GPU capability on the ledger (fatal on failure)
    /// 2. Subscribes to the per-agent dispatch subject (fatal on failure)
    /// 3. Spawns the heartbeat supervisor
    /// 4. Optionally spawns the status API
    /// 5. Processes jobs serially until shutdown
    ///
    /// # Errors
    ///
    /// Returns an error if registration or subscription fails, or if the
    /// dispatch subscription ends while the agent is still meant to be running.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(
            identity = %self.identity,
            gpu_model = %self.gpu.model,
            vram_mib = self.gpu.vram_mib,
            "Starting node agent"
        );

        register_capability(self.collaborators.ledger.as_ref(), &self.gpu).await?;

        let publisher = StatusPublisher::new(self.identity.clone(), self.collaborators.status.clone())
            .with_timeout(self.config.bus.publish_timeout);
        let controller = JobLifecycleController::new(
            self.collaborators.artifacts.clone(),
            self.collaborators.engine.clone(),
            publisher,
            self.config.workspace_root.clone(),
        )
        .with_processing_status(self.config.emit_processing)
        .with_stats(self.stats.clone());

        let subject = dispatch_subject(&self.config.bus.dispatch_prefix, &self.identity);
        let intake = JobIntake::subscribe(
            self.collaborators.dispatch.as_ref(),
            subject.clone(),
            controller,
        )
        .await?;

        let heartbeat = HeartbeatSupervisor::new(
            self.config.heartbeat_interval,
            self.collaborators.ledger.clone(),
            self.stats.clone(),
        );
        let heartbeat_handle = tokio::spawn(heartbeat.run(shutdown.clone()));

        // Spawn status API if configured
        if let Some(addr) = self.config.status_addr {
            let state = DashboardState {
                identity: self.identity.to_string(),
                gpu: self.gpu.clone(),
                stats: self.stats.clone(),
            };
            tokio::spawn(run_dashboard(addr, state, shutdown.clone()));
        }

        tracing::info!(identity = %self.identity, "Node agent running");

        let exit = intake.run(shutdown.clone()).await;

        if exit == IntakeExit::SubscriptionClosed {
            shutdown.cancel();
        }

        heartbeat_handle
            .await
            .map_err(|e| AgentError::Internal(format!("heartbeat task failed: {e}")))?;

        match exit {
            IntakeExit::Shutdown => {
                tracing::info!("Node agent stopped");
                Ok(())
            }
            IntakeExit::SubscriptionClosed => Err(BusError::Closed(subject).into()),
        }
    }
}
