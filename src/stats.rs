use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::RwLock;

use serde::Serialize;

/// Process-wide counters read by the status API.
///
/// The heartbeat supervisor and the lifecycle controller write disjoint fields.
#[derive(Debug, Default)]
pub struct AgentStats {
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    current_job: RwLock<Option<String>>,
    last_heartbeat_ms: AtomicI64,
    heartbeats_sent: AtomicU64,
    heartbeat_failures: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub current_job: Option<String>,
    pub last_heartbeat_ms: Option<i64>,
    pub heartbeats_sent: u64,
    pub heartbeat_failures: u64,
}

impl AgentStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_started(&self, job_id: &str) {
        if let Ok(mut current) = self.current_job.write() {
            *current = Some(job_id.to_string());
        }
    }

    pub fn job_finished(&self, succeeded: bool) {
        if succeeded {
            self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        }
        if let Ok(mut current) = self.current_job.write() {
            *current = None;
        }
    }

    pub fn heartbeat_succeeded(&self, at_ms: i64) {
        self.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
        self.last_heartbeat_ms.store(at_ms, Ordering::Relaxed);
    }

    pub fn heartbeat_failed(&self) {
        self.heartbeat_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let last = self.last_heartbeat_ms.load(Ordering::Relaxed);
        StatsSnapshot {
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            current_job: self.current_job.read().ok().and_then(|c| c.clone()),
            last_heartbeat_ms: (last != 0).then_some(last),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
            heartbeat_failures: self.heartbeat_failures.load(Ordering::Relaxed),
        }
    }
}
