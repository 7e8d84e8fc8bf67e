//! Scheduled sweeps of expired session state.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::rate_limit::OperationClass;
use crate::session::SessionService;

/// Counts from one maintenance pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub revocations: usize,
    pub lockouts: usize,
    pub refresh_tokens: u64,
}

/// Run every sweep once.
pub async fn run_cleanup(service: &SessionService) -> SweepReport {
    let mut report = SweepReport {
        revocations: service.revocations().sweep(),
        lockouts: service.lockout().sweep(),
        ..SweepReport::default()
    };

    service.rate_limits().sweep();
    debug!(
        login_keys = service.rate_limits().tracked_keys(OperationClass::Login),
        refresh_keys = service.rate_limits().tracked_keys(OperationClass::Refresh),
        "Swept rate limiters"
    );

    // Expired refresh tokens stay for a retention window so late replays are still recognised.
    let cutoff = service
        .now()
        .saturating_sub(service.settings().refresh_retention_secs);
    match service.database().tokens().delete_expired(cutoff).await {
        Ok(count) => {
            if count > 0 {
                info!("Cleaned up {} expired refresh tokens", count);
            }
            report.refresh_tokens = count;
        }
        Err(e) => error!(operation = "cleanup", error = %e, "Failed to clean up refresh tokens"),
    }

    if report.revocations > 0 || report.lockouts > 0 {
        info!(
            revocations = report.revocations,
            lockouts = report.lockouts,
            "Swept in-memory registries"
        );
    }

    report
}

/// Handle on the background sweep task.
pub struct Maintenance {
    handle: JoinHandle<()>,
    service: Arc<SessionService>,
}

impl Maintenance {
    /// Spawn the periodic sweep. The first pass runs immediately.
    pub fn start(service: Arc<SessionService>) -> Self {
        let period = service.settings().sweep_interval();
        let task_service = service.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                run_cleanup(&task_service).await;
            }
        });
        Self { handle, service }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop sweeping and close the connection pool.
    pub async fn shutdown(self) {
        self.handle.abort();
        let _ = self.handle.await;
        self.service.database().close().await;
        info!("Maintenance stopped");
    }
}
