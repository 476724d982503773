//! Background garbage collection
//!
//! Runs [`SessionStore::gc`] on a fixed interval until shutdown is requested.
//! A failed sweep only defers removals: the next pass uses the same filter.

use crate::session::SessionStore;
use crate::shutdown::ShutdownState;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Totals reported when the sweeper stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sweeps_run: u64,
    pub documents_removed: usize,
}

/// Periodic expiry sweeper
pub struct GcSweeper {
    sessions: Arc<SessionStore>,
    interval: Duration,
    shutdown: ShutdownState,
}

impl GcSweeper {
    pub fn new(sessions: Arc<SessionStore>, interval: Duration, shutdown: ShutdownState) -> Self {
        Self {
            sessions,
            interval,
            shutdown,
        }
    }

    /// Sweep immediately, then every `interval`, until shutdown
    pub async fn run(self) -> SweepReport {
        let mut report = SweepReport::default();
        let max_lifetime = self.sessions.config().max_lifetime;
        log::info!(
            "Session gc sweeper started (every {}s)",
            self.interval.as_secs()
        );

        while !self.shutdown.is_shutdown_requested() {
            report.documents_removed += self.sessions.gc(max_lifetime).await;
            report.sweeps_run += 1;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.shutdown.wait() => break,
            }
        }

        log::info!(
            "Session gc sweeper stopped: {} sweeps, {} sessions removed",
            report.sweeps_run,
            report.documents_removed
        );
        report
    }

    /// Run the sweeper on a tokio task
    pub fn spawn(self) -> JoinHandle<SweepReport> {
        tokio::spawn(self.run())
    }
}
