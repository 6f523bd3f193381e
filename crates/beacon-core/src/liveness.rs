//! Periodic heartbeat sweep.

use crate::hub::{Hub, SweepReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Default period between liveness sweeps.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Drives [`Hub::sweep`] on a fixed period.
///
/// A connection that fails to answer one probe before the next tick is
/// terminated, so a dead peer is dropped within two periods.
#[derive(Debug, Clone, Copy)]
pub struct LivenessMonitor {
    period: Duration,
}

impl LivenessMonitor {
    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Spawn the sweep loop. Abort the returned handle to stop it.
    pub fn spawn(self, hub: Arc<Hub>) -> JoinHandle<()> {
        self.spawn_with(hub, |_| {})
    }

    /// Spawn the sweep loop, handing every report to `observer`.
    pub fn spawn_with<F>(self, hub: Arc<Hub>, observer: F) -> JoinHandle<()>
    where
        F: Fn(&SweepReport) + Send + 'static,
    {
        info!(period_ms = self.period.as_millis() as u64, "Starting liveness monitor");
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.period, self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let report = hub.sweep();
                if !report.terminated.is_empty() {
                    info!(terminated = report.terminated.len(), "Dropped unresponsive connections");
                }
                debug!(probed = report.probed, "Liveness sweep");
                observer(&report);
            }
        })
    }
}

impl Default for LivenessMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Endpoint;
    use crate::hub::HubConfig;
    use crate::message::Outbound;

    #[tokio::test(start_paused = true)]
    async fn test_silent_connection_dropped_after_two_periods() {
        let hub = Arc::new(Hub::new(HubConfig::default()));
        let (silent, mut silent_rx) = hub.connect("10.0.0.1", Endpoint::Producer);
        let (alive, mut alive_rx) = hub.connect("10.0.0.2", Endpoint::Producer);

        let monitor = LivenessMonitor::new(Duration::from_secs(30)).spawn(Arc::clone(&hub));

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(silent_rx.try_recv().unwrap(), Outbound::Ping);
        assert_eq!(alive_rx.try_recv().unwrap(), Outbound::Ping);
        hub.mark_alive(alive.id());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(silent_rx.try_recv().unwrap(), Outbound::Terminate);
        assert!(!hub.is_connected(silent.id()));
        assert!(hub.is_connected(alive.id()));
        assert_eq!(alive_rx.try_recv().unwrap(), Outbound::Ping);

        monitor.abort();
    }

    #[test]
    fn test_default_period() {
        assert_eq!(LivenessMonitor::default().period(), Duration::from_secs(30));
    }
}
