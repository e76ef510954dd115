use std::time::{Duration, Instant};

pub const DEFAULT_LIVENESS_THRESHOLD: Duration = Duration::from_secs(30);

/// Last time the controller proved it was alive.
#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    last_seen: Option<Instant>,
    threshold: Duration,
}

impl Default for LivenessMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_LIVENESS_THRESHOLD)
    }
}

impl LivenessMonitor {
    pub fn new(threshold: Duration) -> Self {
        Self {
            last_seen: None,
            threshold,
        }
    }

    pub fn record_heartbeat(&mut self) {
        self.record_heartbeat_at(Instant::now());
    }

    pub fn record_heartbeat_at(&mut self, now: Instant) {
        self.last_seen = Some(now);
    }

    pub fn is_reachable(&self) -> bool {
        self.is_reachable_at(Instant::now())
    }

    /// Never reachable before the first heartbeat.
    pub fn is_reachable_at(&self, now: Instant) -> bool {
        self.last_seen
            .map(|seen| now.saturating_duration_since(seen) < self.threshold)
            .unwrap_or(false)
    }

    pub fn last_seen(&self) -> Option<Instant> {
        self.last_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_until_first_heartbeat() {
        let monitor = LivenessMonitor::default();
        assert!(!monitor.is_reachable());
        assert!(monitor.last_seen().is_none());
    }

    #[test]
    fn reachability_expires_after_threshold() {
        let mut monitor = LivenessMonitor::default();
        let start = Instant::now();
        monitor.record_heartbeat_at(start);

        assert!(monitor.is_reachable_at(start));
        assert!(monitor.is_reachable_at(start + Duration::from_secs(29)));
        assert!(!monitor.is_reachable_at(start + Duration::from_secs(30)));
        assert!(!monitor.is_reachable_at(start + Duration::from_secs(45)));
    }

    #[test]
    fn later_heartbeat_extends_window() {
        let mut monitor = LivenessMonitor::new(Duration::from_secs(10));
        let start = Instant::now();
        monitor.record_heartbeat_at(start);
        monitor.record_heartbeat_at(start + Duration::from_secs(8));

        assert!(monitor.is_reachable_at(start + Duration::from_secs(15)));
        assert!(!monitor.is_reachable_at(start + Duration::from_secs(18)));
    }
}
