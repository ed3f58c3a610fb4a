//! Inactivity probing for a single socket.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessAction {
    None,
    /// Send a `heartbeat` probe.
    Probe,
    /// The probe went unanswered; close and unregister.
    Evict,
}

#[derive(Debug)]
pub struct LivenessTracker {
    inactivity_timeout: Duration,
    grace: Duration,
    last_inbound: Instant,
    probe_sent_at: Option<Instant>,
}

impl LivenessTracker {
    pub fn new(inactivity_timeout: Duration, grace: Duration, now: Instant) -> Self {
        Self {
            inactivity_timeout,
            grace,
            last_inbound: now,
            probe_sent_at: None,
        }
    }

    /// How often [`poll`](Self::poll) should run.
    pub fn check_interval(&self) -> Duration {
        (self.inactivity_timeout.min(self.grace) / 2).max(Duration::from_millis(10))
    }

    /// Any inbound frame counts as a sign of life.
    pub fn on_inbound(&mut self, now: Instant) {
        self.last_inbound = now;
        self.probe_sent_at = None;
    }

    pub fn poll(&mut self, now: Instant) -> LivenessAction {
        match self.probe_sent_at {
            Some(sent) if now.saturating_duration_since(sent) >= self.grace => LivenessAction::Evict,
            Some(_) => LivenessAction::None,
            None if now.saturating_duration_since(self.last_inbound) >= self.inactivity_timeout => {
                self.probe_sent_at = Some(now);
                LivenessAction::Probe
            }
            None => LivenessAction::None,
        }
    }

    pub fn probe_outstanding(&self) -> bool {
        self.probe_sent_at.is_some()
    }
}
