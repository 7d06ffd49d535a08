/// Liveness tracking for the input transport
use std::time::Duration;
use tokio::time::Instant;

/// Result of a watchdog check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    /// Nothing was ingested for longer than the idle timeout
    Stalled { idle: Duration },
}

/// Tracks the time of the last successful ingest
///
/// The watchdog only reports; reopening the input is up to the caller.
#[derive(Debug, Clone)]
pub struct IdleWatchdog {
    idle_timeout: Duration,
    last_success: Instant,
}

impl IdleWatchdog {
    pub fn new(idle_timeout: Duration, now: Instant) -> Self {
        IdleWatchdog {
            idle_timeout,
            last_success: now,
        }
    }

    pub fn record_success(&mut self, now: Instant) {
        self.last_success = now;
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn check(&self, now: Instant) -> Liveness {
        let idle = now.saturating_duration_since(self.last_success);
        if idle > self.idle_timeout {
            Liveness::Stalled { idle }
        } else {
            Liveness::Alive
        }
    }
}
