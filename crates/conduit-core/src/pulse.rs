//! Periodic liveness watchdog.
//!
//! A `Pulse` ticks on a `tokio::time::interval` and counts silent ticks
//! since the last inbound traffic. The owner drives it by polling
//! [`Pulse::tick`] inside its select loop and calling [`Pulse::reset`] on any
//! inbound block.

use std::time::Duration;

use tokio::time::{Interval, MissedTickBehavior};

/// How many silent ticks a pulse tolerates before firing, per role.
///
/// `Bot` fires on every silent tick (it proactively heartbeats); `Service`
/// waits for the configured limit before kicking.
#[derive(Clone, Copy, Debug)]
pub enum PulseLimit {
    Bot,
    Service(u32),
}

impl PulseLimit {
    fn ticks(self) -> u32 {
        match self {
            PulseLimit::Bot => 1,
            PulseLimit::Service(limit) => limit,
        }
    }
}

/// The liveness watchdog for one connection.
pub struct Pulse {
    interval: Interval,
    limit: PulseLimit,
    silent_ticks: u32,
}

impl Pulse {
    pub fn new(period: Duration, limit: PulseLimit) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            interval,
            limit,
            silent_ticks: 0,
        }
    }

    /// Wait for the next tick. Returns `true` if this tick exceeded the
    /// configured limit and the watchdog fired (the counter is reset in
    /// that case).
    pub async fn tick(&mut self) -> bool {
        self.interval.tick().await;
        self.silent_ticks += 1;
        if self.silent_ticks > self.limit.ticks() {
            self.silent_ticks = 0;
            true
        } else {
            false
        }
    }

    /// Any inbound block resets the silence counter.
    pub fn reset(&mut self) {
        self.silent_ticks = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn service_fires_after_limit_plus_one_silent_ticks() {
        let mut pulse = Pulse::new(Duration::from_millis(10), PulseLimit::Service(2));
        assert!(!pulse.tick().await);
        assert!(!pulse.tick().await);
        assert!(pulse.tick().await);
    }

    #[tokio::test(start_paused = true)]
    async fn bot_fires_on_every_silent_tick() {
        let mut pulse = Pulse::new(Duration::from_millis(10), PulseLimit::Bot);
        assert!(pulse.tick().await);
        assert!(pulse.tick().await);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_accumulated_silence() {
        let mut pulse = Pulse::new(Duration::from_millis(10), PulseLimit::Service(3));
        assert!(!pulse.tick().await);
        assert!(!pulse.tick().await);
        pulse.reset();
        assert!(!pulse.tick().await);
        assert!(!pulse.tick().await);
        assert!(pulse.tick().await);
    }
}
