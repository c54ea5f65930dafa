// SPDX-License-Identifier: CEPL-1.0
//! Frame-rate-independent tick gating.

use std::time::{Duration, Instant};

use tracing::debug;

pub const MAX_TICK_RATE: u32 = 1000;

/// Configured ticks-per-second plus the runtime offset from the +/- controls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickRate {
    base: u32,
    offset: i32,
}

impl TickRate {
    pub fn new(base: u32) -> Self {
        Self {
            base: base.clamp(1, MAX_TICK_RATE),
            offset: 0,
        }
    }

    pub fn offset(&self) -> i32 {
        self.offset
    }

    pub fn effective(&self) -> u32 {
        (self.base as i64 + self.offset as i64) as u32
    }

    /// Applies `delta` to the offset unless the effective rate would leave
    /// `1..=MAX_TICK_RATE`. Returns whether the rate changed.
    pub fn adjust(&mut self, delta: i32) -> bool {
        let proposed = self.base as i64 + self.offset as i64 + delta as i64;
        if delta == 0 || proposed < 1 || proposed > MAX_TICK_RATE as i64 {
            return false;
        }
        self.offset += delta;
        true
    }

    pub fn interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / self.effective() as u64)
    }
}

/// Decides, per polled frame, whether the automaton advances.
#[derive(Clone, Debug)]
pub struct TickClock {
    rate: TickRate,
    last_tick: Instant,
    paused: bool,
    ticks: u64,
}

impl TickClock {
    pub fn new(rate: TickRate, now: Instant) -> Self {
        Self {
            rate,
            last_tick: now,
            paused: false,
            ticks: 0,
        }
    }

    pub fn rate(&self) -> TickRate {
        self.rate
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Pausing keeps the elapsed time from piling up: resuming starts a fresh interval.
    pub fn set_paused(&mut self, paused: bool, now: Instant) {
        if self.paused && !paused {
            self.last_tick = now;
        }
        self.paused = paused;
    }

    pub fn toggle_pause(&mut self, now: Instant) -> bool {
        self.set_paused(!self.paused, now);
        self.paused
    }

    pub fn adjust_rate(&mut self, delta: i32) -> bool {
        let changed = self.rate.adjust(delta);
        if changed {
            debug!(
                "tick rate {} (offset {:+})",
                self.rate.effective(),
                self.rate.offset()
            );
        }
        changed
    }

    /// True when at least one interval has elapsed since the last tick. The
    /// reference point moves by exactly one interval so ticks do not drift; after a
    /// stall of several intervals it snaps to `now` instead of bursting.
    pub fn poll(&mut self, now: Instant) -> bool {
        if self.paused {
            return false;
        }
        let interval = self.rate.interval();
        let elapsed = now.saturating_duration_since(self.last_tick);
        if elapsed < interval {
            return false;
        }
        self.last_tick += interval;
        if now.saturating_duration_since(self.last_tick) >= interval {
            self.last_tick = now;
        }
        self.ticks += 1;
        true
    }

    /// Hands back a tick that could not be carried out, so the next poll retries.
    pub fn cancel_tick(&mut self) {
        if self.ticks > 0 {
            self.ticks -= 1;
            self.last_tick = self
                .last_tick
                .checked_sub(self.rate.interval())
                .unwrap_or(self.last_tick);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_ticks(clock: &mut TickClock, start: Instant, frame: Duration, total: Duration) -> u32 {
        let mut t = Duration::ZERO;
        let mut n = 0;
        while t < total {
            t += frame;
            if clock.poll(start + t) {
                n += 1;
            }
        }
        n
    }

    #[test]
    fn ten_per_second_regardless_of_frame_rate() {
        for frame_ms in [1u64, 3, 7, 16, 33, 50] {
            let start = Instant::now();
            let mut clock = TickClock::new(TickRate::new(10), start);
            let n = count_ticks(
                &mut clock,
                start,
                Duration::from_millis(frame_ms),
                Duration::from_secs(5),
            );
            assert_eq!(n, 50, "frame interval {frame_ms}ms");
        }
    }

    #[test]
    fn stall_does_not_burst() {
        let start = Instant::now();
        let mut clock = TickClock::new(TickRate::new(10), start);
        assert!(clock.poll(start + Duration::from_secs(3)));
        assert!(!clock.poll(start + Duration::from_millis(3001)));
        assert!(clock.poll(start + Duration::from_millis(3100)));
    }

    #[test]
    fn paused_clock_never_ticks_and_resumes_fresh() {
        let start = Instant::now();
        let mut clock = TickClock::new(TickRate::new(10), start);
        clock.toggle_pause(start);
        assert!(!clock.poll(start + Duration::from_secs(2)));
        clock.toggle_pause(start + Duration::from_secs(2));
        assert!(!clock.poll(start + Duration::from_millis(2050)));
        assert!(clock.poll(start + Duration::from_millis(2100)));
    }

    #[test]
    fn rate_never_reaches_zero_or_flips_sign() {
        let mut rate = TickRate::new(3);
        for _ in 0..10 {
            rate.adjust(-1);
            assert!(rate.effective() >= 1);
        }
        assert_eq!(rate.effective(), 1);
        assert!(!rate.adjust(-1));

        for _ in 0..5000 {
            rate.adjust(1);
            assert!(rate.effective() >= 1 && rate.effective() <= MAX_TICK_RATE);
        }
        assert_eq!(rate.effective(), MAX_TICK_RATE);
    }

    #[test]
    fn rate_changes_interval() {
        let mut rate = TickRate::new(10);
        assert_eq!(rate.interval(), Duration::from_millis(100));
        assert!(rate.adjust(10));
        assert_eq!(rate.interval(), Duration::from_millis(50));
        assert_eq!(rate.offset(), 10);
    }

    #[test]
    fn cancelled_tick_is_retried() {
        let start = Instant::now();
        let mut clock = TickClock::new(TickRate::new(10), start);
        let t = start + Duration::from_millis(120);
        assert!(clock.poll(t));
        clock.cancel_tick();
        assert_eq!(clock.ticks(), 0);
        assert!(clock.poll(t));
    }
}
