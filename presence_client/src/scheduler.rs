//! Periodic tick sources.
//!
//! Every timer in the client is a [`Ticker`]: the local avatar timer, the
//! render tick, the expiry sweep. A ticker has at most one live run.
//! `start` always cancels the previous run first, and `cancel` is
//! idempotent, so no timer can leak or run twice.

use std::time::Duration;

use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::trace;

/// Identifies one run of a ticker. A restarted ticker hands out a new token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TickToken(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub token: TickToken,
    /// Time since the previous tick of this run, or since `start`.
    pub elapsed: Duration,
}

#[derive(Debug)]
struct Run {
    token: TickToken,
    interval: Interval,
    last: Instant,
}

#[derive(Debug)]
pub struct Ticker {
    name: &'static str,
    period: Duration,
    generation: u64,
    run: Option<Run>,
}

impl Ticker {
    pub fn new(name: &'static str, period: Duration) -> Self {
        Self {
            name,
            period: period.max(Duration::from_millis(1)),
            generation: 0,
            run: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Starts a fresh run, cancelling the current one if any. The first
    /// tick fires one period from now.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start(&mut self) -> TickToken {
        if self.cancel() {
            trace!(ticker = self.name, "Restarting ticker");
        }
        self.generation += 1;
        let token = TickToken(self.generation);
        let now = Instant::now();
        let mut interval = time::interval_at(now + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.run = Some(Run {
            token,
            interval,
            last: now,
        });
        token
    }

    /// Stops the current run. Returns whether one was running.
    pub fn cancel(&mut self) -> bool {
        self.run.take().is_some()
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    pub fn token(&self) -> Option<TickToken> {
        self.run.as_ref().map(|r| r.token)
    }

    /// Waits for the next tick of the current run. Never resolves while
    /// stopped, so it can sit in a `select!` unconditionally.
    pub async fn tick(&mut self) -> Tick {
        match self.run.as_mut() {
            Some(run) => {
                run.interval.tick().await;
                let now = Instant::now();
                let elapsed = now.saturating_duration_since(run.last);
                run.last = now;
                Tick {
                    token: run.token,
                    elapsed,
                }
            }
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticks_once_per_period() {
        let mut ticker = Ticker::new("test", Duration::from_millis(16));
        let token = ticker.start();
        let tick = ticker.tick().await;
        assert_eq!(tick.token, token);
        assert_eq!(tick.elapsed, Duration::from_millis(16));
        let tick = ticker.tick().await;
        assert_eq!(tick.elapsed, Duration::from_millis(16));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_previous_run() {
        let mut ticker = Ticker::new("test", Duration::from_millis(10));
        let first = ticker.start();
        let second = ticker.start();
        assert_ne!(first, second);
        assert_eq!(ticker.token(), Some(second));
        assert_eq!(ticker.tick().await.token, second);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_ticker_never_fires() {
        let mut ticker = Ticker::new("test", Duration::from_millis(10));
        ticker.start();
        assert!(ticker.cancel());
        assert!(!ticker.cancel());
        assert!(!ticker.is_running());
        let waited = time::timeout(Duration::from_secs(1), ticker.tick()).await;
        assert!(waited.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_reflects_late_polling() {
        let mut ticker = Ticker::new("test", Duration::from_millis(10));
        ticker.start();
        time::sleep(Duration::from_millis(35)).await;
        let tick = ticker.tick().await;
        assert_eq!(tick.elapsed, Duration::from_millis(35));
    }
}
