//! Offset-then-periodic tick source for scrapers

use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior};

const MIN_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug)]
enum TickerState {
    Offset,
    Periodic(Interval),
}

/// Fires once after `offset`, then every `period` after that first tick.
///
/// Ticks missed while the caller was busy are skipped rather than replayed,
/// so a slow scrape never causes a burst of back-to-back scrapes.
#[derive(Debug)]
pub struct OffsetTicker {
    offset: Duration,
    period: Duration,
    state: TickerState,
}

impl OffsetTicker {
    pub fn new(offset: Duration, period: Duration) -> Self {
        Self {
            offset,
            period: period.max(MIN_PERIOD),
            state: TickerState::Offset,
        }
    }

    /// Wait for the next tick. Dropping the returned future before it
    /// completes leaves the ticker where it was.
    pub async fn tick(&mut self) -> Instant {
        match &mut self.state {
            TickerState::Offset => {
                sleep(self.offset).await;
                let now = Instant::now();
                let mut interval = interval_at(now + self.period, self.period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                self.state = TickerState::Periodic(interval);
                now
            }
            TickerState::Periodic(interval) => interval.tick().await,
        }
    }
}

/// Resolves once a stop has been requested. A dropped sender counts as a
/// stop request too.
pub async fn stopped(stop: &mut broadcast::Receiver<()>) {
    // Any outcome (message, lag or closed channel) means stop.
    let _ = stop.recv().await;
}
