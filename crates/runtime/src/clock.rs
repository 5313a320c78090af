//! Pluggable clock the frontend-handoff poll runs against. Tests drive
//! ticks synchronously with [`ManualClock`]; the CLI binary drives them
//! with [`RealClock`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

/// One unit of waiting for the frontend to catch up. `RealClock` sleeps;
/// `ManualClock` just counts how many times it was asked, so a test can
/// assert a poll loop terminated in a bounded number of iterations.
#[async_trait]
pub trait ClockSource: Send + Sync {
    async fn tick(&self, interval: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

#[async_trait]
impl ClockSource for RealClock {
    async fn tick(&self, interval: Duration) {
        tokio::time::sleep(interval).await;
    }
}

/// Never actually sleeps; counts ticks so synchronous tests can bound a
/// poll loop instead of waiting on wall-clock time.
#[derive(Debug, Default)]
pub struct ManualClock {
    ticks: AtomicUsize,
}

impl ManualClock {
    pub fn ticks(&self) -> usize {
        self.ticks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClockSource for ManualClock {
    async fn tick(&self, _interval: Duration) {
        self.ticks.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
    }
}
