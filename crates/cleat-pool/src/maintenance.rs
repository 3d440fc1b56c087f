//! Fixed-rate background task

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// A periodically executed background task.
///
/// Runs `task` once per `period` after an initial delay, on its own tokio
/// task. Cancelling (or dropping the handle) stops the schedule; a run
/// already in progress is interrupted at its next await point.
pub struct PeriodicTask {
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawn a fixed-rate task. `period` must be non-zero.
    pub fn spawn<F, Fut>(initial_delay: Duration, period: Duration, mut task: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let handle = tokio::spawn(async move {
            if !initial_delay.is_zero() {
                tokio::time::sleep(initial_delay).await;
            }
            let mut ticks = tokio::time::interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                // The first tick completes immediately
                ticks.tick().await;
                task().await;
            }
        });
        Self { handle }
    }

    /// Stop the schedule
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
