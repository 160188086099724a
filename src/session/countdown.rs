use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::core::time::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownState {
    Running,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownTick {
    Running(u64),
    /// Reported exactly once, on the tick that reaches zero.
    Expired,
    /// Ticks after expiry.
    Stopped,
}

/// Exam-wide countdown in whole seconds. `Running -> Expired` only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Countdown {
    remaining: u64,
    state: CountdownState,
}

impl Countdown {
    pub fn new(total_seconds: u64) -> Self {
        let state =
            if total_seconds == 0 { CountdownState::Expired } else { CountdownState::Running };
        Self { remaining: total_seconds, state }
    }

    pub fn from_minutes(exam_minutes: u32) -> Self {
        Self::new(u64::from(exam_minutes) * 60)
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn state(&self) -> CountdownState {
        self.state
    }

    pub fn tick(&mut self) -> CountdownTick {
        if self.state == CountdownState::Expired {
            return CountdownTick::Stopped;
        }

        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.state = CountdownState::Expired;
            CountdownTick::Expired
        } else {
            CountdownTick::Running(self.remaining)
        }
    }

    /// Ticks until at most `target` seconds remain. `Expired` is reported if
    /// zero is reached on the way, `Running` with the new value otherwise.
    pub fn catch_up(&mut self, target: u64) -> CountdownTick {
        if self.state == CountdownState::Expired {
            return CountdownTick::Stopped;
        }
        let mut last = CountdownTick::Running(self.remaining);
        while self.remaining > target {
            last = self.tick();
            if last == CountdownTick::Expired {
                break;
            }
        }
        last
    }
}

/// Polls `clock` once per `period` and moves `countdown` to the whole seconds
/// left since the task started, publishing the remaining seconds.
///
/// `period` only sets how often the clock is read. `on_expiry` runs in the same
/// step that ends the loop. Shutdown (a `true` or a dropped sender) stops the
/// loop without calling it.
pub fn spawn_countdown<F>(
    mut countdown: Countdown,
    clock: Arc<dyn Clock>,
    period: Duration,
    remaining_tx: watch::Sender<u64>,
    mut shutdown: watch::Receiver<bool>,
    on_expiry: F,
) -> JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    tokio::spawn(async move {
        remaining_tx.send_replace(countdown.remaining());
        if countdown.state() == CountdownState::Expired {
            on_expiry();
            return;
        }

        let total = countdown.remaining();
        let started = clock.now();
        let mut tick = interval_at(Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::debug!(
                            remaining_seconds = countdown.remaining(),
                            "Countdown torn down"
                        );
                        return;
                    }
                }
                _ = tick.tick() => {
                    let elapsed = clock.now().saturating_duration_since(started).as_secs();
                    match countdown.catch_up(total.saturating_sub(elapsed)) {
                        CountdownTick::Running(remaining) => {
                            remaining_tx.send_replace(remaining);
                        }
                        CountdownTick::Expired => {
                            remaining_tx.send_replace(0);
                            tracing::info!("Exam time expired");
                            on_expiry();
                            return;
                        }
                        CountdownTick::Stopped => return,
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::watch;

    use super::*;
    use crate::core::time::{ManualClock, SystemClock};
    use crate::test_support::settle;

    #[test]
    fn one_minute_expires_on_the_sixtieth_tick() {
        let mut countdown = Countdown::from_minutes(1);
        for expected in (1..60).rev() {
            assert_eq!(countdown.tick(), CountdownTick::Running(expected));
        }
        assert_eq!(countdown.tick(), CountdownTick::Expired);
        assert_eq!(countdown.state(), CountdownState::Expired);
        assert_eq!(countdown.tick(), CountdownTick::Stopped);
        assert_eq!(countdown.remaining(), 0);
    }

    #[test]
    fn zero_duration_starts_expired() {
        let mut countdown = Countdown::new(0);
        assert_eq!(countdown.state(), CountdownState::Expired);
        assert_eq!(countdown.tick(), CountdownTick::Stopped);
    }

    #[test]
    fn catch_up_jumps_to_target_and_reports_expiry_once() {
        let mut countdown = Countdown::new(10);
        assert_eq!(countdown.catch_up(12), CountdownTick::Running(10));
        assert_eq!(countdown.catch_up(7), CountdownTick::Running(7));
        assert_eq!(countdown.catch_up(0), CountdownTick::Expired);
        assert_eq!(countdown.remaining(), 0);
        assert_eq!(countdown.catch_up(0), CountdownTick::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn driver_reads_remaining_time_from_its_clock() {
        let clock = ManualClock::new();
        let expiries = Arc::new(AtomicUsize::new(0));
        let (remaining_tx, mut remaining_rx) = watch::channel(0);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let counter = expiries.clone();
        let handle = spawn_countdown(
            Countdown::new(30),
            Arc::new(clock.clone()),
            Duration::from_millis(500),
            remaining_tx,
            shutdown_rx,
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );
        settle().await;

        // The poll period alone does not move the countdown.
        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(*remaining_rx.borrow_and_update(), 30);

        clock.advance_secs(12);
        tokio::time::advance(Duration::from_millis(500)).await;
        settle().await;
        assert_eq!(*remaining_rx.borrow_and_update(), 18);

        clock.advance_secs(40);
        tokio::time::advance(Duration::from_millis(500)).await;
        settle().await;
        assert_eq!(*remaining_rx.borrow(), 0);
        assert_eq!(expiries.load(Ordering::SeqCst), 1);
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn driver_calls_expiry_once_and_stops_ticking() {
        let expiries = Arc::new(AtomicUsize::new(0));
        let (remaining_tx, mut remaining_rx) = watch::channel(0);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let counter = expiries.clone();
        let handle = spawn_countdown(
            Countdown::from_minutes(1),
            Arc::new(SystemClock),
            Duration::from_secs(1),
            remaining_tx,
            shutdown_rx,
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );
        settle().await;
        assert_eq!(*remaining_rx.borrow_and_update(), 60);

        for expected in (1..60).rev() {
            tokio::time::advance(Duration::from_secs(1)).await;
            settle().await;
            assert_eq!(*remaining_rx.borrow_and_update(), expected);
        }
        assert_eq!(expiries.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(expiries.load(Ordering::SeqCst), 1);
        assert!(handle.is_finished());

        tokio::time::advance(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(expiries.load(Ordering::SeqCst), 1);
        assert_eq!(*remaining_rx.borrow(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_tears_down_without_expiry() {
        let expiries = Arc::new(AtomicUsize::new(0));
        let (remaining_tx, remaining_rx) = watch::channel(0);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let counter = expiries.clone();
        let handle = spawn_countdown(
            Countdown::new(5),
            Arc::new(SystemClock),
            Duration::from_secs(1),
            remaining_tx,
            shutdown_rx,
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );
        settle().await;

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        shutdown_tx.send_replace(true);
        handle.await.expect("countdown task");

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(expiries.load(Ordering::SeqCst), 0);
        assert_eq!(*remaining_rx.borrow(), 3);
    }
}
