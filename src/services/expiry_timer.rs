//! Tick-based countdown for an open attempt view.
//!
//! Library seam for client drivers (a kiosk or desktop shell embedding the
//! engine). The HTTP service never runs it; server-side expiry is the
//! sweeper plus the lazy close in `AttemptOrchestrator::start`.

use std::future::Future;
use std::sync::Arc;

use time::{Duration, PrimitiveDateTime};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::core::time::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerTick {
    /// The attempt has no time limit.
    Unlimited,
    Remaining(Duration),
    /// Deadline reached on this tick; reported exactly once.
    Fire,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerState {
    Running,
    Fired,
    Cancelled,
}

/// Countdown for one open attempt view. Advisory only: the server re-checks every deadline.
#[derive(Debug)]
pub(crate) struct ExpiryTimer {
    expires_at: Option<PrimitiveDateTime>,
    state: TimerState,
}

impl ExpiryTimer {
    pub(crate) fn new(expires_at: Option<PrimitiveDateTime>) -> Self {
        Self { expires_at, state: TimerState::Running }
    }

    pub(crate) fn tick(&mut self, now: PrimitiveDateTime) -> TimerTick {
        if self.state != TimerState::Running {
            return TimerTick::Stopped;
        }

        match self.expires_at {
            None => TimerTick::Unlimited,
            Some(expires_at) if now >= expires_at => {
                self.state = TimerState::Fired;
                TimerTick::Fire
            }
            Some(expires_at) => TimerTick::Remaining(expires_at - now),
        }
    }

    /// Returns `false` if the timer had already fired.
    pub(crate) fn cancel(&mut self) -> bool {
        match self.state {
            TimerState::Running => {
                self.state = TimerState::Cancelled;
                true
            }
            TimerState::Cancelled => true,
            TimerState::Fired => false,
        }
    }

    pub(crate) fn has_fired(&self) -> bool {
        self.state == TimerState::Fired
    }

    pub(crate) fn remaining(&self, now: PrimitiveDateTime) -> Option<Duration> {
        self.expires_at.map(|expires_at| (expires_at - now).max(Duration::ZERO))
    }
}

/// Handle to a spawned countdown loop.
pub(crate) struct TimerDriver<T> {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<Option<T>>,
}

impl<T: Send + 'static> TimerDriver<T> {
    /// Ticks `timer` every `period`; on `Fire` runs `on_fire` once and exits.
    pub(crate) fn spawn<F, Fut>(
        timer: Arc<Mutex<ExpiryTimer>>,
        clock: Arc<dyn Clock>,
        period: std::time::Duration,
        on_fire: F,
    ) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (cancel, mut cancelled) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = cancelled.changed() => return None,
                    _ = ticker.tick() => {
                        let tick = timer.lock().await.tick(clock.now());
                        match tick {
                            TimerTick::Fire => return Some(on_fire().await),
                            TimerTick::Stopped | TimerTick::Unlimited => return None,
                            TimerTick::Remaining(_) => {}
                        }
                    }
                }
            }
        });
        Self { cancel, handle }
    }

    pub(crate) fn stop(&self) {
        let _ = self.cancel.send(true);
    }

    /// Waits for the loop to end; `Some` carries the expiry submission's result.
    pub(crate) async fn join(self) -> Option<T> {
        match self.handle.await {
            Ok(result) => result,
            Err(err) => {
                tracing::error!(error = %err, "Expiry timer task failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::test_support::ManualClock;

    #[test]
    fn countdown_fires_once_then_stops() {
        let clock = ManualClock::default();
        let mut timer = ExpiryTimer::new(Some(clock.now() + Duration::minutes(1)));

        assert_eq!(timer.tick(clock.now()), TimerTick::Remaining(Duration::minutes(1)));
        clock.advance(Duration::seconds(61));
        assert_eq!(timer.tick(clock.now()), TimerTick::Fire);
        assert_eq!(timer.tick(clock.now()), TimerTick::Stopped);
        assert!(timer.has_fired());
        assert!(!timer.cancel());
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let clock = ManualClock::default();
        let mut timer = ExpiryTimer::new(Some(clock.now() + Duration::seconds(5)));
        assert!(timer.cancel());
        clock.advance(Duration::minutes(5));
        assert_eq!(timer.tick(clock.now()), TimerTick::Stopped);
        assert_eq!(timer.remaining(clock.now()), Some(Duration::ZERO));
    }

    #[test]
    fn untimed_attempts_report_unlimited() {
        let clock = ManualClock::default();
        let mut timer = ExpiryTimer::new(None);
        assert_eq!(timer.tick(clock.now()), TimerTick::Unlimited);
        assert_eq!(timer.remaining(clock.now()), None);
    }

    #[tokio::test]
    async fn driver_runs_the_callback_exactly_once() {
        let clock = Arc::new(ManualClock::default());
        let timer = Arc::new(Mutex::new(ExpiryTimer::new(Some(clock.now() + Duration::seconds(1)))));
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let driver = TimerDriver::spawn(
            timer.clone(),
            clock.clone(),
            std::time::Duration::from_millis(5),
            move || async move { counter.fetch_add(1, Ordering::SeqCst) },
        );

        clock.advance(Duration::seconds(2));
        assert_eq!(driver.join().await, Some(0));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(timer.lock().await.has_fired());
    }

    #[tokio::test]
    async fn stopped_driver_does_not_fire() {
        let clock = Arc::new(ManualClock::default());
        let timer = Arc::new(Mutex::new(ExpiryTimer::new(Some(clock.now() + Duration::hours(1)))));
        let driver = TimerDriver::spawn(
            timer,
            clock,
            std::time::Duration::from_millis(5),
            || async { "fired" },
        );

        driver.stop();
        assert_eq!(driver.join().await, None);
    }
}
