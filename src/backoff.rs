//! Jittered exponential backoff.
//!
//! Subscription creation is retried with exponential backoff: bounded
//! interval, unbounded attempts, cancelable via the token. The retry loop is
//! an explicit state machine so cancellation leaves no thread behind.

use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::ctx::CancelToken;
use crate::error::{KpmError, KpmResult, StreamError};

/// Default initial retry interval.
pub const BACKOFF_INTERVAL: Duration = Duration::from_millis(10);

/// Default cap on the retry interval.
pub const MAX_BACKOFF_TIME: Duration = Duration::from_secs(5);

const MULTIPLIER: f64 = 1.5;
const JITTER: f64 = 0.5;

/// Exponential backoff schedule with randomized jitter.
#[derive(Debug, Clone)]
pub struct ExpBackoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Default for ExpBackoff {
    fn default() -> Self {
        Self::new(BACKOFF_INTERVAL, MAX_BACKOFF_TIME)
    }
}

impl ExpBackoff {
    /// Creates a schedule starting at `initial`, capped at `max`.
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.max(Duration::from_millis(1));
        Self {
            initial,
            max: max.max(initial),
            current: initial,
        }
    }

    /// Returns the next delay (jittered) and advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = Duration::from_secs_f64((self.current.as_secs_f64() * MULTIPLIER).min(self.max.as_secs_f64()));

        let jitter = rand::thread_rng().gen_range(-JITTER..=JITTER);
        let delayed = base.as_secs_f64() * (1.0 + jitter);
        Duration::from_secs_f64(delayed.max(0.001))
    }

    /// Resets the schedule back to the initial interval.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Retries `op` until it succeeds or `ctx` is canceled.
///
/// Attempts are unbounded; `notify` is invoked with each failure and the
/// delay that will be slept before the next attempt.
pub fn retry_notify<T, F, N>(
    ctx: &CancelToken,
    mut backoff: ExpBackoff,
    mut op: F,
    mut notify: N,
) -> KpmResult<T>
where
    F: FnMut() -> KpmResult<T>,
    N: FnMut(&KpmError, Duration),
{
    loop {
        if ctx.is_canceled() {
            return Err(StreamError::Canceled.into());
        }
        match op() {
            Ok(value) => return Ok(value),
            Err(err) => {
                let delay = backoff.next_delay();
                notify(&err, delay);
                debug!(target: "backoff", error = %err, delay_ms = delay.as_millis() as u64, "retrying after failure");
                if !ctx.sleep(delay) {
                    return Err(StreamError::Canceled.into());
                }
            }
        }
    }
}
