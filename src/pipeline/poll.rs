//! Poll-with-deadline: the single waiting primitive of the pipeline.
//!
//! Every wait in the navigator is "check, sleep a fixed interval, check
//! again, give up at a ceiling". [`poll_until`] expresses that once and
//! returns an explicit [`PollOutcome`] instead of signalling through errors,
//! so each call site decides whether a timeout is recoverable, item-fatal or
//! loop-fatal.

use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// How often and how long to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub interval: Duration,
    /// Stop after this many checks, whichever of `max_attempts`/`deadline` comes first.
    pub max_attempts: u32,
    /// Wall-clock ceiling. `None` means only the attempt budget counts, so a
    /// slow check never eats into the number of tries.
    pub deadline: Option<Duration>,
}

impl PollSchedule {
    /// Poll at `interval` until `deadline` has elapsed.
    pub fn with_deadline(interval: Duration, deadline: Duration) -> Self {
        let attempts = if interval.is_zero() {
            u32::MAX
        } else {
            (deadline.as_millis() / interval.as_millis().max(1)) as u32 + 1
        };
        Self {
            interval,
            max_attempts: attempts.max(1),
            deadline: Some(deadline),
        }
    }

    /// Poll at `interval` for at most `attempts` checks.
    pub fn with_attempts(interval: Duration, attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: attempts.max(1),
            deadline: None,
        }
    }
}

/// Result of [`poll_until`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    TimedOut { attempts: u32, elapsed: Duration },
}

impl<T> PollOutcome<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, PollOutcome::Ready(_))
    }

    pub fn ready(self) -> Option<T> {
        match self {
            PollOutcome::Ready(v) => Some(v),
            PollOutcome::TimedOut { .. } => None,
        }
    }
}

/// Run `check` until it yields `Some`, the attempt budget is spent, or the
/// deadline passes. The first check runs immediately.
pub async fn poll_until<T, F, Fut>(schedule: PollSchedule, mut check: F) -> PollOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let start = Instant::now();
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        if let Some(value) = check().await {
            return PollOutcome::Ready(value);
        }
        let past_deadline = schedule
            .deadline
            .is_some_and(|deadline| start.elapsed() + schedule.interval > deadline);
        if attempts >= schedule.max_attempts || past_deadline {
            return PollOutcome::TimedOut {
                attempts,
                elapsed: start.elapsed(),
            };
        }
        sleep(schedule.interval).await;
    }
}
