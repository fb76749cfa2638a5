//! Bounded polling loop.
//!
//! # State Transition Diagram
//!
//! ```text
//!            ┌──── Continue, time left ────┐
//!            ▼                             │
//! (start) ─ step(cond) ──→ Retry ─ (busy work or backoff sleep)
//!            │
//!            ├─ Reached ─────────────→ Done(Reached)
//!            ├─ Aborted ─────────────→ Done(Aborted)
//!            └─ Continue, no time ───→ Done(TimedOut)
//! ```
//!
//! The caller evaluates its own condition and feeds the result to
//! [`WaitLoop::step`]. A zero timeout yields exactly one evaluation.

use std::time::Duration;

use cairn_core::BackoffPolicy;
use tokio::time::Instant;

use crate::busy::BusyQueue;

const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Result of one evaluation of the caller's condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// The awaited state holds
    Reached,
    /// Not yet; try again
    Continue,
    /// A hard failure; stop now
    Aborted,
}

/// How a wait loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Reached,
    Aborted,
    TimedOut,
}

/// What the caller should do after [`WaitLoop::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Evaluate the condition again
    Retry,
    Done(WaitOutcome),
}

/// Polling state: deadline, attempt count and backoff.
#[derive(Debug)]
pub struct WaitLoop<'a> {
    deadline: Instant,
    attempt: u32,
    backoff: BackoffPolicy,
    busy: Option<&'a BusyQueue>,
}

impl<'a> WaitLoop<'a> {
    /// Start a loop that gives up `timeout` from now.
    ///
    /// A timeout too large to represent waits for about thirty years.
    pub fn new(timeout: Duration, backoff: BackoffPolicy) -> Self {
        let now = Instant::now();
        Self {
            deadline: now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE),
            attempt: 0,
            backoff,
            busy: None,
        }
    }

    /// Run pending busy callbacks instead of sleeping.
    pub fn with_busy_queue(mut self, busy: &'a BusyQueue) -> Self {
        self.busy = Some(busy);
        self
    }

    /// Number of retries granted so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Advance the loop with the latest condition.
    pub async fn step(&mut self, condition: Condition) -> Step {
        match condition {
            Condition::Reached => return Step::Done(WaitOutcome::Reached),
            Condition::Aborted => return Step::Done(WaitOutcome::Aborted),
            Condition::Continue => {}
        }

        let now = Instant::now();
        if now >= self.deadline {
            return Step::Done(WaitOutcome::TimedOut);
        }

        let ran_busy_work = self.busy.is_some_and(|busy| busy.run_one());
        if !ran_busy_work {
            let delay = self.backoff.delay(self.attempt).min(self.deadline - now);
            tokio::time::sleep(delay).await;
        }
        self.attempt += 1;
        Step::Retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_reached_and_aborted_finish_immediately() {
        let mut wait = WaitLoop::new(Duration::from_secs(1), BackoffPolicy::default());
        assert_eq!(wait.step(Condition::Reached).await, Step::Done(WaitOutcome::Reached));
        let mut wait = WaitLoop::new(Duration::from_secs(1), BackoffPolicy::default());
        assert_eq!(wait.step(Condition::Aborted).await, Step::Done(WaitOutcome::Aborted));
    }

    #[tokio::test]
    async fn test_zero_timeout_is_single_attempt() {
        let mut wait = WaitLoop::new(Duration::ZERO, BackoffPolicy::default());
        assert_eq!(
            wait.step(Condition::Continue).await,
            Step::Done(WaitOutcome::TimedOut)
        );
        assert_eq!(wait.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_deadline() {
        let start = Instant::now();
        let mut wait = WaitLoop::new(Duration::from_millis(100), BackoffPolicy::default());
        let outcome = loop {
            match wait.step(Condition::Continue).await {
                Step::Retry => continue,
                Step::Done(outcome) => break outcome,
            }
        };
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(100));
        // 10 + 20 + 40 ms, then the remaining 30 ms.
        assert_eq!(wait.attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_timeout_keeps_polling() {
        let mut wait = WaitLoop::new(Duration::MAX, BackoffPolicy::default());
        for _ in 0..5 {
            assert_eq!(wait.step(Condition::Continue).await, Step::Retry);
        }
        assert_eq!(wait.step(Condition::Reached).await, Step::Done(WaitOutcome::Reached));
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_work_replaces_sleep() {
        let busy = BusyQueue::new();
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let ran = Arc::clone(&ran);
            busy.push(Box::new(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            }));
        }

        let start = Instant::now();
        let mut wait =
            WaitLoop::new(Duration::from_secs(1), BackoffPolicy::default()).with_busy_queue(&busy);
        assert_eq!(wait.step(Condition::Continue).await, Step::Retry);
        assert_eq!(wait.step(Condition::Continue).await, Step::Retry);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(ran.load(Ordering::SeqCst), 2);

        assert_eq!(wait.step(Condition::Continue).await, Step::Retry);
        assert!(start.elapsed() > Duration::ZERO);
        assert_eq!(wait.step(Condition::Reached).await, Step::Done(WaitOutcome::Reached));
    }
}
