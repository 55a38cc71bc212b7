//! Bounded retry with failure-specific waits
//!
//! Both the API layer and the storage layer go through a
//! [`RetryController`]. Each failure is classified by [`Retryable`] and
//! handled as follows:
//!
//! | kind             | attempt counted | wait                   |
//! |------------------|-----------------|------------------------|
//! | `ConnectionLost` | yes             | none (reconnect first) |
//! | `TimedOut`       | yes             | 1 unit, no countdown   |
//! | `RateLimited`    | no              | 900 units              |
//! | `Other`          | yes             | `attempt * 2` units    |
//!
//! Once `max_attempts` attempts have failed the controller writes a single
//! "Too many attempts" warning and the operation yields `None`. Callers treat
//! that as dropped work, not as an error.

use indicatif::{ProgressBar, ProgressStyle};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use tweetsql_common::WarningSink;

/// Longest prefix of an operation label quoted in warnings.
const LABEL_LIMIT: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The connection dropped (server gone away, chunked transfer broke).
    ConnectionLost,
    TimedOut,
    /// The remote side asked us to slow down.
    RateLimited,
    Other,
}

/// Errors the controller knows how to classify.
pub trait Retryable: Display {
    fn failure_kind(&self) -> FailureKind;
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Length of one wait unit; one second in production.
    pub unit: Duration,
    pub timeout_wait_units: u64,
    pub rate_limit_wait_units: u64,
    /// `Other` failures wait `attempt * backoff_factor` units.
    pub backoff_factor: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            unit: Duration::from_secs(1),
            timeout_wait_units: 1,
            rate_limit_wait_units: 15 * 60,
            backoff_factor: 2,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_unit(mut self, unit: Duration) -> Self {
        self.unit = unit;
        self
    }

    /// How long to wait after a failure of `kind` on attempt `attempt`.
    pub fn wait_for(&self, kind: FailureKind, attempt: u32) -> Duration {
        let units = match kind {
            FailureKind::ConnectionLost => 0,
            FailureKind::TimedOut => self.timeout_wait_units,
            FailureKind::RateLimited => self.rate_limit_wait_units,
            FailureKind::Other => u64::from(attempt) * self.backoff_factor,
        };
        self.unit.saturating_mul(u32::try_from(units).unwrap_or(u32::MAX))
    }
}

/// Progress of one logical operation; dropped on success or give-up.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryState {
    pub attempts: u32,
    pub last_error: Option<String>,
    pub last_wait: Duration,
}

impl RetryState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Blocking wait used between attempts.
pub trait Sleeper: Send + Sync {
    /// `verbose` waits show a countdown.
    fn sleep(&self, duration: Duration, verbose: bool);
}

/// Sleeps the current thread, with an optional countdown on the terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

fn format_remaining(secs: u64) -> String {
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration, verbose: bool) {
        let whole_secs = duration.as_secs();
        if !verbose || whole_secs == 0 {
            std::thread::sleep(duration);
            return;
        }

        let countdown = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            countdown.set_style(style);
        }
        for elapsed in 0..whole_secs {
            countdown.set_message(format!(
                "Done waiting in: {}",
                format_remaining(whole_secs - elapsed)
            ));
            countdown.tick();
            std::thread::sleep(Duration::from_secs(1));
        }
        std::thread::sleep(duration - Duration::from_secs(whole_secs));
        countdown.finish_and_clear();
    }
}

fn truncate(label: &str) -> String {
    label.chars().take(LABEL_LIMIT).collect()
}

#[derive(Clone)]
pub struct RetryController {
    policy: RetryPolicy,
    warnings: WarningSink,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RetryController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryController")
            .field("policy", &self.policy)
            .field("warnings", &self.warnings)
            .finish()
    }
}

impl RetryController {
    pub fn new(policy: RetryPolicy, warnings: WarningSink) -> Self {
        Self {
            policy,
            warnings,
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn warnings(&self) -> &WarningSink {
        &self.warnings
    }

    /// Write one line to the warning sink.
    pub fn warn(&self, message: impl Display) {
        self.warnings.warn(message);
    }

    pub fn exhausted(&self, state: &RetryState) -> bool {
        state.attempts >= self.policy.max_attempts
    }

    /// Account for a failed attempt: update `state`, warn, and wait.
    ///
    /// Timeouts are only logged at debug level.
    pub fn record_failure<E: Retryable + ?Sized>(&self, state: &mut RetryState, err: &E) {
        let kind = err.failure_kind();
        if kind != FailureKind::RateLimited {
            state.attempts += 1;
        }
        state.last_error = Some(err.to_string());
        state.last_wait = self.policy.wait_for(kind, state.attempts);

        match kind {
            FailureKind::RateLimited => {
                self.warn(format!(
                    "Rate limit exceeded, waiting {}s before a restart [{}]",
                    state.last_wait.as_secs(),
                    err
                ));
            },
            FailureKind::TimedOut => {
                debug!(attempt = state.attempts, "Time out encountered, retrying");
            },
            FailureKind::ConnectionLost => {
                self.warn(format!(
                    "{}, reconnecting immediately [Attempt: {}]",
                    err, state.attempts
                ));
            },
            FailureKind::Other => {
                self.warn(format!(
                    "{} [Attempt: {}], waiting {}s",
                    err,
                    state.attempts,
                    state.last_wait.as_secs()
                ));
            },
        }

        if !state.last_wait.is_zero() {
            self.sleeper.sleep(state.last_wait, kind != FailureKind::TimedOut);
        }
    }

    /// Wait the long rate-limit interval without touching any attempt counter.
    pub fn wait_rate_limited(&self, reason: impl Display) {
        let wait = self.policy.wait_for(FailureKind::RateLimited, 0);
        self.warn(format!(
            "Rate limit exceeded, waiting {}s before a restart [{}]",
            wait.as_secs(),
            reason
        ));
        self.sleeper.sleep(wait, true);
    }

    /// Blocking pause through the configured sleeper.
    pub fn pause(&self, duration: Duration, verbose: bool) {
        self.sleeper.sleep(duration, verbose);
    }

    /// Emit the single give-up warning for `label`.
    pub fn give_up(&self, state: &RetryState, label: &str) {
        self.warn(format!(
            "Too many attempts ({}), moving on from this [{}]",
            state.attempts,
            truncate(label)
        ));
    }

    /// Run `op` against `target` until it succeeds or the attempt budget is spent.
    ///
    /// On `ConnectionLost`, `reconnect` runs on `target` before the next attempt. Returns
    /// `None` after emitting exactly one give-up warning.
    pub fn run<C, T, E, Op, Re>(
        &self,
        label: &str,
        target: &mut C,
        mut op: Op,
        mut reconnect: Re,
    ) -> Option<T>
    where
        C: ?Sized,
        E: Retryable,
        Op: FnMut(&mut C) -> Result<T, E>,
        Re: FnMut(&mut C) -> Result<(), E>,
    {
        let mut state = RetryState::default();

        loop {
            if self.exhausted(&state) {
                self.give_up(&state, label);
                return None;
            }

            match op(target) {
                Ok(value) => return Some(value),
                Err(err) => {
                    if err.failure_kind() == FailureKind::ConnectionLost {
                        debug!(operation = %truncate(label), "Connection lost, reconnecting");
                        if let Err(reconnect_err) = reconnect(target) {
                            self.warn(format!("Reconnect failed: {}", reconnect_err));
                        }
                    }
                    self.record_failure(&mut state, &err);
                },
            }
        }
    }
}
