//! Condition poller
//!
//! The single place the harness waits for an external system to converge:
//! sample, evaluate a predicate against a baseline, sleep, repeat, until
//! the predicate holds, the timeout passes, or the caller cancels.
//!
//! Time and sampling are both injected. The poller reads time only from a
//! [`Clock`] and observes only through the `sample` closure, so a
//! [`ManualClock`](crate::device::ManualClock) plus a scripted sampler makes
//! every wait deterministic.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::common::config::PollerConfig;
use crate::common::{Error, Result};
use crate::device::Clock;
use crate::journey::StepOutcome;
use crate::snapshot::Snapshot;

/// Pure check over `(baseline, candidate, elapsed_ms)`
pub type Predicate<T> = Arc<dyn Fn(&T, &T, u64) -> bool + Send + Sync>;

/// Wrap a closure as a [`Predicate`]
pub fn predicate<T, F>(f: F) -> Predicate<T>
where
    F: Fn(&T, &T, u64) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

/// What a wait is looking for, used for logs and reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitKind {
    StateChange,
    ElementPresent,
    ElementAbsent,
    Text,
    LogEvent,
    Custom,
}

impl fmt::Display for WaitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StateChange => write!(f, "state change"),
            Self::ElementPresent => write!(f, "element present"),
            Self::ElementAbsent => write!(f, "element absent"),
            Self::Text => write!(f, "text"),
            Self::LogEvent => write!(f, "log event"),
            Self::Custom => write!(f, "custom"),
        }
    }
}

/// Describes one wait
///
/// `critical` decides how a timeout is reported: a critical timeout fails
/// the step, a soft one is a warning and the journey continues.
#[derive(Clone)]
pub struct WaitSpec<T = Snapshot> {
    pub kind: WaitKind,
    pub description: String,
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub critical: bool,
    /// Samples retained for timeout diagnostics; `None` keeps every sample
    pub history_limit: Option<usize>,
    pub predicate: Predicate<T>,
}

impl<T> WaitSpec<T> {
    /// New critical wait with a 10 s timeout polled every second
    pub fn new(kind: WaitKind, description: impl Into<String>, predicate: Predicate<T>) -> Self {
        Self {
            kind,
            description: description.into(),
            timeout: Duration::from_millis(10_000),
            poll_interval: Duration::from_millis(1_000),
            critical: true,
            history_limit: None,
            predicate,
        }
    }

    /// Take timeout, interval and history limit from configuration
    pub fn with_defaults(mut self, config: &PollerConfig) -> Self {
        self.timeout = Duration::from_millis(config.timeout_ms);
        self.poll_interval = Duration::from_millis(config.poll_interval_ms);
        self.history_limit = config.history_limit;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    /// Mark the wait soft: a timeout only warns
    pub fn soft(self) -> Self {
        self.critical(false)
    }

    pub fn history_limit(mut self, limit: usize) -> Self {
        self.history_limit = Some(limit);
        self
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    pub fn poll_interval_ms(&self) -> u64 {
        self.poll_interval.as_millis() as u64
    }

    /// Reject specs that would spin or never sample twice
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(Error::invalid_wait_spec(
                &self.description,
                "poll interval must be greater than zero",
            ));
        }
        if self.timeout < self.poll_interval {
            return Err(Error::invalid_wait_spec(
                &self.description,
                format!(
                    "timeout ({} ms) must be at least the poll interval ({} ms)",
                    self.timeout_ms(),
                    self.poll_interval_ms()
                ),
            ));
        }
        if self.history_limit == Some(0) {
            return Err(Error::invalid_wait_spec(
                &self.description,
                "history limit must be at least 1",
            ));
        }
        Ok(())
    }
}

impl<T> fmt::Debug for WaitSpec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitSpec")
            .field("kind", &self.kind)
            .field("description", &self.description)
            .field("timeout_ms", &self.timeout_ms())
            .field("poll_interval_ms", &self.poll_interval_ms())
            .field("critical", &self.critical)
            .field("history_limit", &self.history_limit)
            .finish_non_exhaustive()
    }
}

/// How a wait ended
#[derive(Debug, Clone)]
pub enum Outcome<T = Snapshot> {
    /// The predicate held for `value`
    Reached {
        value: T,
        elapsed_ms: u64,
        samples: usize,
    },
    /// The timeout passed first
    TimedOut {
        /// Most recent successful sample, if any sample succeeded
        last: Option<T>,
        /// Retained samples, oldest first
        history: Vec<T>,
        elapsed_ms: u64,
        /// Samples that failed to observe anything
        failed_samples: usize,
        last_error: Option<String>,
    },
    /// The caller cancelled the wait
    Cancelled { elapsed_ms: u64 },
}

impl<T> Outcome<T> {
    pub fn is_reached(&self) -> bool {
        matches!(self, Self::Reached { .. })
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub fn elapsed_ms(&self) -> u64 {
        match self {
            Self::Reached { elapsed_ms, .. }
            | Self::TimedOut { elapsed_ms, .. }
            | Self::Cancelled { elapsed_ms } => *elapsed_ms,
        }
    }

    /// The final observed value (the match, or the last sample on timeout)
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Reached { value, .. } => Some(value),
            Self::TimedOut { last, .. } => last.as_ref(),
            Self::Cancelled { .. } => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Reached { value, .. } => Some(value),
            Self::TimedOut { last, .. } => last,
            Self::Cancelled { .. } => None,
        }
    }

    /// Classify the outcome for a journey step
    ///
    /// A critical timeout becomes a failed step; a soft timeout passes with
    /// a warning attached.
    pub fn into_step(self, spec: &WaitSpec<T>) -> StepOutcome {
        match self {
            Self::Reached {
                elapsed_ms,
                samples,
                ..
            } => StepOutcome::pass(format!(
                "{} reached after {} ms ({} samples)",
                spec.description, elapsed_ms, samples
            )),
            Self::TimedOut {
                history,
                failed_samples,
                last_error,
                ..
            } => {
                let mut detail = format!(
                    "{} not reached within {} ms ({} samples kept, {} failed)",
                    spec.description,
                    spec.timeout_ms(),
                    history.len(),
                    failed_samples
                );
                if let Some(err) = &last_error {
                    detail.push_str(&format!("; last observation error: {err}"));
                }
                if spec.critical {
                    StepOutcome::fail(
                        detail,
                        &Error::CriticalStateChange {
                            description: spec.description.clone(),
                            timeout_ms: spec.timeout_ms(),
                        },
                    )
                } else {
                    let warning = Error::SoftStateChange {
                        description: spec.description.clone(),
                        timeout_ms: spec.timeout_ms(),
                    };
                    warn!("{warning}");
                    StepOutcome::pass(detail).with_warning(warning.to_string())
                }
            }
            Self::Cancelled { elapsed_ms } => StepOutcome::fail(
                format!("{} cancelled after {} ms", spec.description, elapsed_ms),
                &Error::Internal("wait cancelled".to_string()),
            ),
        }
    }
}

/// Runs waits against an injected clock
#[derive(Clone)]
pub struct Poller {
    clock: Arc<dyn Clock>,
}

impl Poller {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Wait until `spec.predicate` holds for a sample
    ///
    /// The first successful sample becomes the baseline unless one is
    /// supplied, and is evaluated immediately, so a condition that already
    /// holds returns without sleeping. Transient sampling errors are
    /// counted and retried on the next iteration. Cancellation is checked before every
    /// sample, before every sleep and during the sleep itself, and always
    /// wins over a timeout or a match observed in the same iteration.
    ///
    /// Returns `Err` for an invalid spec or a sampling error that retrying
    /// cannot fix.
    pub async fn wait_for<T, F, Fut>(
        &self,
        spec: &WaitSpec<T>,
        baseline: Option<T>,
        mut sample: F,
        cancel: &CancellationToken,
    ) -> Result<Outcome<T>>
    where
        T: Clone + Send,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        spec.validate()?;

        let start = self.clock.now_ms();
        let elapsed = || self.clock.now_ms().saturating_sub(start);
        let timeout_ms = spec.timeout_ms();

        let mut baseline = baseline;
        let mut history: VecDeque<T> = VecDeque::new();
        let mut samples = 0usize;
        let mut failed_samples = 0usize;
        let mut last_error: Option<String> = None;

        debug!(
            kind = %spec.kind,
            description = %spec.description,
            timeout_ms,
            poll_interval_ms = spec.poll_interval_ms(),
            "waiting"
        );

        loop {
            if cancel.is_cancelled() {
                return Ok(self.cancelled(spec, elapsed()));
            }

            match sample().await {
                Ok(candidate) => {
                    samples += 1;
                    if cancel.is_cancelled() {
                        return Ok(self.cancelled(spec, elapsed()));
                    }
                    let now = elapsed();
                    let base = baseline.get_or_insert_with(|| candidate.clone());
                    if (spec.predicate)(base, &candidate, now) {
                        info!(
                            description = %spec.description,
                            elapsed_ms = now,
                            samples,
                            "condition reached"
                        );
                        return Ok(Outcome::Reached {
                            value: candidate,
                            elapsed_ms: now,
                            samples,
                        });
                    }
                    debug!(description = %spec.description, elapsed_ms = now, samples, "not yet");
                    history.push_back(candidate);
                    if let Some(limit) = spec.history_limit {
                        while history.len() > limit {
                            history.pop_front();
                        }
                    }
                }
                Err(e) if !e.is_transient() => {
                    warn!(description = %spec.description, error = %e, "sample failed, not retrying");
                    return Err(e);
                }
                Err(e) => {
                    failed_samples += 1;
                    debug!(description = %spec.description, error = %e, "sample failed, retrying");
                    last_error = Some(e.to_string());
                }
            }

            let now = elapsed();
            if cancel.is_cancelled() {
                return Ok(self.cancelled(spec, now));
            }
            if now >= timeout_ms {
                info!(
                    description = %spec.description,
                    elapsed_ms = now,
                    samples,
                    failed_samples,
                    critical = spec.critical,
                    "condition timed out"
                );
                let history: Vec<T> = history.into_iter().collect();
                return Ok(Outcome::TimedOut {
                    last: history.last().cloned(),
                    history,
                    elapsed_ms: now,
                    failed_samples,
                    last_error,
                });
            }

            // Land the final sample on the deadline rather than past it
            let remaining = Duration::from_millis(timeout_ms - now);
            let delay = spec.poll_interval.min(remaining);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(self.cancelled(spec, elapsed())),
                _ = self.clock.sleep(delay) => {}
            }
        }
    }

    fn cancelled<T>(&self, spec: &WaitSpec<T>, elapsed_ms: u64) -> Outcome<T> {
        info!(description = %spec.description, elapsed_ms, "wait cancelled");
        Outcome::Cancelled { elapsed_ms }
    }
}
