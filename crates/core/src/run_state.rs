//! Per-parcel ingestion run state.
//!
//! The transitions live here as plain methods so every store backend applies
//! the same rules inside its own atomic section.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::parcel::{Cadence, ParcelId};

/// Run status of a parcel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Failed,
}

/// Why a run ended without success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Retryable failures exhausted the retry budget.
    Exhausted,
    /// Auth/config class failure. Halts the parcel until an operator reset.
    Fatal,
    /// The worker disappeared while the run was in flight.
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl RunFailure {
    pub fn exhausted(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Exhausted,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Fatal,
            message: message.into(),
        }
    }

    pub fn abandoned(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Abandoned,
            message: message.into(),
        }
    }
}

/// Exponential push-back of `next_due_at` after consecutive failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureBackoff {
    /// Delay after the first failure
    #[serde(default = "default_backoff_base_secs")]
    pub base_secs: u64,
    /// Upper bound on the delay
    #[serde(default = "default_backoff_max_secs")]
    pub max_secs: u64,
}

fn default_backoff_base_secs() -> u64 {
    15 * 60
}

fn default_backoff_max_secs() -> u64 {
    24 * 3600
}

impl Default for FailureBackoff {
    fn default() -> Self {
        Self {
            base_secs: default_backoff_base_secs(),
            max_secs: default_backoff_max_secs(),
        }
    }
}

impl FailureBackoff {
    /// Delay before the next attempt given the failure count (1-based).
    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.saturating_sub(1).min(32);
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let secs = self.base_secs.saturating_mul(factor).min(self.max_secs);
        Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
    }
}

/// Proof that the holder started the current run of a parcel.
///
/// Completions carrying a lease from an earlier generation are rejected, so
/// a reclaimed worker that finishes late cannot overwrite its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLease {
    pub parcel_id: ParcelId,
    pub generation: u64,
    pub started_at: DateTime<Utc>,
}

/// Durable record of one parcel's ingestion progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub parcel_id: ParcelId,
    pub last_success_date: Option<NaiveDate>,
    pub next_due_at: DateTime<Utc>,
    pub status: RunStatus,
    pub consecutive_failures: u32,
    /// Set by a fatal failure; cleared only by [`RunState::reset`].
    pub halted: bool,
    pub running_since: Option<DateTime<Utc>>,
    /// Bumped on every start.
    #[serde(default)]
    pub generation: u64,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl RunState {
    /// Creates an idle state that is due immediately.
    pub fn new(parcel_id: ParcelId, now: DateTime<Utc>) -> Self {
        Self {
            parcel_id,
            last_success_date: None,
            next_due_at: now,
            status: RunStatus::Idle,
            consecutive_failures: 0,
            halted: false,
            running_since: None,
            generation: 0,
            last_error: None,
            updated_at: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.halted && self.status != RunStatus::Running && self.next_due_at <= now
    }

    /// `idle|failed -> running`. The returned lease identifies this run.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<RunLease> {
        if self.status == RunStatus::Running {
            return Err(Error::ConcurrencyConflict(self.parcel_id));
        }
        if self.halted {
            return Err(Error::invalid_transition(format!(
                "parcel {} is halted until reset",
                self.parcel_id
            )));
        }
        self.status = RunStatus::Running;
        self.running_since = Some(now);
        self.generation = self.generation.wrapping_add(1);
        self.updated_at = now;
        Ok(RunLease {
            parcel_id: self.parcel_id,
            generation: self.generation,
            started_at: now,
        })
    }

    /// True while `lease` belongs to the run in flight.
    pub fn holds(&self, lease: &RunLease) -> bool {
        self.status == RunStatus::Running
            && self.parcel_id == lease.parcel_id
            && self.generation == lease.generation
    }

    /// `running -> idle`, next run one cadence interval out.
    pub fn succeed(
        &mut self,
        lease: &RunLease,
        date: NaiveDate,
        cadence: Cadence,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.require_lease(lease)?;
        self.last_success_date = Some(match self.last_success_date {
            Some(prev) if prev > date => prev,
            _ => date,
        });
        self.next_due_at = now + cadence.interval();
        self.consecutive_failures = 0;
        self.status = RunStatus::Idle;
        self.running_since = None;
        self.last_error = None;
        self.updated_at = now;
        Ok(())
    }

    /// `running -> failed`, next run pushed back exponentially.
    pub fn fail(
        &mut self,
        lease: &RunLease,
        failure: &RunFailure,
        backoff: &FailureBackoff,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.require_lease(lease)?;
        self.record_failure(failure, backoff, now);
        Ok(())
    }

    /// Fails whatever run is in flight without a lease. Used for stale runs
    /// whose worker is presumed gone. That worker's lease stops matching at
    /// once, and the next start moves the generation past it.
    pub fn abandon(
        &mut self,
        failure: &RunFailure,
        backoff: &FailureBackoff,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.require_running("abandon")?;
        self.record_failure(failure, backoff, now);
        Ok(())
    }

    fn record_failure(
        &mut self,
        failure: &RunFailure,
        backoff: &FailureBackoff,
        now: DateTime<Utc>,
    ) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.status = RunStatus::Failed;
        self.next_due_at = now + backoff.delay_for(self.consecutive_failures);
        self.halted |= failure.kind == FailureKind::Fatal;
        self.running_since = None;
        self.last_error = Some(failure.message.clone());
        self.updated_at = now;
    }

    /// Operator reset: clears the halt and the failure streak, due immediately.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.halted = false;
        self.consecutive_failures = 0;
        self.last_error = None;
        if self.status != RunStatus::Running {
            self.status = RunStatus::Idle;
        }
        self.next_due_at = now;
        self.updated_at = now;
    }

    /// A run that has been in flight longer than `max_age`.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        self.status == RunStatus::Running
            && self.running_since.is_some_and(|since| now - since > max_age)
    }

    fn require_lease(&self, lease: &RunLease) -> Result<()> {
        if !self.holds(lease) {
            return Err(Error::SupersededRun {
                parcel_id: lease.parcel_id,
                generation: lease.generation,
            });
        }
        Ok(())
    }

    fn require_running(&self, op: &str) -> Result<()> {
        if self.status != RunStatus::Running {
            return Err(Error::invalid_transition(format!(
                "cannot {} parcel {} in status {:?}",
                op, self.parcel_id, self.status
            )));
        }
        Ok(())
    }
}
