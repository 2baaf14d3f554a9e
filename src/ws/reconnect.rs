//! Reconnect Policy
//!
//! Decides, after every close, whether another connection attempt should be
//! scheduled and when.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const RECONNECT_DELAY: Duration = Duration::from_millis(5000);
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Whether a dropped connection should be retried at all.
#[derive(Clone, Default)]
pub enum ReconnectPredicate {
    #[default]
    Always,
    Never,
    /// Evaluated fresh on every close.
    Dynamic(Arc<dyn Fn() -> bool + Send + Sync>),
}

impl ReconnectPredicate {
    pub fn dynamic(predicate: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self::Dynamic(Arc::new(predicate))
    }

    pub fn evaluate(&self) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Dynamic(predicate) => predicate(),
        }
    }
}

impl From<bool> for ReconnectPredicate {
    fn from(value: bool) -> Self {
        if value { Self::Always } else { Self::Never }
    }
}

impl fmt::Debug for ReconnectPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => f.write_str("Always"),
            Self::Never => f.write_str("Never"),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// Outcome of consulting the policy after a close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// The predicate said no.
    Disabled,
    /// The attempt budget is spent; only an explicit connect resumes.
    Exhausted,
    /// Schedule attempt number `attempt` after `delay`.
    Retry { attempt: u32, delay: Duration },
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub predicate: ReconnectPredicate,
    pub delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(predicate: ReconnectPredicate) -> Self {
        Self {
            predicate,
            delay: RECONNECT_DELAY,
            max_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }

    /// Consult the policy for one close. `attempts` is the session's counter and
    /// is bumped only when a retry is scheduled.
    pub fn on_close(&self, attempts: &mut u32) -> ReconnectDecision {
        if !self.predicate.evaluate() {
            return ReconnectDecision::Disabled;
        }

        if *attempts >= self.max_attempts {
            return ReconnectDecision::Exhausted;
        }

        *attempts += 1;
        ReconnectDecision::Retry {
            attempt: *attempts,
            delay: self.delay,
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(ReconnectPredicate::Always)
    }
}
