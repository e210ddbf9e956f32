use std::{collections::BTreeMap, time::Duration};

use super::types::{LoginError, LoginErrorKind};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(2000);

/// Per-class retry decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    GiveUp,
}

/// Bounded, fixed-delay retry policy for the login state machine.
///
/// `rules` maps each login error class to retry/no-retry. The default retries
/// every class up to `max_attempts`, including classes that will rarely
/// recover (invalid credential, challenge required).
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    /// When false, attempts follow each other back to back.
    pub wait_between_attempts: bool,
    rules: BTreeMap<LoginErrorKind, RetryDecision>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY)
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        let rules = LoginErrorKind::ALL
            .into_iter()
            .map(|k| (k, RetryDecision::Retry))
            .collect();
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            wait_between_attempts: true,
            rules,
        }
    }

    /// Only retry classes that are transient (rate limited, network errors).
    pub fn transient_only(max_attempts: u32, delay: Duration) -> Self {
        let mut p = Self::new(max_attempts, delay);
        for kind in LoginErrorKind::ALL {
            if !kind.is_transient() {
                p.set(kind, RetryDecision::GiveUp);
            }
        }
        p
    }

    pub fn set(&mut self, kind: LoginErrorKind, decision: RetryDecision) -> &mut Self {
        self.rules.insert(kind, decision);
        self
    }

    pub fn decision_for(&self, kind: LoginErrorKind) -> RetryDecision {
        self.rules
            .get(&kind)
            .copied()
            .unwrap_or(RetryDecision::Retry)
    }

    /// Whether another attempt should follow failed attempt number `attempt` (1-based).
    pub fn should_retry(&self, attempt: u32, err: &LoginError) -> bool {
        attempt < self.max_attempts
            && self.decision_for(err.kind) == RetryDecision::Retry
    }

    /// Wait before the next attempt; honors a server back-off hint when longer.
    pub fn delay_after(&self, err: &LoginError) -> Duration {
        if !self.wait_between_attempts {
            return Duration::ZERO;
        }
        match err.retry_after {
            Some(hint) if hint > self.delay => hint,
            _ => self.delay,
        }
    }
}
