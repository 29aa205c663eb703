//! Bounded retry/backoff for speech capture plus the shared pending-response
//! timer.
//!
//! Two independent paths lead to a blocked voice session: exhausting the
//! bounded retry budget, and the environment heuristic for known-flaky audio
//! backends. They stay distinct because the user remediation differs.

use crate::envprobe::EnvironmentTag;
use crate::speech::SpeechErrorClass;
use std::time::{Duration, Instant};

pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
pub const RETRY_MAX_DELAY: Duration = Duration::from_millis(8_000);
/// Consecutive recoverable failures tolerated before blocking.
pub const MAX_CONSECUTIVE_RETRIES: u32 = 5;
/// Network-class recurrences tolerated in an unreliable environment.
const UNRELIABLE_ENV_NETWORK_LIMIT: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// The bounded retry budget ran out.
    RetryExhausted,
    /// The environment heuristic tripped; retrying will not help here.
    UnreliableEnvironment,
}

impl BlockReason {
    #[must_use]
    pub fn user_message(self) -> &'static str {
        match self {
            BlockReason::RetryExhausted => {
                "Speech recognition kept failing and was paused. Toggle voice input to try again."
            }
            BlockReason::UnreliableEnvironment => {
                "This environment's audio backend is known to drop speech connections. \
                 Voice input was paused; enable the unreliable-environment override to keep trying."
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: RETRY_BASE_DELAY,
            cap: RETRY_MAX_DELAY,
            max_attempts: MAX_CONSECUTIVE_RETRIES,
        }
    }
}

impl RetryPolicy {
    /// Exponential delay for the nth consecutive attempt (1-based), capped.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let scaled = self.base.saturating_mul(1u32 << shift);
        scaled.min(self.cap)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAt(Instant),
    Blocked(BlockReason),
}

/// Governs reconnection of one voice session after recoverable errors.
#[derive(Debug)]
pub struct RetrySupervisor {
    policy: RetryPolicy,
    environment: EnvironmentTag,
    allow_unreliable_env: bool,
    consecutive_failures: u32,
    network_failures: u32,
    blocked: Option<BlockReason>,
    restart_at: Option<Instant>,
}

impl RetrySupervisor {
    #[must_use]
    pub fn new(policy: RetryPolicy, environment: EnvironmentTag, allow_unreliable_env: bool) -> Self {
        Self {
            policy,
            environment,
            allow_unreliable_env,
            consecutive_failures: 0,
            network_failures: 0,
            blocked: None,
            restart_at: None,
        }
    }

    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.consecutive_failures
    }

    #[must_use]
    pub fn blocked(&self) -> Option<BlockReason> {
        self.blocked
    }

    /// Record a recoverable failure and decide between a delayed restart and
    /// blocking the session.
    pub fn on_recoverable_error(&mut self, class: SpeechErrorClass, now: Instant) -> RetryDecision {
        if let Some(reason) = self.blocked {
            return RetryDecision::Blocked(reason);
        }
        if class == SpeechErrorClass::TransientNetwork {
            self.network_failures += 1;
            // The environment breaker fires on recurrence regardless of the
            // retry counter; its remediation is different from "just retry".
            if self.environment == EnvironmentTag::KnownUnreliableAudio
                && !self.allow_unreliable_env
                && self.network_failures >= UNRELIABLE_ENV_NETWORK_LIMIT
            {
                self.blocked = Some(BlockReason::UnreliableEnvironment);
                self.restart_at = None;
                return RetryDecision::Blocked(BlockReason::UnreliableEnvironment);
            }
        }
        self.consecutive_failures += 1;
        if self.consecutive_failures > self.policy.max_attempts {
            self.blocked = Some(BlockReason::RetryExhausted);
            self.restart_at = None;
            return RetryDecision::Blocked(BlockReason::RetryExhausted);
        }
        let at = now + self.policy.delay_for(self.consecutive_failures);
        self.restart_at = Some(at);
        RetryDecision::RetryAt(at)
    }

    /// A successful recognition resets the consecutive-failure streak. The
    /// environment breaker keeps counting per session by design of its
    /// recurrence rule.
    pub fn on_success(&mut self) {
        self.consecutive_failures = 0;
        self.restart_at = None;
    }

    /// True once the scheduled restart time has passed; consumes it.
    pub fn restart_due(&mut self, now: Instant) -> bool {
        match self.restart_at {
            Some(at) if now >= at => {
                self.restart_at = None;
                true
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn restart_pending(&self) -> bool {
        self.restart_at.is_some()
    }
}

/// The single shared timeout timer for the pending-response ledger.
///
/// Invariant: armed iff the ledger counter is above zero. Each expiry
/// accounts for exactly one placeholder; the caller re-arms afterwards.
#[derive(Debug)]
pub struct ResponseTimeout {
    timeout: Duration,
    deadline: Option<Instant>,
}

impl ResponseTimeout {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: None,
        }
    }

    /// Reconcile the timer with the current ledger count. Arms on the first
    /// outstanding reply, disarms at zero, and leaves an already-armed
    /// deadline alone (the timer is shared, not per-message).
    pub fn sync(&mut self, pending_replies: usize, now: Instant) {
        if pending_replies == 0 {
            self.deadline = None;
        } else if self.deadline.is_none() {
            self.deadline = Some(now + self.timeout);
        }
    }

    #[must_use]
    pub fn expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Re-arm after an expiry was handled, while replies remain outstanding.
    pub fn rearm_after_expiry(&mut self, pending_replies: usize, now: Instant) {
        self.deadline = (pending_replies > 0).then(|| now + self.timeout);
    }

    #[must_use]
    pub fn armed(&self) -> bool {
        self.deadline.is_some()
    }
}
