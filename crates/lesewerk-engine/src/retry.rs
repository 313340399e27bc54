// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Retry policy for failed pages.
//
// Classifies errors into Transient (retry after a fixed delay), QuotaExhausted
// (halt the batch), and Permanent (give up). Only transient errors consume
// the retry budget.

use std::time::Duration;

use lesewerk_core::EngineConfig;
use lesewerk_core::error::LesewerkError;
use lesewerk_core::types::ErrorClass;
use tracing::{debug, info, warn};

/// Retry configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first failure.
    pub max_retries: u32,
    /// Fixed delay before a failed page is requeued.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for RetryPolicy {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            delay: config.retry_delay(),
        }
    }
}

/// Result of evaluating whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue after this delay.
    RetryAfter(Duration),
    /// Do not retry; the error class rules it out.
    GiveUp(ErrorClass),
    /// Retry budget spent.
    Exhausted,
}

/// Classify a `LesewerkError` into an `ErrorClass` for retry decisions.
pub fn classify_error(err: &LesewerkError) -> ErrorClass {
    match err {
        // Transient — a stage hiccuped, the next attempt may succeed
        LesewerkError::Render(_) => ErrorClass::Transient,
        LesewerkError::Preprocess(_) => ErrorClass::Transient,
        LesewerkError::Recognition(_) => ErrorClass::Transient,
        LesewerkError::Image(_) => ErrorClass::Transient,
        LesewerkError::Oracle(_) => ErrorClass::Transient,
        LesewerkError::ChannelCrashed(_) => ErrorClass::Transient,
        LesewerkError::ChannelClosed => ErrorClass::Transient,
        LesewerkError::Database(_) => ErrorClass::Transient,

        // Rate limiting — halt, resume later
        LesewerkError::QuotaExceeded { .. } => ErrorClass::QuotaExhausted,

        // Permanent — the same input will fail the same way
        LesewerkError::InvalidRaster(_) => ErrorClass::Permanent,
        LesewerkError::Config(_) => ErrorClass::Permanent,
        LesewerkError::Serialization(_) => ErrorClass::Permanent,

        // IO errors depend on the kind
        LesewerkError::Io(io_err) => match io_err.kind() {
            std::io::ErrorKind::NotFound
            | std::io::ErrorKind::PermissionDenied
            | std::io::ErrorKind::InvalidData => ErrorClass::Permanent,
            _ => ErrorClass::Transient,
        },
    }
}

/// Decide whether to retry a page that has already failed `attempt` times
/// before this failure.
pub fn should_retry(err: &LesewerkError, attempt: u32, policy: &RetryPolicy) -> RetryDecision {
    match classify_error(err) {
        ErrorClass::Permanent => {
            info!("permanent error — not retrying");
            RetryDecision::GiveUp(ErrorClass::Permanent)
        }
        ErrorClass::QuotaExhausted => {
            info!("quota exhausted — not retrying");
            RetryDecision::GiveUp(ErrorClass::QuotaExhausted)
        }
        ErrorClass::Transient => {
            if attempt >= policy.max_retries {
                warn!(attempt, max = policy.max_retries, "retry limit exhausted");
                RetryDecision::Exhausted
            } else {
                debug!(
                    attempt,
                    delay_ms = policy.delay.as_millis() as u64,
                    "scheduling retry"
                );
                RetryDecision::RetryAfter(policy.delay)
            }
        }
    }
}
