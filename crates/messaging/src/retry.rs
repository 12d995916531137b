//! Layered retry policies.
//!
//! A queue carries an ordered chain of policies; for a given failure the
//! first policy whose filter matches the failure category decides the
//! redelivery delay. When no policy matches, or the deciding policy's
//! attempt budget is spent, the message is permanently failed and the
//! dispatch loop synthesizes a fault envelope.

use std::time::Duration;

use courier_common::contracts::FailureKind;

/// Predicate over the failure category of a consume error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorFilter {
    Any,
    Only(FailureKind),
}

impl ErrorFilter {
    pub fn matches(&self, kind: FailureKind) -> bool {
        match self {
            ErrorFilter::Any => true,
            ErrorFilter::Only(filtered) => *filtered == kind,
        }
    }
}

/// One retry policy variant. Each carries only its own parameters; dispatch
/// matches on the variant, not a trait hierarchy.
#[derive(Debug, Clone)]
pub enum RetryPolicy {
    /// Geometric backoff capped at `max_interval`.
    ///
    /// `retry_limit` is the total delivery-attempt budget: a limit of 3
    /// allows two redeliveries after the initial attempt, so a permanently
    /// failing message records exactly three failures.
    Exponential {
        filter: ErrorFilter,
        retry_limit: u32,
        min_interval: Duration,
        max_interval: Duration,
        growth_factor: f64,
    },

    /// Fixed delays, one per redelivery, in declared order. The budget is
    /// the sequence length.
    FixedIntervals {
        filter: ErrorFilter,
        intervals: Vec<Duration>,
    },
}

impl RetryPolicy {
    pub fn exponential(
        filter: ErrorFilter,
        retry_limit: u32,
        min_interval: Duration,
        max_interval: Duration,
        growth_factor: f64,
    ) -> Self {
        Self::Exponential {
            filter,
            retry_limit,
            min_interval,
            max_interval,
            growth_factor,
        }
    }

    pub fn fixed(filter: ErrorFilter, intervals: Vec<Duration>) -> Self {
        Self::FixedIntervals { filter, intervals }
    }

    pub fn filter(&self) -> &ErrorFilter {
        match self {
            RetryPolicy::Exponential { filter, .. } => filter,
            RetryPolicy::FixedIntervals { filter, .. } => filter,
        }
    }

    /// Redelivery delay after `attempts` completed deliveries (including the
    /// one that just failed), or `None` when the budget is exhausted.
    pub fn delay_after(&self, attempts: u32) -> Option<Duration> {
        match self {
            RetryPolicy::Exponential {
                retry_limit,
                min_interval,
                max_interval,
                growth_factor,
                ..
            } => {
                if attempts >= *retry_limit {
                    return None;
                }
                let delay = min_interval.mul_f64(growth_factor.powi(attempts as i32 - 1));
                Some(delay.min(*max_interval))
            }
            RetryPolicy::FixedIntervals { intervals, .. } => {
                intervals.get(attempts as usize - 1).copied()
            }
        }
    }
}

/// Evaluate a queue's retry chain for a failure: the first policy whose
/// filter matches decides; `None` means permanently failed.
pub fn next_delay(chain: &[RetryPolicy], kind: FailureKind, attempts: u32) -> Option<Duration> {
    chain
        .iter()
        .find(|policy| policy.filter().matches(kind))
        .and_then(|policy| policy.delay_after(attempts))
}
