//! Type definitions for the correlation system
//!
//! Core types used for pending-request tracking and outbound request id
//! generation.

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicI64, Ordering};

// Layer 2: Third-party crate imports
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use tokio::sync::oneshot;

// Layer 3: Internal module imports
use crate::protocol::{McpError, RequestId};

/// Result delivered to an awaiting continuation
pub type CorrelatedResult = Result<Value, McpError>;

/// A pending request awaiting correlation with its response
///
/// Holds the oneshot sender that resumes the awaiting caller together
/// with the deadline information used by the expiry sweep.
#[derive(Debug)]
pub struct PendingRequest {
    /// Channel sender for delivering the correlated response or error
    pub sender: oneshot::Sender<CorrelatedResult>,

    /// Timestamp when the request was registered (UTC)
    pub created_at: DateTime<Utc>,

    /// Maximum time to wait for a response
    pub timeout: TimeDelta,
}

impl PendingRequest {
    /// Create a new pending request
    pub fn new(sender: oneshot::Sender<CorrelatedResult>, timeout: TimeDelta) -> Self {
        Self {
            sender,
            created_at: Utc::now(),
            timeout,
        }
    }

    /// Check if this request has expired at a specific timestamp
    ///
    /// More efficient than querying the clock per request when sweeping.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.created_at) > self.timeout
    }

    /// The deadline duration as a std `Duration`
    pub fn timeout_std(&self) -> std::time::Duration {
        self.timeout.to_std().unwrap_or_default()
    }
}

/// Generator for unique outbound request IDs
///
/// Produces monotonically increasing numeric ids, unique per endpoint for
/// the lifetime of the generator.
#[derive(Debug, Default)]
pub struct RequestIdGenerator {
    counter: AtomicI64,
}

impl RequestIdGenerator {
    /// Create a new generator starting at 1
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce the next request id
    pub fn next_id(&self) -> RequestId {
        RequestId::Number(self.counter.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_is_monotonic() {
        let generator = RequestIdGenerator::new();
        assert_eq!(generator.next_id(), RequestId::Number(1));
        assert_eq!(generator.next_id(), RequestId::Number(2));
        assert_eq!(generator.next_id(), RequestId::Number(3));
    }

    #[test]
    fn expiry_uses_registration_time() {
        let (sender, _receiver) = oneshot::channel();
        let pending = PendingRequest::new(sender, TimeDelta::seconds(30));
        assert!(!pending.is_expired_at(Utc::now()));
        assert!(pending.is_expired_at(Utc::now() + TimeDelta::seconds(31)));
    }
}
