//! Pending-request map
//!
//! Thread-safe management of in-flight outbound requests keyed by their
//! wire request id, with timeout sweeping and disconnect propagation.
//!
//! Invariants maintained here:
//! - a request id in flight has exactly one awaiting continuation
//! - the map is monotonic-add / response-or-cancel-remove
//! - a response for an unknown id is logged and dropped by the caller
//!   (`resolve` reports the miss)

// Layer 1: Standard library imports
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// Layer 2: Third-party crate imports
use chrono::{TimeDelta, Utc};
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{debug, warn};

// Layer 3: Internal module imports
use crate::correlation::types::{CorrelatedResult, PendingRequest};
use crate::protocol::{defaults, McpError, RequestId};

/// Configuration for the pending-request map
#[derive(Debug, Clone)]
pub struct CorrelationConfig {
    /// Default timeout for requests if not specified
    pub default_timeout: TimeDelta,

    /// How often to sweep for expired requests
    pub sweep_interval: Duration,

    /// Maximum number of pending requests (0 = unlimited)
    pub max_pending_requests: usize,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            default_timeout: TimeDelta::from_std(defaults::REQUEST_TIMEOUT)
                .unwrap_or(TimeDelta::seconds(60)),
            sweep_interval: Duration::from_secs(5),
            max_pending_requests: defaults::MAX_PENDING_REQUESTS,
        }
    }
}

/// Pending-request map for JSON-RPC request/response correlation
///
/// Each registered request owns exactly one oneshot continuation. A
/// background sweep resolves expired entries with
/// [`McpError::RequestTimeout`]; `fail_all` propagates disconnects.
#[derive(Debug)]
pub struct PendingRequests {
    /// Pending requests by their wire id
    requests: Arc<DashMap<RequestId, PendingRequest>>,

    /// Configuration settings
    config: CorrelationConfig,

    /// Background sweep task handle
    sweep_task: Option<JoinHandle<()>>,

    /// Shutdown signal for the sweep task
    shutdown: Arc<AtomicBool>,
}

impl PendingRequests {
    /// Create a new map and start the expiry sweep
    pub fn new(config: CorrelationConfig) -> Self {
        let requests: Arc<DashMap<RequestId, PendingRequest>> = Arc::new(DashMap::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let sweep_requests = Arc::clone(&requests);
        let sweep_shutdown = Arc::clone(&shutdown);
        let sweep_interval = config.sweep_interval;
        let sweep_task = tokio::spawn(async move {
            let mut ticker = interval(sweep_interval);
            loop {
                ticker.tick().await;
                if sweep_shutdown.load(Ordering::Acquire) {
                    break;
                }
                let now = Utc::now();
                let expired: Vec<RequestId> = sweep_requests
                    .iter()
                    .filter(|entry| entry.value().is_expired_at(now))
                    .map(|entry| entry.key().clone())
                    .collect();
                for id in expired {
                    if let Some((_, pending)) = sweep_requests.remove(&id) {
                        debug!(request_id = %id, "pending request expired");
                        let timeout = pending.timeout_std();
                        let _ = pending.sender.send(Err(McpError::request_timeout(timeout)));
                    }
                }
            }
        });

        Self {
            requests,
            config,
            sweep_task: Some(sweep_task),
            shutdown,
        }
    }

    /// Register a request id for correlation
    ///
    /// Returns the receiver that resolves with the matching response, a
    /// cancellation, or a timeout.
    ///
    /// # Errors
    ///
    /// * [`McpError::InternalError`] - capacity exceeded or the id is
    ///   already in flight (ids must be unique within a session)
    pub fn register(
        &self,
        id: RequestId,
        timeout: Option<TimeDelta>,
    ) -> Result<oneshot::Receiver<CorrelatedResult>, McpError> {
        if self.config.max_pending_requests > 0
            && self.requests.len() >= self.config.max_pending_requests
        {
            return Err(McpError::internal_error("maximum pending requests exceeded"));
        }

        let (sender, receiver) = oneshot::channel();
        let timeout = timeout.unwrap_or(self.config.default_timeout);
        let pending = PendingRequest::new(sender, timeout);

        if self.requests.insert(id.clone(), pending).is_some() {
            // The displaced continuation is gone; this is a caller bug.
            return Err(McpError::internal_error(format!(
                "request id {id} already in flight"
            )));
        }

        debug!(request_id = %id, timeout = ?timeout, "registered pending request");
        Ok(receiver)
    }

    /// Resolve a pending request with its correlated result
    ///
    /// Returns `false` when the id is unknown (already resolved, cancelled,
    /// or never registered); the caller logs and drops such responses.
    pub fn resolve(&self, id: &RequestId, result: CorrelatedResult) -> bool {
        match self.requests.remove(id) {
            Some((_, pending)) => {
                let _ = pending.sender.send(result);
                true
            }
            None => false,
        }
    }

    /// Cancel a pending request
    ///
    /// Resolves the continuation with [`McpError::RequestCancelled`].
    /// Cancelling an unknown id is a no-op, per the advisory cancellation
    /// semantics.
    pub fn cancel(&self, id: &RequestId, reason: Option<String>) -> bool {
        match self.requests.remove(id) {
            Some((_, pending)) => {
                debug!(request_id = %id, "cancelling pending request");
                let _ = pending.sender.send(Err(McpError::request_cancelled(reason)));
                true
            }
            None => false,
        }
    }

    /// Remove a pending request without resolving it
    ///
    /// Used by callers that enforce their own deadline and already hold
    /// the receiver.
    pub fn forget(&self, id: &RequestId) {
        self.requests.remove(id);
    }

    /// Resolve every pending request with the given error
    ///
    /// Disconnect propagation: every awaiting continuation on the affected
    /// endpoint observes the failure.
    pub fn fail_all(&self, error: &McpError) {
        let ids: Vec<RequestId> = self.requests.iter().map(|e| e.key().clone()).collect();
        if !ids.is_empty() {
            warn!(count = ids.len(), error = %error, "failing all pending requests");
        }
        for id in ids {
            if let Some((_, pending)) = self.requests.remove(&id) {
                let _ = pending.sender.send(Err(error.clone()));
            }
        }
    }

    /// Whether the given id is currently pending
    pub fn is_pending(&self, id: &RequestId) -> bool {
        self.requests.contains_key(id)
    }

    /// Current number of pending requests
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Whether no requests are pending
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Stop the sweep task and fail any remaining requests
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.fail_all(&McpError::connection_closed());
    }
}

impl Drop for PendingRequests {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(task) = self.sweep_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager() -> PendingRequests {
        PendingRequests::new(CorrelationConfig::default())
    }

    #[tokio::test]
    async fn resolve_delivers_to_continuation() {
        let pending = manager();
        let receiver = pending.register(RequestId::new_number(1), None).unwrap();

        assert!(pending.resolve(&RequestId::new_number(1), Ok(json!({"ok": true}))));
        let result = receiver.await.unwrap().unwrap();
        assert_eq!(result, json!({"ok": true}));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn unknown_id_is_reported() {
        let pending = manager();
        assert!(!pending.resolve(&RequestId::new_number(42), Ok(json!(null))));
    }

    #[tokio::test]
    async fn duplicate_registration_fails() {
        let pending = manager();
        let _receiver = pending.register(RequestId::new_number(1), None).unwrap();
        assert!(pending.register(RequestId::new_number(1), None).is_err());
    }

    #[tokio::test]
    async fn cancel_resolves_with_request_cancelled() {
        let pending = manager();
        let receiver = pending.register(RequestId::new_string("r"), None).unwrap();

        assert!(pending.cancel(&RequestId::new_string("r"), Some("user".to_string())));
        let error = receiver.await.unwrap().unwrap_err();
        assert_eq!(
            error,
            McpError::request_cancelled(Some("user".to_string()))
        );

        // Unknown id cancellation is a no-op
        assert!(!pending.cancel(&RequestId::new_string("r"), None));
    }

    #[tokio::test]
    async fn expired_requests_resolve_with_timeout() {
        let config = CorrelationConfig {
            default_timeout: TimeDelta::milliseconds(20),
            sweep_interval: Duration::from_millis(10),
            ..Default::default()
        };
        let pending = PendingRequests::new(config);
        let receiver = pending.register(RequestId::new_number(9), None).unwrap();

        let error = receiver.await.unwrap().unwrap_err();
        assert!(matches!(error, McpError::RequestTimeout { .. }));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn fail_all_propagates_disconnect() {
        let pending = manager();
        let first = pending.register(RequestId::new_number(1), None).unwrap();
        let second = pending.register(RequestId::new_number(2), None).unwrap();

        pending.fail_all(&McpError::connection_closed());

        assert_eq!(first.await.unwrap().unwrap_err(), McpError::connection_closed());
        assert_eq!(second.await.unwrap().unwrap_err(), McpError::connection_closed());
        assert!(pending.is_empty());
    }
}
