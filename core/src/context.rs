//! Correlation id propagation and the shared failure taxonomy.
//!
//! A correlation id is allocated (or accepted from a caller) at ingress and
//! travels verbatim through every event envelope, log span, and handler
//! invocation for one business transaction. It is threaded explicitly via
//! [`HandlerContext`] rather than a thread-local or process-global, matching
//! this codebase's general preference for explicit dependency passing over
//! ambient state.

use crate::environment::Clock;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// A per-business-transaction identifier threaded through every event, log,
/// and downstream call.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a new, random correlation id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap a caller-supplied correlation id (e.g. from an `X-Correlation-Id` header).
    #[must_use]
    pub fn from_str(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the correlation id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The three-way classification every handler's outcome collapses into.
///
/// The idempotent consumer runtime (C4) branches on this to decide
/// ack / nack-requeue / DLQ; it is never inferred from an error's `Display`
/// text, always from an explicit variant a handler author chose.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureClass {
    /// Network, broker disconnection, lock timeout, gateway 5xx. Retry.
    Transient,
    /// Decode failure, schema violation, a business precondition that will
    /// never become true. Dead-letter immediately.
    Permanent,
    /// A legitimate negative outcome (insufficient inventory, payment
    /// declined). Not an error: emitted as a domain event, logged at
    /// warning or info, and acked.
    Business,
}

/// The result of running a handler, generalized over its success payload.
#[derive(Debug)]
pub enum Outcome<T> {
    /// The handler completed successfully.
    Success(T),
    /// The handler failed in a way classified by [`FailureClass`].
    Failure {
        /// How the consumer runtime should dispose of this delivery.
        class: FailureClass,
        /// Human-readable cause, logged and (for `Permanent`) attached to the DLQ entry.
        reason: String,
    },
}

impl<T> Outcome<T> {
    /// Build a [`FailureClass::Transient`] outcome.
    #[must_use]
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Failure {
            class: FailureClass::Transient,
            reason: reason.into(),
        }
    }

    /// Build a [`FailureClass::Permanent`] outcome.
    #[must_use]
    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Failure {
            class: FailureClass::Permanent,
            reason: reason.into(),
        }
    }

    /// Build a [`FailureClass::Business`] outcome.
    #[must_use]
    pub fn business(reason: impl Into<String>) -> Self {
        Self::Failure {
            class: FailureClass::Business,
            reason: reason.into(),
        }
    }
}

/// Explicit per-delivery / per-request context threaded through reducers and
/// handlers: no thread-locals, no process-globals.
#[derive(Clone)]
pub struct HandlerContext {
    /// Correlation id for the business transaction this invocation belongs to.
    pub correlation_id: CorrelationId,
    /// Shared clock, so handlers stay deterministic under test.
    pub clock: Arc<dyn Clock>,
    /// Name of the service processing this context, attached to every log span.
    pub service: &'static str,
}

impl HandlerContext {
    /// Build a context for a fresh ingress request (or a freshly-generated correlation id).
    #[must_use]
    pub fn new(correlation_id: CorrelationId, clock: Arc<dyn Clock>, service: &'static str) -> Self {
        Self {
            correlation_id,
            clock,
            service,
        }
    }
}

impl fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContext")
            .field("correlation_id", &self.correlation_id)
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_id_round_trips_through_display() {
        let id = CorrelationId::from_str("corr-123");
        assert_eq!(id.to_string(), "corr-123");
        assert_eq!(id.as_str(), "corr-123");
    }

    #[test]
    fn new_correlation_ids_are_distinct() {
        assert_ne!(CorrelationId::new(), CorrelationId::new());
    }

    #[test]
    fn outcome_constructors_set_failure_class() {
        let transient: Outcome<()> = Outcome::transient("db down");
        match transient {
            Outcome::Failure { class, .. } => assert_eq!(class, FailureClass::Transient),
            Outcome::Success(()) => unreachable!("transient() always returns Failure"),
        }

        let business: Outcome<()> = Outcome::business("insufficient stock");
        match business {
            Outcome::Failure { class, .. } => assert_eq!(class, FailureClass::Business),
            Outcome::Success(()) => unreachable!("business() always returns Failure"),
        }
    }
}
