//! The payment gateway port: an injectable boundary between the payment
//! processor's attempt logic and whatever external payment network it talks
//! to, grounded on the teacher's `Environment`-struct pattern of injectable
//! ports behind `Arc<dyn Trait>`. Production wiring would supply a real
//! gateway client here; this crate ships only [`FakeGateway`], a
//! deterministic stand-in used by tests (and, until a real client exists,
//! by `main.rs`).

use async_trait::async_trait;
use std::sync::Mutex;

/// The result of one gateway charge attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayOutcome {
    /// The charge succeeded; carries the gateway's transaction id.
    Success {
        /// Opaque transaction id assigned by the gateway.
        transaction_id: String,
    },
    /// The charge was declined or the gateway call failed; carries a reason.
    Declined {
        /// Human-readable reason, recorded as `Payment.failure_reason`.
        reason: String,
    },
}

/// An external payment gateway, abstracted behind a trait so tests and
/// alternate providers can be substituted without touching attempt logic.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Attempt to charge `amount` via `method`. Implementations should
    /// internally bound the call to a reasonable timeout; a genuine timeout
    /// is reported as [`GatewayOutcome::Declined`], not a panic.
    async fn charge(&self, amount: i64, method: &str) -> GatewayOutcome;
}

/// A deterministic fake gateway driven by a fixed script of outcomes, one
/// per call; the last scripted outcome repeats once the script is exhausted.
pub struct FakeGateway {
    script: Mutex<Vec<GatewayOutcome>>,
    cursor: Mutex<usize>,
}

impl FakeGateway {
    /// Build a fake that replays `script` in order, one outcome per call.
    ///
    /// # Panics
    ///
    /// Panics if `script` is empty; a fake gateway with nothing to return is
    /// a test setup error, not a runtime condition.
    #[must_use]
    pub fn scripted(script: Vec<GatewayOutcome>) -> Self {
        assert!(!script.is_empty(), "FakeGateway::scripted requires at least one outcome");
        Self { script: Mutex::new(script), cursor: Mutex::new(0) }
    }

    /// Build a fake that always succeeds with a freshly generated transaction id.
    #[must_use]
    pub fn always_succeeds() -> Self {
        Self::scripted(vec![GatewayOutcome::Success {
            transaction_id: uuid::Uuid::new_v4().to_string(),
        }])
    }

    /// Build a fake that always declines with `reason`.
    #[must_use]
    pub fn always_declines(reason: impl Into<String>) -> Self {
        Self::scripted(vec![GatewayOutcome::Declined { reason: reason.into() }])
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn charge(&self, _amount: i64, _method: &str) -> GatewayOutcome {
        #[allow(clippy::unwrap_used)] // Mutex poison is unrecoverable
        let script = self.script.lock().unwrap();
        #[allow(clippy::unwrap_used)] // Mutex poison is unrecoverable
        let mut cursor = self.cursor.lock().unwrap();
        let index = (*cursor).min(script.len() - 1);
        *cursor += 1;
        script[index].clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_gateway_replays_script_then_repeats_last() {
        let gateway = FakeGateway::scripted(vec![
            GatewayOutcome::Declined { reason: "declined".to_string() },
            GatewayOutcome::Success { transaction_id: "tx-1".to_string() },
        ]);

        assert_eq!(gateway.charge(500, "card").await, GatewayOutcome::Declined { reason: "declined".to_string() });
        assert_eq!(gateway.charge(500, "card").await, GatewayOutcome::Success { transaction_id: "tx-1".to_string() });
        assert_eq!(gateway.charge(500, "card").await, GatewayOutcome::Success { transaction_id: "tx-1".to_string() });
    }

    #[tokio::test]
    async fn always_declines_never_succeeds() {
        let gateway = FakeGateway::always_declines("insufficient funds");
        for _ in 0..3 {
            assert_eq!(
                gateway.charge(100, "card").await,
                GatewayOutcome::Declined { reason: "insufficient funds".to_string() }
            );
        }
    }
}
