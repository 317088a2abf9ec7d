//! The payment gateway's asynchronous callback contract.
//!
//! The gateway SDK itself is out of scope; the orchestrator only needs the
//! callback that carries the intent reference, the outcome, and the
//! checkout session the intent was created for.

use common::CheckoutSessionId;
use serde::{Deserialize, Serialize};

/// Result of a payment intent, as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    Succeeded,
    Failed,
    Canceled,
}

/// The gateway's asynchronous callback.
///
/// The session id travels in the intent metadata so the order
/// orchestrator can be invoked without a synchronous call from the
/// payment layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCallback {
    pub intent_ref: String,
    pub outcome: PaymentOutcome,
    pub checkout_session_id: CheckoutSessionId,
    /// Gateway metadata echoed back verbatim.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl PaymentCallback {
    /// A callback with empty metadata.
    pub fn new(
        intent_ref: impl Into<String>,
        outcome: PaymentOutcome,
        checkout_session_id: CheckoutSessionId,
    ) -> Self {
        Self {
            intent_ref: intent_ref.into(),
            outcome,
            checkout_session_id,
            metadata: serde_json::Value::Null,
        }
    }
}
