//! Gateway request and response types
//!
//! Common types exchanged between the orchestrator and the gateway adapter.
//! Gateway rejections travel as values (the orchestrator must ledger them);
//! only transport-level failures surface as errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which callback endpoint a payload arrived on. Collections and
/// disbursements use distinct correlation-id namespaces and wire shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    Collection,
    Disbursement,
}

/// Request to initiate a customer push payment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionRequest {
    /// Amount in minor currency units
    pub amount: i64,
    pub currency: String,
    /// Payer phone number in the gateway's native format
    pub payer_reference: String,
    /// Our identifier echoed back on gateway statements
    pub account_reference: String,
    pub description: String,
}

/// Request to push funds out to a customer (refunds)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisbursementRequest {
    pub amount: i64,
    pub currency: String,
    pub payee_reference: String,
    pub account_reference: String,
    pub reason: String,
}

/// Raw request/response pair of one gateway exchange, captured for the ledger
#[derive(Debug, Clone)]
pub struct GatewayExchange {
    pub request_payload: serde_json::Value,
    pub response_payload: Option<serde_json::Value>,
    pub duration_ms: i64,
}

/// Whether the gateway accepted an initiation request
#[derive(Debug, Clone)]
pub enum InitiationOutcome {
    /// Request queued; the final result arrives via callback
    Accepted {
        correlation_id: String,
        customer_message: Option<String>,
    },
    /// Provider-side validation or business rejection
    Rejected { code: String, message: String },
}

#[derive(Debug, Clone)]
pub struct InitiationResult {
    pub outcome: InitiationOutcome,
    pub exchange: GatewayExchange,
}

/// Result of an active status query against the gateway
#[derive(Debug, Clone)]
pub enum QueryOutcome {
    Settled {
        receipt_id: Option<String>,
        settled_at: Option<DateTime<Utc>>,
    },
    Failed {
        code: String,
        message: String,
    },
    /// Still in flight, or a result code ambiguous with "still pending"
    /// that must not force a failure transition
    Pending,
}

#[derive(Debug, Clone)]
pub struct StatusQueryResult {
    pub outcome: QueryOutcome,
    pub exchange: GatewayExchange,
}

/// A validated, authenticated callback payload
#[derive(Debug, Clone)]
pub struct CallbackEvent {
    pub kind: CallbackKind,
    pub correlation_id: String,
    pub result_code: String,
    pub result_message: String,
    pub receipt_id: Option<String>,
    pub settled_at: Option<DateTime<Utc>>,
    pub amount: Option<i64>,
    /// Parsed payload as received, kept verbatim for the ledger
    pub payload: serde_json::Value,
}

impl CallbackEvent {
    pub fn is_success(&self) -> bool {
        self.result_code == "0"
    }
}
