//! Gateway client trait definition
//!
//! The single seam between the orchestrator and the mobile-money provider's
//! wire protocol.

use crate::error::AppResult;
use crate::gateway::types::{
    CallbackEvent, CallbackKind, CollectionRequest, DisbursementRequest, InitiationResult,
    StatusQueryResult,
};
use async_trait::async_trait;

/// Stateless adapter over the mobile-money provider.
///
/// All network calls carry a bounded timeout; a timeout surfaces as
/// `GatewayTimeout` because the side effect may already have occurred on the
/// provider side. Provider-side rejections are returned as values so callers
/// can ledger the full exchange.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Initiate a push payment prompt on the payer's handset.
    ///
    /// Acceptance means the request is queued; the outcome arrives later via
    /// callback, keyed by the returned correlation id.
    async fn initiate_collection(&self, request: CollectionRequest)
        -> AppResult<InitiationResult>;

    /// Initiate a funds transfer out to a customer (refund).
    async fn initiate_disbursement(
        &self,
        request: DisbursementRequest,
    ) -> AppResult<InitiationResult>;

    /// Actively query the outcome of a previously initiated request, used
    /// when a callback may have been lost.
    async fn query_status(&self, correlation_id: &str) -> AppResult<StatusQueryResult>;

    /// Validate an inbound callback payload: schema first, then authenticity.
    ///
    /// This is the only path from raw bytes to a structured callback, and it
    /// fails closed: a payload that cannot be authenticated is rejected with
    /// `CallbackAuthenticity`, never merely logged. Callbacks arrive over an
    /// unauthenticated public endpoint.
    fn validate_callback(
        &self,
        kind: CallbackKind,
        payload: &[u8],
        signature: Option<&str>,
    ) -> AppResult<CallbackEvent>;
}
