use crate::database::error::DbResult;
use crate::database::ledger_repository::{LedgerEntry, NewLedgerEntry};
use crate::database::payment_repository::{PaymentDirection, PaymentRecord, PaymentStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Fields captured alongside a status transition
#[derive(Debug, Clone, Default)]
pub struct TransitionDetails {
    pub gateway_receipt_id: Option<String>,
    pub settled_at: Option<DateTime<Utc>>,
    pub failure_code: Option<String>,
    pub failure_reason: Option<String>,
}

impl TransitionDetails {
    pub fn settlement(receipt_id: String, settled_at: Option<DateTime<Utc>>) -> Self {
        Self {
            gateway_receipt_id: Some(receipt_id),
            settled_at,
            ..Self::default()
        }
    }

    pub fn failure(code: String, reason: String) -> Self {
        Self {
            failure_code: Some(code),
            failure_reason: Some(reason),
            ..Self::default()
        }
    }
}

/// The mutable payment record store. The orchestrator is the only writer.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn create(&self, record: &PaymentRecord) -> DbResult<PaymentRecord>;

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<PaymentRecord>>;

    /// Look up by gateway correlation id within one direction's namespace
    async fn find_by_correlation_id(
        &self,
        direction: PaymentDirection,
        correlation_id: &str,
    ) -> DbResult<Option<PaymentRecord>>;

    /// Assign the gateway correlation id; fails if one is already set
    async fn assign_correlation(&self, id: Uuid, correlation_id: &str) -> DbResult<PaymentRecord>;

    /// Compare-and-set status transition. Fails with a stale-status error if
    /// the record is no longer in `from`, so a lost race never overwrites a
    /// terminal status.
    async fn transition(
        &self,
        id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
        details: TransitionDetails,
    ) -> DbResult<PaymentRecord>;

    /// Update a collection's cumulative refunded amount and recomputed status
    async fn record_refund_progress(
        &self,
        id: Uuid,
        refunded_amount: i64,
        status: PaymentStatus,
    ) -> DbResult<PaymentRecord>;

    /// Sum of disbursement amounts already committed against a collection:
    /// successful refunds plus refunds still in flight
    async fn refund_exposure(&self, original_id: Uuid) -> DbResult<i64>;
}

/// The append-only transaction ledger. Deliberately exposes no update or
/// delete: append-only is a property of the interface, not a convention.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn append(&self, entry: NewLedgerEntry) -> DbResult<LedgerEntry>;

    async fn find_by_payment_id(&self, payment_id: Uuid) -> DbResult<Vec<LedgerEntry>>;

    async fn find_recent(&self, limit: i64) -> DbResult<Vec<LedgerEntry>>;
}
