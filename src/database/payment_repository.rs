use crate::database::error::{DatabaseError, DbResult};
use crate::database::repository::{PaymentStore, TransitionDetails};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Payment lifecycle status.
///
/// PENDING and PROCESSING are the only non-terminal states. REFUNDED and
/// PARTIALLY_REFUNDED apply to COLLECTION records only and are reached from
/// COMPLETED when disbursements referencing the record settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Refunded,
    PartiallyRefunded,
}

impl PaymentStatus {
    /// Valid transitions from this status
    pub fn valid_transitions(&self) -> Vec<PaymentStatus> {
        match self {
            PaymentStatus::Pending => vec![PaymentStatus::Processing, PaymentStatus::Failed],
            PaymentStatus::Processing => vec![
                PaymentStatus::Completed,
                PaymentStatus::Failed,
                PaymentStatus::Cancelled,
            ],
            // Refund settlement is the only path out of COMPLETED
            PaymentStatus::Completed => {
                vec![PaymentStatus::Refunded, PaymentStatus::PartiallyRefunded]
            }
            PaymentStatus::PartiallyRefunded => {
                vec![PaymentStatus::Refunded, PaymentStatus::PartiallyRefunded]
            }
            PaymentStatus::Failed | PaymentStatus::Cancelled | PaymentStatus::Refunded => vec![],
        }
    }

    /// Whether the record's own lifecycle is finished: callbacks and status
    /// queries must no longer move it
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending | PaymentStatus::Processing)
    }

    pub fn can_transition_to(&self, target: PaymentStatus) -> bool {
        self.valid_transitions().contains(&target)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::PartiallyRefunded => "partially_refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "processing" => Some(PaymentStatus::Processing),
            "completed" => Some(PaymentStatus::Completed),
            "failed" => Some(PaymentStatus::Failed),
            "cancelled" => Some(PaymentStatus::Cancelled),
            "refunded" => Some(PaymentStatus::Refunded),
            "partially_refunded" => Some(PaymentStatus::PartiallyRefunded),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Money movement direction: customer-to-firm or firm-to-customer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentDirection {
    Collection,
    Disbursement,
}

impl PaymentDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentDirection::Collection => "collection",
            PaymentDirection::Disbursement => "disbursement",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "collection" => Some(PaymentDirection::Collection),
            "disbursement" => Some(PaymentDirection::Disbursement),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the payment is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentPurpose {
    ConsultationFee,
    CaseFee,
    DocumentFee,
    CourtFee,
    Refund,
    Other,
}

impl PaymentPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentPurpose::ConsultationFee => "consultation_fee",
            PaymentPurpose::CaseFee => "case_fee",
            PaymentPurpose::DocumentFee => "document_fee",
            PaymentPurpose::CourtFee => "court_fee",
            PaymentPurpose::Refund => "refund",
            PaymentPurpose::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "consultation_fee" => Some(PaymentPurpose::ConsultationFee),
            "case_fee" => Some(PaymentPurpose::CaseFee),
            "document_fee" => Some(PaymentPurpose::DocumentFee),
            "court_fee" => Some(PaymentPurpose::CourtFee),
            "refund" => Some(PaymentPurpose::Refund),
            "other" => Some(PaymentPurpose::Other),
            _ => None,
        }
    }
}

/// One customer-facing payment or refund attempt
#[derive(Debug, Clone, Serialize)]
pub struct PaymentRecord {
    pub id: Uuid,
    /// Gateway-issued request identifier, assigned once on acceptance and
    /// immutable afterwards
    pub correlation_id: Option<String>,
    pub direction: PaymentDirection,
    pub status: PaymentStatus,
    /// Positive integer in minor currency units
    pub amount: i64,
    pub currency: String,
    /// Payer phone number in the gateway's native format
    pub payer_reference: String,
    pub purpose: PaymentPurpose,
    pub description: Option<String>,
    /// On refunds, points at the original collection
    pub related_payment_id: Option<Uuid>,
    /// Cumulative successfully refunded amount (collections only)
    pub refunded_amount: i64,
    pub gateway_receipt_id: Option<String>,
    pub settled_at: Option<DateTime<Utc>>,
    pub failure_code: Option<String>,
    pub failure_reason: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRecord {
    /// Build a fresh PENDING record; ids are generated here, the gateway
    /// correlation id is assigned later on acceptance.
    pub fn new_pending(
        direction: PaymentDirection,
        amount: i64,
        currency: String,
        payer_reference: String,
        purpose: PaymentPurpose,
        description: Option<String>,
        related_payment_id: Option<Uuid>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            correlation_id: None,
            direction,
            status: PaymentStatus::Pending,
            amount,
            currency,
            payer_reference,
            purpose,
            description,
            related_payment_id,
            refunded_amount: 0,
            gateway_receipt_id: None,
            settled_at: None,
            failure_code: None,
            failure_reason: None,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Amount still refundable on a collection record
    pub fn refundable_remainder(&self) -> i64 {
        self.amount - self.refunded_amount
    }
}

// Row shape as stored; enums travel as text columns
#[derive(Debug, FromRow)]
struct PaymentRow {
    id: Uuid,
    correlation_id: Option<String>,
    direction: String,
    status: String,
    amount: i64,
    currency: String,
    payer_reference: String,
    purpose: String,
    description: Option<String>,
    related_payment_id: Option<Uuid>,
    refunded_amount: i64,
    gateway_receipt_id: Option<String>,
    settled_at: Option<DateTime<Utc>>,
    failure_code: Option<String>,
    failure_reason: Option<String>,
    metadata: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for PaymentRecord {
    type Error = DatabaseError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let direction = PaymentDirection::parse(&row.direction).ok_or_else(|| {
            DatabaseError::new(crate::database::error::DatabaseErrorKind::QueryError {
                message: format!("unrecognized payment direction '{}'", row.direction),
            })
        })?;
        let status = PaymentStatus::parse(&row.status).ok_or_else(|| {
            DatabaseError::new(crate::database::error::DatabaseErrorKind::QueryError {
                message: format!("unrecognized payment status '{}'", row.status),
            })
        })?;
        let purpose = PaymentPurpose::parse(&row.purpose).ok_or_else(|| {
            DatabaseError::new(crate::database::error::DatabaseErrorKind::QueryError {
                message: format!("unrecognized payment purpose '{}'", row.purpose),
            })
        })?;

        Ok(PaymentRecord {
            id: row.id,
            correlation_id: row.correlation_id,
            direction,
            status,
            amount: row.amount,
            currency: row.currency,
            payer_reference: row.payer_reference,
            purpose,
            description: row.description,
            related_payment_id: row.related_payment_id,
            refunded_amount: row.refunded_amount,
            gateway_receipt_id: row.gateway_receipt_id,
            settled_at: row.settled_at,
            failure_code: row.failure_code,
            failure_reason: row.failure_reason,
            metadata: row.metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const PAYMENT_COLUMNS: &str = "id, correlation_id, direction, status, amount, currency, \
     payer_reference, purpose, description, related_payment_id, refunded_amount, \
     gateway_receipt_id, settled_at, failure_code, failure_reason, metadata, \
     created_at, updated_at";

/// Postgres-backed payment record store
pub struct PaymentRepository {
    pool: PgPool,
}

impl PaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentStore for PaymentRepository {
    async fn create(&self, record: &PaymentRecord) -> DbResult<PaymentRecord> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "INSERT INTO payment_records \
             (id, correlation_id, direction, status, amount, currency, payer_reference, \
              purpose, description, related_payment_id, refunded_amount, gateway_receipt_id, \
              settled_at, failure_code, failure_reason, metadata, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18) \
             RETURNING {PAYMENT_COLUMNS}",
        ))
        .bind(record.id)
        .bind(&record.correlation_id)
        .bind(record.direction.as_str())
        .bind(record.status.as_str())
        .bind(record.amount)
        .bind(&record.currency)
        .bind(&record.payer_reference)
        .bind(record.purpose.as_str())
        .bind(&record.description)
        .bind(record.related_payment_id)
        .bind(record.refunded_amount)
        .bind(&record.gateway_receipt_id)
        .bind(record.settled_at)
        .bind(&record.failure_code)
        .bind(&record.failure_reason)
        .bind(&record.metadata)
        .bind(record.created_at)
        .bind(record.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        PaymentRecord::try_from(row)
    }

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<PaymentRecord>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payment_records WHERE id = $1",
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(PaymentRecord::try_from).transpose()
    }

    async fn find_by_correlation_id(
        &self,
        direction: PaymentDirection,
        correlation_id: &str,
    ) -> DbResult<Option<PaymentRecord>> {
        // Collections and disbursements carry distinct correlation-id
        // namespaces; match within one only
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payment_records \
             WHERE direction = $1 AND correlation_id = $2",
        ))
        .bind(direction.as_str())
        .bind(correlation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(PaymentRecord::try_from).transpose()
    }

    async fn assign_correlation(&self, id: Uuid, correlation_id: &str) -> DbResult<PaymentRecord> {
        // correlation_id is write-once; the guard keeps it immutable
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "UPDATE payment_records SET correlation_id = $2, updated_at = NOW() \
             WHERE id = $1 AND correlation_id IS NULL \
             RETURNING {PAYMENT_COLUMNS}",
        ))
        .bind(id)
        .bind(correlation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or_else(|| {
            DatabaseError::stale_status(id, "without correlation id")
                .with_context("correlation id already assigned")
        })?;

        PaymentRecord::try_from(row)
    }

    async fn transition(
        &self,
        id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
        details: TransitionDetails,
    ) -> DbResult<PaymentRecord> {
        // Guarded compare-and-set: a racing writer that already moved the
        // record makes this match zero rows instead of clobbering it
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "UPDATE payment_records SET status = $3, \
                gateway_receipt_id = COALESCE($4, gateway_receipt_id), \
                settled_at = COALESCE($5, settled_at), \
                failure_code = COALESCE($6, failure_code), \
                failure_reason = COALESCE($7, failure_reason), \
                updated_at = NOW() \
             WHERE id = $1 AND status = $2 \
             RETURNING {PAYMENT_COLUMNS}",
        ))
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(&details.gateway_receipt_id)
        .bind(details.settled_at)
        .bind(&details.failure_code)
        .bind(&details.failure_reason)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or_else(|| DatabaseError::stale_status(id, from.as_str()))?;

        PaymentRecord::try_from(row)
    }

    async fn record_refund_progress(
        &self,
        id: Uuid,
        refunded_amount: i64,
        status: PaymentStatus,
    ) -> DbResult<PaymentRecord> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "UPDATE payment_records SET refunded_amount = $2, status = $3, updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {PAYMENT_COLUMNS}",
        ))
        .bind(id)
        .bind(refunded_amount)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or_else(|| DatabaseError::not_found("PaymentRecord", id))?;

        PaymentRecord::try_from(row)
    }

    async fn refund_exposure(&self, original_id: Uuid) -> DbResult<i64> {
        // Successful plus in-flight disbursements; in-flight amounts count
        // so concurrent refunds cannot jointly over-commit the remainder
        let exposure = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(amount), 0) FROM payment_records \
             WHERE related_payment_id = $1 AND direction = 'disbursement' \
               AND status IN ('pending', 'processing', 'completed')",
        )
        .bind(original_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(exposure)
    }
}
