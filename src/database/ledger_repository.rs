use crate::database::error::{DatabaseError, DbResult};
use crate::database::repository::LedgerStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// The kind of gateway exchange a ledger entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryType {
    CollectionRequest,
    CollectionCallback,
    DisbursementRequest,
    DisbursementCallback,
    StatusQuery,
    /// Callback that matched no known correlation id
    OrphanCallback,
    /// Callback rejected for schema or authenticity failure
    RejectedCallback,
}

impl LedgerEntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerEntryType::CollectionRequest => "collection_request",
            LedgerEntryType::CollectionCallback => "collection_callback",
            LedgerEntryType::DisbursementRequest => "disbursement_request",
            LedgerEntryType::DisbursementCallback => "disbursement_callback",
            LedgerEntryType::StatusQuery => "status_query",
            LedgerEntryType::OrphanCallback => "orphan_callback",
            LedgerEntryType::RejectedCallback => "rejected_callback",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "collection_request" => Some(LedgerEntryType::CollectionRequest),
            "collection_callback" => Some(LedgerEntryType::CollectionCallback),
            "disbursement_request" => Some(LedgerEntryType::DisbursementRequest),
            "disbursement_callback" => Some(LedgerEntryType::DisbursementCallback),
            "status_query" => Some(LedgerEntryType::StatusQuery),
            "orphan_callback" => Some(LedgerEntryType::OrphanCallback),
            "rejected_callback" => Some(LedgerEntryType::RejectedCallback),
            _ => None,
        }
    }
}

/// One distinct exchange with the gateway, request and response captured
/// verbatim for offline replay
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub transaction_type: LedgerEntryType,
    pub related_payment_id: Option<Uuid>,
    pub request_payload: serde_json::Value,
    pub response_payload: Option<serde_json::Value>,
    pub success: bool,
    pub duration_ms: Option<i64>,
    pub gateway_code: Option<String>,
    pub gateway_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Entry as handed to `append`; id and timestamp are assigned by the store
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub transaction_type: LedgerEntryType,
    pub related_payment_id: Option<Uuid>,
    pub request_payload: serde_json::Value,
    pub response_payload: Option<serde_json::Value>,
    pub success: bool,
    pub duration_ms: Option<i64>,
    pub gateway_code: Option<String>,
    pub gateway_message: Option<String>,
}

#[derive(Debug, FromRow)]
struct LedgerRow {
    id: Uuid,
    transaction_type: String,
    related_payment_id: Option<Uuid>,
    request_payload: serde_json::Value,
    response_payload: Option<serde_json::Value>,
    success: bool,
    duration_ms: Option<i64>,
    gateway_code: Option<String>,
    gateway_message: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<LedgerRow> for LedgerEntry {
    type Error = DatabaseError;

    fn try_from(row: LedgerRow) -> Result<Self, Self::Error> {
        let transaction_type = LedgerEntryType::parse(&row.transaction_type).ok_or_else(|| {
            DatabaseError::new(crate::database::error::DatabaseErrorKind::QueryError {
                message: format!("unrecognized ledger entry type '{}'", row.transaction_type),
            })
        })?;

        Ok(LedgerEntry {
            id: row.id,
            transaction_type,
            related_payment_id: row.related_payment_id,
            request_payload: row.request_payload,
            response_payload: row.response_payload,
            success: row.success,
            duration_ms: row.duration_ms,
            gateway_code: row.gateway_code,
            gateway_message: row.gateway_message,
            created_at: row.created_at,
        })
    }
}

const LEDGER_COLUMNS: &str = "id, transaction_type, related_payment_id, request_payload, \
     response_payload, success, duration_ms, gateway_code, gateway_message, created_at";

/// Append-only audit store of every gateway exchange.
///
/// No update or delete is exposed, here or on the `LedgerStore` trait.
pub struct LedgerRepository {
    pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for LedgerRepository {
    async fn append(&self, entry: NewLedgerEntry) -> DbResult<LedgerEntry> {
        let row = sqlx::query_as::<_, LedgerRow>(&format!(
            "INSERT INTO ledger_entries \
             (id, transaction_type, related_payment_id, request_payload, response_payload, \
              success, duration_ms, gateway_code, gateway_message, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW()) \
             RETURNING {LEDGER_COLUMNS}",
        ))
        .bind(Uuid::new_v4())
        .bind(entry.transaction_type.as_str())
        .bind(entry.related_payment_id)
        .bind(&entry.request_payload)
        .bind(&entry.response_payload)
        .bind(entry.success)
        .bind(entry.duration_ms)
        .bind(&entry.gateway_code)
        .bind(&entry.gateway_message)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        LedgerEntry::try_from(row)
    }

    async fn find_by_payment_id(&self, payment_id: Uuid) -> DbResult<Vec<LedgerEntry>> {
        let rows = sqlx::query_as::<_, LedgerRow>(&format!(
            "SELECT {LEDGER_COLUMNS} FROM ledger_entries \
             WHERE related_payment_id = $1 ORDER BY created_at ASC",
        ))
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        rows.into_iter().map(LedgerEntry::try_from).collect()
    }

    async fn find_recent(&self, limit: i64) -> DbResult<Vec<LedgerEntry>> {
        let rows = sqlx::query_as::<_, LedgerRow>(&format!(
            "SELECT {LEDGER_COLUMNS} FROM ledger_entries \
             ORDER BY created_at DESC LIMIT $1",
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        rows.into_iter().map(LedgerEntry::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_type_round_trip() {
        for entry_type in [
            LedgerEntryType::CollectionRequest,
            LedgerEntryType::CollectionCallback,
            LedgerEntryType::DisbursementRequest,
            LedgerEntryType::DisbursementCallback,
            LedgerEntryType::StatusQuery,
            LedgerEntryType::OrphanCallback,
            LedgerEntryType::RejectedCallback,
        ] {
            assert_eq!(LedgerEntryType::parse(entry_type.as_str()), Some(entry_type));
        }
        assert_eq!(LedgerEntryType::parse("update"), None);
    }
}
