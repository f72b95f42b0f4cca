//! Payment endpoints
//!
//! Staff-facing routes carry the caller's identity in `x-actor-id` /
//! `x-actor-role` headers resolved by the auth proxy in front of this
//! service. The gateway callback routes are public and accept raw bodies:
//! signature verification runs over the exact bytes received.

use axum::async_trait;
use axum::body::Bytes;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::api::AppState;
use crate::database::payment_repository::PaymentPurpose;
use crate::error::{AppError, AppResult, DomainError, ValidationError};
use crate::orchestrator::{Actor, InitiateCollectionRequest};

const SIGNATURE_HEADER: &str = "x-gateway-signature";

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .filter(|v| !v.is_empty())
        };

        match (header("x-actor-id"), header("x-actor-role")) {
            (Some(id), Some(role)) => Ok(Actor { id, role }),
            _ => Err(AppError::domain(DomainError::Forbidden {
                actor_id: "anonymous".to_string(),
                role: "none".to_string(),
            })),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateCollectionBody {
    pub payer_reference: String,
    /// Minor currency units
    pub amount: i64,
    pub purpose: String,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRefundBody {
    /// Omitted means the full refundable remainder
    pub amount: Option<i64>,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct RecentLedgerParams {
    pub limit: Option<i64>,
}

pub async fn create_collection(
    State(state): State<AppState>,
    actor: Actor,
    Json(body): Json<CreateCollectionBody>,
) -> AppResult<Response> {
    let purpose = PaymentPurpose::parse(&body.purpose).ok_or_else(|| {
        AppError::validation(ValidationError::UnknownPurpose {
            purpose: body.purpose.clone(),
        })
    })?;

    info!(actor_id = %actor.id, amount = body.amount, "collection requested");

    let initiated = state
        .orchestrator
        .initiate_collection(InitiateCollectionRequest {
            payer_reference: body.payer_reference,
            amount: body.amount,
            purpose,
            description: body.description,
            metadata: body.metadata,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(initiated)).into_response())
}

pub async fn get_payment(
    State(state): State<AppState>,
    _actor: Actor,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let record = state.orchestrator.find_payment(id).await?;
    Ok(Json(record).into_response())
}

/// Unlike [`get_payment`], this actively polls the gateway for records still
/// in flight
pub async fn get_payment_status(
    State(state): State<AppState>,
    _actor: Actor,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let record = state.orchestrator.query_status(id).await?;
    Ok(Json(json!({
        "payment_id": record.id,
        "status": record.status,
        "amount": record.amount,
        "refunded_amount": record.refunded_amount,
        "gateway_receipt_id": record.gateway_receipt_id,
        "settled_at": record.settled_at,
        "failure_code": record.failure_code,
        "failure_reason": record.failure_reason,
    }))
    .into_response())
}

pub async fn get_payment_ledger(
    State(state): State<AppState>,
    _actor: Actor,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let entries = state.orchestrator.payment_ledger(id).await?;
    Ok(Json(json!({ "payment_id": id, "entries": entries })).into_response())
}

pub async fn create_refund(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<Uuid>,
    Json(body): Json<CreateRefundBody>,
) -> AppResult<Response> {
    let initiated = state
        .orchestrator
        .initiate_refund(&actor, id, body.amount, body.reason)
        .await?;

    Ok(refund_response(initiated))
}

/// Operator view over the most recent gateway exchanges
pub async fn get_recent_ledger(
    State(state): State<AppState>,
    _actor: Actor,
    Query(params): Query<RecentLedgerParams>,
) -> AppResult<Response> {
    let entries = state
        .orchestrator
        .recent_ledger(params.limit.unwrap_or(50))
        .await?;
    Ok(Json(json!({ "entries": entries })).into_response())
}

fn refund_response(initiated: crate::orchestrator::RefundInitiated) -> Response {
    Json(initiated).into_response()
}

pub async fn collection_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    let signature = signature_header(&headers);
    let result = state
        .orchestrator
        .handle_collection_callback(&body, signature.as_deref())
        .await;
    callback_response(result)
}

pub async fn disbursement_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    let signature = signature_header(&headers);
    let result = state
        .orchestrator
        .handle_disbursement_callback(&body, signature.as_deref())
        .await;
    callback_response(result)
}

fn signature_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Authentic callbacks get a 200 even when they match no record: the
/// delivery itself was fine and a retry cannot change the outcome. Anything
/// else surfaces as the error's own status so the gateway retries.
fn callback_response(
    result: AppResult<crate::orchestrator::CallbackAck>,
) -> AppResult<Response> {
    match result {
        Ok(ack) => Ok(Json(json!({
            "status": "accepted",
            "payment_id": ack.payment_id,
            "duplicate": ack.duplicate,
        }))
        .into_response()),
        Err(err) if err.code() == "UNKNOWN_CORRELATION_ID" => {
            Ok(Json(json!({ "status": "ignored" })).into_response())
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExternalError;
    use crate::orchestrator::{CallbackAck, RefundInitiated};

    #[test]
    fn test_refund_acknowledged_with_200() {
        let response = refund_response(RefundInitiated {
            refund_payment_id: Uuid::new_v4(),
            correlation_id: "DR-1".to_string(),
        });
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_orphan_callback_gets_200_ignored() {
        let result: AppResult<CallbackAck> =
            Err(AppError::domain(DomainError::ReconciliationMismatch {
                correlation_id: "CR-UNKNOWN".to_string(),
            }));
        let response = callback_response(result).unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_unauthentic_callback_error_propagates() {
        let result: AppResult<CallbackAck> =
            Err(AppError::external(ExternalError::CallbackAuthenticity));
        assert!(callback_response(result).is_err());
    }
}
