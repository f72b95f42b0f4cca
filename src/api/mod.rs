//! HTTP surface
//!
//! Thin handlers over the orchestrator: extract, delegate, serialize. The
//! callback routes are the only unauthenticated endpoints; everything they
//! accept is re-validated by the gateway adapter before any record is
//! touched.

pub mod health;
pub mod payments;

use crate::config::Config;
use crate::orchestrator::PaymentOrchestrator;
use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub pool: PgPool,
    pub orchestrator: Arc<PaymentOrchestrator>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/payments/collections", post(payments::create_collection))
        .route(
            "/payments/collections/callback",
            post(payments::collection_callback),
        )
        .route(
            "/payments/refunds/callback",
            post(payments::disbursement_callback),
        )
        .route("/ledger/recent", get(payments::get_recent_ledger))
        .route("/payments/:id", get(payments::get_payment))
        .route("/payments/:id/status", get(payments::get_payment_status))
        .route("/payments/:id/ledger", get(payments::get_payment_ledger))
        .route("/payments/:id/refunds", post(payments::create_refund))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}
