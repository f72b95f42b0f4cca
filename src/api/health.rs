use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::database;

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub environment: String,
    pub database: String,
    pub pool_size: u32,
    pub pool_idle: u32,
    pub gateway_configured: bool,
}

pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, StatusCode> {
    let version = env!("CARGO_PKG_VERSION").to_string();

    let database = match database::health_check(&state.pool).await {
        Ok(()) => "up".to_string(),
        Err(_) => "down".to_string(),
    };
    let pool_stats = database::get_pool_stats(&state.pool);

    let gateway = &state.config.gateway;
    let gateway_configured = !gateway.base_url.is_empty()
        && !gateway.consumer_key.is_empty()
        && !gateway.shortcode.is_empty();

    let response = HealthResponse {
        status: if database == "up" {
            "healthy".to_string()
        } else {
            "degraded".to_string()
        },
        version,
        environment: state.config.server.environment.clone(),
        database,
        pool_size: pool_stats.size,
        pool_idle: pool_stats.num_idle,
        gateway_configured,
    };

    Ok(Json(response))
}
