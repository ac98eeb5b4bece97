//! Runtime configuration endpoints: read the current config, apply a
//! partial update. Updates are validated before they take effect.

use crate::error::AppError;
use crate::state::AppState;
use actix_web::{web, HttpResponse, Result as ActixResult};
use serde_json::json;
use tracing::info;

pub async fn get_config(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.get_config())
}

pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Bytes,
) -> ActixResult<HttpResponse> {
    let json_str = std::str::from_utf8(&body)
        .map_err(|e| AppError::InvalidState(format!("invalid UTF-8 body: {}", e)))?;

    let mut config = state.get_config();
    config
        .update_from_json(json_str)
        .map_err(|e| AppError::ConfigError(e.to_string()))?;
    state
        .update_config(config)
        .map_err(AppError::ConfigError)?;

    info!("Runtime configuration updated");
    Ok(HttpResponse::Ok().json(json!({
        "status": "updated",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}
