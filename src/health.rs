use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": "interview-panel-backend",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "sessions": {
            "enrolled": state.store.session_count(),
            "active_connections": metrics.active_connections,
            "completed": metrics.sessions_completed
        },
        "collaborators": {
            "transcriber": config.models.transcriber,
            "analyzer": config.models.analyzer_url,
            "analyzer_model": config.models.analyzer_model
        }
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "connections": {
            "active": metrics.active_connections
        },
        "jobs": {
            "dispatched": metrics.jobs_dispatched,
            "degraded": metrics.jobs_degraded,
            "degraded_rate": if metrics.jobs_dispatched > 0 {
                metrics.jobs_degraded as f64 / metrics.jobs_dispatched as f64
            } else {
                0.0
            }
        },
        "interviews": {
            "enrolled": state.store.session_count(),
            "turns_finalized": metrics.turns_finalized,
            "completed": metrics.sessions_completed
        }
    }))
}
