use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use sea_orm::{ConnectionTrait, Statement};
use serde::Serialize;
use utoipa::ToSchema;

use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/", get(health_check))
}

#[derive(Debug, Serialize, ToSchema)]
struct HealthResponse {
    status: &'static str,
    database: &'static str,
    timestamp: String,
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let db_backend = state.db.get_database_backend();
    let ping = state
        .db
        .execute(Statement::from_string(db_backend, "SELECT 1"))
        .await;

    let (status_code, database) = match ping {
        Ok(_) => (StatusCode::OK, "up"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "down"),
    };

    let body = HealthResponse {
        status: if database == "up" { "ok" } else { "degraded" },
        database,
        timestamp: Utc::now().to_rfc3339(),
    };

    (status_code, Json(body))
}
