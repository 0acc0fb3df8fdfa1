use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::services::audit::AuditLogFilter;
use crate::{errors::ServiceError, AppState};

pub fn routes() -> Router<AppState> {
    Router::new().route("/", get(list_audit_log))
}

#[derive(Debug, Deserialize)]
struct AuditLogQuery {
    order_id: Option<Uuid>,
    product_id: Option<Uuid>,
    page: Option<u64>,
    per_page: Option<u64>,
}

async fn list_audit_log(
    State(state): State<AppState>,
    Query(query): Query<AuditLogQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let filter = AuditLogFilter {
        order_id: query.order_id,
        product_id: query.product_id,
        action: None,
    };

    let page = state
        .services
        .audit
        .list(
            filter,
            query.page.unwrap_or(1),
            query.per_page.unwrap_or(50).min(200),
        )
        .await?;

    Ok(Json(page))
}
