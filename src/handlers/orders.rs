use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::services::orders::CreateOrderRequest;
use crate::{errors::ServiceError, AppState, ListQuery};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order).get(list_orders))
        .route("/:id", get(get_order).delete(delete_order))
        .route("/:id/cancel", post(cancel_order))
}

async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.create_order(request).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .get_order(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))?;
    Ok(Json(order))
}

async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let page = state
        .services
        .orders
        .list_orders(query.page(), query.per_page())
        .await?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
struct CancelOrderRequest {
    actor: Uuid,
    reason: Option<String>,
}

async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<CancelOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .cancel_order(id, request.actor, request.reason)
        .await?;
    Ok(Json(order))
}

#[derive(Debug, Deserialize)]
struct DeleteParams {
    actor: Uuid,
}

async fn delete_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<DeleteParams>,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.orders.delete_order(id, params.actor).await?;
    Ok(StatusCode::NO_CONTENT)
}
