use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use crate::services::products::{CreateProductRequest, UpdateProductRequest};
use crate::{errors::ServiceError, AppState, ListQuery};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_product).get(list_products))
        .route(
            "/:id",
            get(get_product).put(update_product).delete(delete_product),
        )
}

async fn create_product(
    State(state): State<AppState>,
    Json(request): Json<CreateProductRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let product = state.services.products.create_product(request).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let product = state
        .services
        .products
        .get_product(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", id)))?;
    Ok(Json(product))
}

async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let page = state
        .services
        .products
        .list_products(query.page(), query.per_page())
        .await?;
    Ok(Json(page))
}

async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateProductRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let product = state.services.products.update_product(id, request).await?;
    Ok(Json(product))
}

#[derive(Debug, serde::Deserialize)]
struct DeleteParams {
    actor: Uuid,
}

async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<DeleteParams>,
) -> Result<impl IntoResponse, ServiceError> {
    state
        .services
        .products
        .delete_product(id, params.actor)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
