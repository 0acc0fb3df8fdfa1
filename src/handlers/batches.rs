use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use crate::services::batches::CreateBatchRequest;
use crate::{errors::ServiceError, AppState};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_batch))
        .route("/:id/items", get(get_batch_items))
}

/// Creates a production batch and returns the allocation outcome per item.
///
/// A batch is created even when an allocation run reports an error; the
/// report's `error` field is the soft warning the UI surfaces.
async fn create_batch(
    State(state): State<AppState>,
    Json(request): Json<CreateBatchRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let response = state.services.batches.create_batch(request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

async fn get_batch_items(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let items = state.services.batches.get_batch_items(id).await?;
    Ok(Json(items))
}
