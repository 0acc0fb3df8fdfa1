use chrono::Utc;
use sea_orm::{ActiveModelTrait, EntityTrait, Set, TransactionTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::audit_log_entry::AuditAction,
    entities::batch_item::{
        self, ActiveModel as BatchItemActiveModel, Model as BatchItemModel,
    },
    entities::product::{Entity as ProductEntity, Model as ProductModel},
    errors::ServiceError,
    events::{Event, EventSender},
    services::allocation::{AllocationReport, AllocationService},
    services::audit::{self, NewAuditEntry},
};

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateBatchItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be positive"))]
    pub quantity: i32,
    /// Container the produced goods were packed into
    pub container_code: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateBatchRequest {
    #[validate(length(min = 1, message = "Batch must have at least one item"))]
    pub items: Vec<CreateBatchItemRequest>,
    /// Actor the batch and its allocations are attributed to
    pub created_by: Uuid,
}

/// One created batch item together with the outcome of its allocation run.
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchItemResult {
    pub batch_item: BatchItemModel,
    pub allocation: AllocationReport,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchCreationResponse {
    pub batch_id: Uuid,
    pub items: Vec<BatchItemResult>,
}

/// Creates production batches and triggers the allocation run for each item.
#[derive(Clone)]
pub struct BatchService {
    db: Arc<DbPool>,
    allocation: AllocationService,
    event_sender: Option<Arc<EventSender>>,
}

impl BatchService {
    pub fn new(
        db: Arc<DbPool>,
        allocation: AllocationService,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db,
            allocation,
            event_sender,
        }
    }

    /// Creates the batch items, then allocates each exactly once.
    ///
    /// Batch creation succeeds even when an allocation run reports an error;
    /// the caller sees the error inside the per-item report and treats it as
    /// a warning, not a failed request.
    #[instrument(skip(self, request), fields(item_count = request.items.len(), actor = %request.created_by))]
    pub async fn create_batch(
        &self,
        request: CreateBatchRequest,
    ) -> Result<BatchCreationResponse, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;
        for item in &request.items {
            item.validate()
                .map_err(|e| ServiceError::ValidationError(e.to_string()))?;
        }

        let db = &*self.db;

        // Resolve products up front; an unknown product fails the whole
        // request before anything is written.
        let mut products: Vec<ProductModel> = Vec::with_capacity(request.items.len());
        for item in &request.items {
            let product = ProductEntity::find_by_id(item.product_id)
                .one(db)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Product {} not found", item.product_id))
                })?;
            products.push(product);
        }

        let batch_id = Uuid::new_v4();
        let now = Utc::now();
        let txn = db.begin().await?;

        let mut created: Vec<BatchItemModel> = Vec::with_capacity(request.items.len());
        for (item, product) in request.items.iter().zip(&products) {
            let model = BatchItemActiveModel {
                id: Set(Uuid::new_v4()),
                batch_id: Set(batch_id),
                product_id: Set(item.product_id),
                quantity: Set(item.quantity),
                container_code: Set(item.container_code.clone()),
                // Deprecated column; the assignment table is authoritative.
                order_item_id: Set(None),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;

            audit::append(
                &txn,
                NewAuditEntry {
                    action: AuditAction::CreateBatch,
                    description: format!(
                        "Produced {} x {} (batch item {})",
                        item.quantity, product.name, model.id
                    ),
                    quantity: Some(item.quantity),
                    user_id: request.created_by,
                    order_id: None,
                    product_id: Some(item.product_id),
                    batch_item_id: Some(model.id),
                },
            )
            .await?;

            created.push(model);
        }

        txn.commit().await?;

        info!(batch_id = %batch_id, items = created.len(), "Batch created");

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender
                .send(Event::BatchCreated {
                    batch_id,
                    item_count: created.len(),
                })
                .await
            {
                warn!(error = %e, batch_id = %batch_id, "Failed to send batch created event");
            }
        }

        // Allocation runs once per batch item, after creation has committed,
        // with the creating user as the audit actor.
        let mut results = Vec::with_capacity(created.len());
        for (model, product) in created.into_iter().zip(&products) {
            let allocation = self
                .allocation
                .allocate_batch_item(&model, &product.name, request.created_by)
                .await;

            if let Some(err) = &allocation.error {
                warn!(
                    batch_item_id = %model.id,
                    error = %err,
                    "Allocation run reported an error; batch creation continues"
                );
            }

            results.push(BatchItemResult {
                batch_item: model,
                allocation,
            });
        }

        Ok(BatchCreationResponse {
            batch_id,
            items: results,
        })
    }

    /// Fetches the batch items of one batch.
    #[instrument(skip(self), fields(batch_id = %batch_id))]
    pub async fn get_batch_items(
        &self,
        batch_id: Uuid,
    ) -> Result<Vec<BatchItemModel>, ServiceError> {
        use sea_orm::{ColumnTrait, QueryFilter};

        let items = batch_item::Entity::find()
            .filter(batch_item::Column::BatchId.eq(batch_id))
            .all(&*self.db)
            .await?;

        if items.is_empty() {
            return Err(ServiceError::NotFound(format!(
                "Batch {} not found",
                batch_id
            )));
        }

        Ok(items)
    }
}
