use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::audit_log_entry::AuditAction,
    entities::order_item,
    entities::product::{
        self, ActiveModel as ProductActiveModel, Entity as ProductEntity, Model as ProductModel,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::audit::{self, NewAuditEntry},
};

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 255, message = "Product name is required"))]
    pub name: String,
    #[validate(length(min = 1, max = 100, message = "SKU is required"))]
    pub sku: String,
    pub description: Option<String>,
    pub created_by: Uuid,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdateProductRequest {
    #[validate(length(min = 1, max = 255, message = "Product name is required"))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub updated_by: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProductListResponse {
    pub products: Vec<ProductModel>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

#[derive(Clone)]
pub struct ProductService {
    db: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl ProductService {
    pub fn new(db: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self { db, event_sender }
    }

    #[instrument(skip(self, request), fields(sku = %request.sku))]
    pub async fn create_product(
        &self,
        request: CreateProductRequest,
    ) -> Result<ProductModel, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let db = &*self.db;

        let existing = ProductEntity::find()
            .filter(product::Column::Sku.eq(request.sku.clone()))
            .one(db)
            .await?;
        if existing.is_some() {
            return Err(ServiceError::Conflict(format!(
                "A product with SKU {} already exists",
                request.sku
            )));
        }

        let txn = db.begin().await?;
        let product_id = Uuid::new_v4();

        let model = ProductActiveModel {
            id: Set(product_id),
            name: Set(request.name.clone()),
            sku: Set(request.sku),
            description: Set(request.description),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        audit::append(
            &txn,
            NewAuditEntry {
                action: AuditAction::CreateProduct,
                description: format!("Created product {}", request.name),
                quantity: None,
                user_id: request.created_by,
                order_id: None,
                product_id: Some(product_id),
                batch_item_id: None,
            },
        )
        .await?;

        txn.commit().await?;

        info!(product_id = %product_id, "Product created");

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(Event::ProductCreated(product_id)).await {
                warn!(error = %e, "Failed to send product created event");
            }
        }

        Ok(model)
    }

    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn get_product(
        &self,
        product_id: Uuid,
    ) -> Result<Option<ProductModel>, ServiceError> {
        Ok(ProductEntity::find_by_id(product_id).one(&*self.db).await?)
    }

    #[instrument(skip(self))]
    pub async fn list_products(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<ProductListResponse, ServiceError> {
        let paginator = ProductEntity::find()
            .order_by_asc(product::Column::Name)
            .paginate(&*self.db, per_page.max(1));

        let total = paginator.num_items().await?;
        let products = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok(ProductListResponse {
            products,
            total,
            page,
            per_page,
        })
    }

    #[instrument(skip(self, request), fields(product_id = %product_id))]
    pub async fn update_product(
        &self,
        product_id: Uuid,
        request: UpdateProductRequest,
    ) -> Result<ProductModel, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        let db = &*self.db;
        let txn = db.begin().await?;

        let product = ProductEntity::find_by_id(product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let name = request.name.clone().unwrap_or_else(|| product.name.clone());
        let mut active: ProductActiveModel = product.into();
        if let Some(new_name) = request.name {
            active.name = Set(new_name);
        }
        if let Some(description) = request.description {
            active.description = Set(Some(description));
        }
        let updated = active.update(&txn).await?;

        audit::append(
            &txn,
            NewAuditEntry {
                action: AuditAction::UpdateProduct,
                description: format!("Updated product {}", name),
                quantity: None,
                user_id: request.updated_by,
                order_id: None,
                product_id: Some(product_id),
                batch_item_id: None,
            },
        )
        .await?;

        txn.commit().await?;

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(Event::ProductUpdated(product_id)).await {
                warn!(error = %e, "Failed to send product updated event");
            }
        }

        Ok(updated)
    }

    /// Deletes a product that no order references. Products referenced by
    /// orders or batches are immutable.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn delete_product(&self, product_id: Uuid, actor: Uuid) -> Result<(), ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await?;

        let product = ProductEntity::find_by_id(product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let referenced = order_item::Entity::find()
            .filter(order_item::Column::ProductId.eq(product_id))
            .count(&txn)
            .await?;
        if referenced > 0 {
            return Err(ServiceError::InvalidOperation(format!(
                "Product {} is referenced by {} order item(s) and cannot be deleted",
                product.name, referenced
            )));
        }

        let name = product.name.clone();
        ProductEntity::delete_by_id(product_id).exec(&txn).await?;

        audit::append(
            &txn,
            NewAuditEntry {
                action: AuditAction::DeleteProduct,
                description: format!("Deleted product {}", name),
                quantity: None,
                user_id: actor,
                order_id: None,
                product_id: Some(product_id),
                batch_item_id: None,
            },
        )
        .await?;

        txn.commit().await?;

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(Event::ProductDeleted(product_id)).await {
                warn!(error = %e, "Failed to send product deleted event");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_product_request_requires_name_and_sku() {
        let request = CreateProductRequest {
            name: "".into(),
            sku: "".into(),
            description: None,
            created_by: Uuid::new_v4(),
        };
        assert!(request.validate().is_err());
    }
}
