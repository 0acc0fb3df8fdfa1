use chrono::{DateTime, Utc};
use rand::Rng;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::DbPool,
    entities::audit_log_entry::AuditAction,
    entities::order::{
        self, ActiveModel as OrderActiveModel, Entity as OrderEntity, Model as OrderModel,
        OrderStatus,
    },
    entities::order_item::{
        self, ActiveModel as OrderItemActiveModel, Entity as OrderItemEntity,
        Model as OrderItemModel,
    },
    entities::product::Entity as ProductEntity,
    errors::ServiceError,
    events::{Event, EventSender},
    services::audit::{self, NewAuditEntry},
};

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateOrderItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be positive"))]
    pub quantity: i32,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    /// Order number; generated when omitted
    pub order_number: Option<String>,
    pub notes: Option<String>,
    #[validate]
    #[validate(length(min = 1, message = "Order must have at least one item"))]
    pub items: Vec<CreateOrderItemRequest>,
    /// Actor the creation is attributed to in the audit log
    pub created_by: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub items: Vec<OrderItemModel>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// One allocation candidate: an open order together with its item for the
/// requested product.
#[derive(Debug, Clone)]
pub struct PendingCandidate {
    pub order: OrderModel,
    pub order_item: OrderItemModel,
}

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
}

impl OrderService {
    pub fn new(db: Arc<DbPool>, event_sender: Option<Arc<EventSender>>) -> Self {
        Self { db, event_sender }
    }

    /// Creates an order with its items and one audit entry, atomically.
    #[instrument(skip(self, request), fields(item_count = request.items.len()))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;
        for item in &request.items {
            item.validate()
                .map_err(|e| ServiceError::ValidationError(e.to_string()))?;
        }

        let db = &*self.db;
        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let order_number = match request.order_number {
            Some(number) if !number.trim().is_empty() => number,
            _ => generate_order_number(now),
        };

        // Ordered products must exist before we accept the demand.
        for item in &request.items {
            if ProductEntity::find_by_id(item.product_id).one(db).await?.is_none() {
                return Err(ServiceError::ValidationError(format!(
                    "Unknown product {} in order item",
                    item.product_id
                )));
            }
        }

        let txn = db.begin().await?;

        let order_model = OrderActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.clone()),
            status: Set(OrderStatus::Pending),
            notes: Set(request.notes),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to create order");
            ServiceError::DatabaseError(e)
        })?;

        let mut items = Vec::with_capacity(request.items.len());
        for item in &request.items {
            let inserted = OrderItemActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id),
                quantity: Set(item.quantity),
                completed_quantity: Set(0),
                created_at: Set(now),
                updated_at: Set(Some(now)),
            }
            .insert(&txn)
            .await?;
            items.push(inserted);
        }

        let total_quantity: i32 = items.iter().map(|i| i.quantity).sum();
        audit::append(
            &txn,
            NewAuditEntry {
                action: AuditAction::CreateOrder,
                description: format!(
                    "Created order {} with {} item(s), total quantity {}",
                    order_number,
                    items.len(),
                    total_quantity
                ),
                quantity: Some(total_quantity),
                user_id: request.created_by,
                order_id: Some(order_id),
                product_id: None,
                batch_item_id: None,
            },
        )
        .await?;

        txn.commit().await?;

        info!(order_id = %order_id, order_number = %order_number, "Order created");

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(Event::OrderCreated(order_id)).await {
                warn!(error = %e, order_id = %order_id, "Failed to send order created event");
            }
        }

        Ok(to_response(order_model, items))
    }

    /// Retrieves an order with its items.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<Option<OrderResponse>, ServiceError> {
        let db = &*self.db;

        let Some(order) = OrderEntity::find_by_id(order_id).one(db).await? else {
            return Ok(None);
        };

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(db)
            .await?;

        Ok(Some(to_response(order, items)))
    }

    /// Lists orders with pagination, newest first.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let db = &*self.db;

        let paginator = OrderEntity::find()
            .order_by_desc(order::Column::CreatedAt)
            .paginate(db, per_page.max(1));

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        let mut responses = Vec::with_capacity(orders.len());
        for order in orders {
            let items = OrderItemEntity::find()
                .filter(order_item::Column::OrderId.eq(order.id))
                .all(db)
                .await?;
            responses.push(to_response(order, items));
        }

        Ok(OrderListResponse {
            orders: responses,
            total,
            page,
            per_page,
        })
    }

    /// Marks an order cancelled. Cancelled orders no longer receive
    /// allocations; the reconciler never touches them again.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        actor: Uuid,
        reason: Option<String>,
    ) -> Result<OrderResponse, ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await?;

        let order = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.status == OrderStatus::Completed {
            return Err(ServiceError::InvalidOperation(
                "Completed orders cannot be cancelled".to_string(),
            ));
        }

        let old_status = order.status;
        let order_number = order.order_number.clone();

        let mut active: OrderActiveModel = order.into();
        active.status = Set(OrderStatus::Cancelled);
        if let Some(reason) = reason {
            active.notes = Set(Some(reason));
        }
        active.updated_at = Set(Some(Utc::now()));
        let updated = active.update(&txn).await?;

        audit::append(
            &txn,
            NewAuditEntry {
                action: AuditAction::UpdateOrder,
                description: format!("Cancelled order {}", order_number),
                quantity: None,
                user_id: actor,
                order_id: Some(order_id),
                product_id: None,
                batch_item_id: None,
            },
        )
        .await?;

        txn.commit().await?;

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender
                .send(Event::OrderStatusChanged {
                    order_id,
                    old_status,
                    new_status: OrderStatus::Cancelled,
                })
                .await
            {
                warn!(error = %e, order_id = %order_id, "Failed to send status changed event");
            }
        }

        let items = OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await?;

        Ok(to_response(updated, items))
    }

    /// Deletes an order and its items. Unrelated to the allocation engine;
    /// assignments referencing the items cascade away with them.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn delete_order(&self, order_id: Uuid, actor: Uuid) -> Result<(), ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await?;

        let order = OrderEntity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let order_number = order.order_number.clone();
        OrderEntity::delete_by_id(order_id).exec(&txn).await?;

        audit::append(
            &txn,
            NewAuditEntry {
                action: AuditAction::DeleteOrder,
                description: format!("Deleted order {}", order_number),
                quantity: None,
                user_id: actor,
                order_id: Some(order_id),
                product_id: None,
                batch_item_id: None,
            },
        )
        .await?;

        txn.commit().await?;

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender.send(Event::OrderDeleted(order_id)).await {
                warn!(error = %e, order_id = %order_id, "Failed to send order deleted event");
            }
        }

        Ok(())
    }

    /// Pending-order selector: open orders carrying an item for the product,
    /// oldest order first.
    ///
    /// The filter is deliberately loose: it excludes closed orders but not
    /// items whose demand is already met. The allocator re-checks the pending
    /// quantity per item and treats that re-check as the hard invariant.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn find_pending_orders_for_product(
        &self,
        product_id: Uuid,
    ) -> Result<Vec<PendingCandidate>, ServiceError> {
        let db = &*self.db;

        let rows = OrderItemEntity::find()
            .filter(order_item::Column::ProductId.eq(product_id))
            .find_also_related(OrderEntity)
            .filter(
                order::Column::Status
                    .is_in([OrderStatus::Pending, OrderStatus::InProgress]),
            )
            .order_by_asc(order::Column::CreatedAt)
            .all(db)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(order_item, order)| {
                order.map(|order| PendingCandidate { order, order_item })
            })
            .collect())
    }
}

fn to_response(order: OrderModel, items: Vec<OrderItemModel>) -> OrderResponse {
    OrderResponse {
        id: order.id,
        order_number: order.order_number,
        status: order.status,
        notes: order.notes,
        created_at: order.created_at,
        updated_at: order.updated_at,
        items,
    }
}

fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..10_000);
    format!("ORD-{}-{:04}", now.format("%Y%m%d"), suffix)
}
