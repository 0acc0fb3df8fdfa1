use dashmap::DashMap;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::audit_log_entry::AuditAction,
    entities::batch_item,
    entities::batch_item_assignment::{
        self, ActiveModel as AssignmentActiveModel, Entity as AssignmentEntity,
    },
    entities::order::Model as OrderModel,
    entities::order_item::{ActiveModel as OrderItemActiveModel, Entity as OrderItemEntity},
    errors::ServiceError,
    events::{Event, EventSender},
    services::audit::{self, NewAuditEntry},
    services::order_status,
    services::orders::{OrderService, PendingCandidate},
};

/// One partial assignment of a batch item to an order item, as reported to
/// the caller. `pending_after` is negative when the order item was pushed
/// past its ordered quantity by the overflow step.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AssignmentDetail {
    pub order_id: Uuid,
    pub order_number: String,
    pub order_item_id: Uuid,
    pub assigned_quantity: i32,
    pub pending_before: i32,
    pub pending_after: i32,
}

/// Outcome of one allocation run.
///
/// Invariants: `assigned_quantity + remaining_quantity == total_quantity` and
/// the detail quantities sum to `assigned_quantity`. A non-empty `error`
/// means the run stopped early; everything reported before the error is
/// already committed.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AllocationReport {
    pub batch_item_id: Uuid,
    pub product_name: String,
    pub total_quantity: i32,
    pub assigned_quantity: i32,
    pub remaining_quantity: i32,
    pub assignments: Vec<AssignmentDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct StepOutcome {
    detail: AssignmentDetail,
    link_id: Uuid,
    assigned: i32,
}

struct LastTouch {
    order: OrderModel,
    order_item_id: Uuid,
    link_id: Uuid,
    assigned: i32,
}

/// Distributes freshly produced batch items across pending orders.
///
/// Runs are serialized per product: two batch items for the same product
/// cannot interleave their reads of pending quantities.
#[derive(Clone)]
pub struct AllocationService {
    db: Arc<DbPool>,
    orders: OrderService,
    event_sender: Option<Arc<EventSender>>,
    product_locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl AllocationService {
    pub fn new(
        db: Arc<DbPool>,
        orders: OrderService,
        event_sender: Option<Arc<EventSender>>,
    ) -> Self {
        Self {
            db,
            orders,
            event_sender,
            product_locks: Arc::new(DashMap::new()),
        }
    }

    fn product_lock(&self, product_id: Uuid) -> Arc<Mutex<()>> {
        self.product_locks
            .entry(product_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Runs one full allocation pass for a batch item.
    ///
    /// Never returns an error: persistence failures stop the pass and are
    /// carried in the report's `error` field next to whatever was already
    /// committed. Zero pending orders is a normal outcome, not a failure.
    #[instrument(skip(self, batch_item), fields(batch_item_id = %batch_item.id, product_id = %batch_item.product_id, quantity = batch_item.quantity))]
    pub async fn allocate_batch_item(
        &self,
        batch_item: &batch_item::Model,
        product_name: &str,
        actor: Uuid,
    ) -> AllocationReport {
        let total = batch_item.quantity;
        let mut report = AllocationReport {
            batch_item_id: batch_item.id,
            product_name: product_name.to_string(),
            total_quantity: total,
            assigned_quantity: 0,
            remaining_quantity: total,
            assignments: Vec::new(),
            error: None,
        };

        let lock = self.product_lock(batch_item.product_id);
        let _guard = lock.lock().await;

        let candidates = match self
            .orders
            .find_pending_orders_for_product(batch_item.product_id)
            .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(error = %e, "Failed to fetch pending orders; batch item left unassigned");
                report.error = Some(e.to_string());
                return report;
            }
        };

        let mut remaining = total;
        let mut last: Option<LastTouch> = None;

        for candidate in &candidates {
            if remaining <= 0 {
                break;
            }

            match self
                .assign_step(batch_item, candidate, remaining, product_name, actor)
                .await
            {
                Ok(None) => continue,
                Ok(Some(outcome)) => {
                    remaining -= outcome.assigned;
                    last = Some(LastTouch {
                        order: candidate.order.clone(),
                        order_item_id: candidate.order_item.id,
                        link_id: outcome.link_id,
                        assigned: outcome.assigned,
                    });
                    report.assignments.push(outcome.detail);
                }
                Err(e) => {
                    // Earlier steps are committed and stay committed; this
                    // run stops here with the remainder intact.
                    error!(
                        error = %e,
                        order_id = %candidate.order.id,
                        "Allocation step failed; stopping run"
                    );
                    report.error = Some(e.to_string());
                    break;
                }
            }
        }

        // Leftover quantity is force-assigned to the last touched order item
        // so no unit of production goes unattributed while demand exists.
        if remaining > 0 && report.error.is_none() {
            if let Some(last) = &last {
                match self
                    .overflow_step(batch_item, last, remaining, product_name, actor)
                    .await
                {
                    Ok(detail) => {
                        report.assignments.push(detail);
                        remaining = 0;
                    }
                    Err(e) => {
                        error!(error = %e, "Overflow assignment failed");
                        report.error = Some(e.to_string());
                    }
                }
            }
        }

        report.assigned_quantity = total - remaining;
        report.remaining_quantity = remaining;

        info!(
            assigned = report.assigned_quantity,
            remaining = report.remaining_quantity,
            steps = report.assignments.len(),
            "allocation run finished"
        );

        if let Some(event_sender) = &self.event_sender {
            if let Err(e) = event_sender
                .send(Event::BatchItemAllocated {
                    batch_item_id: batch_item.id,
                    product_id: batch_item.product_id,
                    assigned_quantity: report.assigned_quantity,
                    remaining_quantity: report.remaining_quantity,
                })
                .await
            {
                warn!(error = %e, "Failed to send allocation event");
            }
        }

        report
    }

    /// One regular allocation step, committed atomically: assignment link,
    /// completed-quantity increment, status reconciliation and audit entry.
    /// Returns `None` when the candidate has no pending demand left.
    async fn assign_step(
        &self,
        batch_item: &batch_item::Model,
        candidate: &PendingCandidate,
        remaining: i32,
        product_name: &str,
        actor: Uuid,
    ) -> Result<Option<StepOutcome>, ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await?;

        // Re-read inside the transaction. The selector's query does not
        // exclude items whose demand is already met, and this re-check is
        // the invariant the engine actually relies on.
        let item = OrderItemEntity::find_by_id(candidate.order_item.id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Order item {} disappeared during allocation",
                    candidate.order_item.id
                ))
            })?;

        let pending = item.pending_quantity();
        if pending <= 0 {
            txn.rollback().await?;
            return Ok(None);
        }

        let assigned = remaining.min(pending);

        // Upsert the (batch item, order item) link. Within one pass each
        // candidate is visited once, so this normally creates.
        let link_id = match AssignmentEntity::find()
            .filter(batch_item_assignment::Column::BatchItemId.eq(batch_item.id))
            .filter(batch_item_assignment::Column::OrderItemId.eq(item.id))
            .one(&txn)
            .await?
        {
            Some(existing) => {
                let id = existing.id;
                let new_quantity = existing.quantity + assigned;
                let mut active: AssignmentActiveModel = existing.into();
                active.quantity = Set(new_quantity);
                active.update(&txn).await?;
                id
            }
            None => {
                let id = Uuid::new_v4();
                AssignmentActiveModel {
                    id: Set(id),
                    batch_item_id: Set(batch_item.id),
                    order_item_id: Set(item.id),
                    quantity: Set(assigned),
                    ..Default::default()
                }
                .insert(&txn)
                .await?;
                id
            }
        };

        let new_completed = item.completed_quantity + assigned;
        let mut item_active: OrderItemActiveModel = item.into();
        item_active.completed_quantity = Set(new_completed);
        item_active.update(&txn).await?;

        order_status::reconcile(&txn, candidate.order.id).await?;

        audit::append(
            &txn,
            NewAuditEntry {
                action: AuditAction::AutoAssignBatchToOrder,
                description: format!(
                    "Automatically assigned {} x {} from batch item {} to order {}",
                    assigned, product_name, batch_item.id, candidate.order.order_number
                ),
                quantity: Some(assigned),
                user_id: actor,
                order_id: Some(candidate.order.id),
                product_id: Some(batch_item.product_id),
                batch_item_id: Some(batch_item.id),
            },
        )
        .await?;

        txn.commit().await?;

        Ok(Some(StepOutcome {
            detail: AssignmentDetail {
                order_id: candidate.order.id,
                order_number: candidate.order.order_number.clone(),
                order_item_id: candidate.order_item.id,
                assigned_quantity: assigned,
                pending_before: pending,
                pending_after: pending - assigned,
            },
            link_id,
            assigned,
        }))
    }

    /// Overflow step: the batch's leftover is routed onto the last touched
    /// order item even though its demand is met, updating the existing link
    /// rather than creating a second row for the pair.
    async fn overflow_step(
        &self,
        batch_item: &batch_item::Model,
        last: &LastTouch,
        leftover: i32,
        product_name: &str,
        actor: Uuid,
    ) -> Result<AssignmentDetail, ServiceError> {
        let db = &*self.db;
        let txn = db.begin().await?;

        let link = AssignmentEntity::find_by_id(last.link_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Assignment {} disappeared during overflow handling",
                    last.link_id
                ))
            })?;

        let new_link_quantity = link.quantity + leftover;
        let mut link_active: AssignmentActiveModel = link.into();
        link_active.quantity = Set(new_link_quantity);
        link_active.update(&txn).await?;

        let item = OrderItemEntity::find_by_id(last.order_item_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Order item {} disappeared during overflow handling",
                    last.order_item_id
                ))
            })?;

        let new_completed = item.completed_quantity + leftover;
        let mut item_active: OrderItemActiveModel = item.into();
        item_active.completed_quantity = Set(new_completed);
        item_active.update(&txn).await?;

        order_status::reconcile(&txn, last.order.id).await?;

        audit::append(
            &txn,
            NewAuditEntry {
                action: AuditAction::OverAssignBatchToOrder,
                description: format!(
                    "Over-assigned surplus {} x {} from batch item {} to order {}; assignment now totals {}",
                    leftover, product_name, batch_item.id, last.order.order_number, new_link_quantity
                ),
                quantity: Some(leftover),
                user_id: actor,
                order_id: Some(last.order.id),
                product_id: Some(batch_item.product_id),
                batch_item_id: Some(batch_item.id),
            },
        )
        .await?;

        txn.commit().await?;

        Ok(AssignmentDetail {
            order_id: last.order.id,
            order_number: last.order.order_number.clone(),
            order_item_id: last.order_item_id,
            assigned_quantity: leftover,
            pending_before: 0,
            pending_after: -leftover,
        })
    }
}
