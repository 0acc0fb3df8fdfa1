use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use tracing::info;
use uuid::Uuid;

use crate::{
    entities::order::{ActiveModel as OrderActiveModel, Entity as OrderEntity, OrderStatus},
    entities::order_item::{self, Entity as OrderItemEntity},
    errors::ServiceError,
};

/// Derives the aggregate status from the order's items.
///
/// `Cancelled` is terminal and never recomputed. Otherwise: all items at or
/// above their ordered quantity means `Completed`; any partially fulfilled
/// item means `InProgress`; an untouched order keeps its current status
/// (stays `Pending`). Idempotent by construction.
pub fn derive_status(current: OrderStatus, items: &[order_item::Model]) -> OrderStatus {
    if current == OrderStatus::Cancelled {
        return current;
    }

    if !items.is_empty()
        && items
            .iter()
            .all(|item| item.completed_quantity >= item.quantity)
    {
        return OrderStatus::Completed;
    }

    if items
        .iter()
        .any(|item| item.completed_quantity > 0 && item.completed_quantity < item.quantity)
    {
        return OrderStatus::InProgress;
    }

    current
}

/// Recomputes and persists the order's status on the caller's connection.
///
/// Runs inside the same transaction as the quantity change that triggered it.
/// Returns the (old, new) pair when the status actually changed.
pub async fn reconcile<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<Option<(OrderStatus, OrderStatus)>, ServiceError> {
    let order = OrderEntity::find_by_id(order_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

    let items = OrderItemEntity::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .all(conn)
        .await?;

    let old_status = order.status;
    let new_status = derive_status(old_status, &items);

    if new_status == old_status {
        return Ok(None);
    }

    let mut active: OrderActiveModel = order.into();
    active.status = Set(new_status);
    active.updated_at = Set(Some(Utc::now()));
    active.update(conn).await?;

    info!(
        order_id = %order_id,
        ?old_status,
        ?new_status,
        "order status reconciled"
    );

    Ok(Some((old_status, new_status)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use test_case::test_case;

    fn item(quantity: i32, completed: i32) -> order_item::Model {
        order_item::Model {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            quantity,
            completed_quantity: completed,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test_case(0, 0, OrderStatus::Pending, OrderStatus::Pending ; "untouched order stays pending")]
    #[test_case(3, 0, OrderStatus::Pending, OrderStatus::InProgress ; "partial fulfillment moves to in progress")]
    #[test_case(10, 5, OrderStatus::InProgress, OrderStatus::Completed ; "full fulfillment completes")]
    #[test_case(12, 5, OrderStatus::InProgress, OrderStatus::Completed ; "over fulfillment still counts as complete")]
    fn derive_status_cases(
        first_completed: i32,
        second_completed: i32,
        current: OrderStatus,
        expected: OrderStatus,
    ) {
        let items = vec![item(10, first_completed), item(5, second_completed)];
        assert_eq!(derive_status(current, &items), expected);
    }

    #[test]
    fn one_full_one_untouched_is_not_in_progress_by_full_item_alone() {
        // A fully assigned item is not "partial"; the untouched one keeps the
        // order from completing, so the current status is kept.
        let items = vec![item(10, 10), item(5, 0)];
        assert_eq!(
            derive_status(OrderStatus::Pending, &items),
            OrderStatus::Pending
        );
    }

    #[test]
    fn cancelled_is_terminal() {
        let items = vec![item(10, 10)];
        assert_eq!(
            derive_status(OrderStatus::Cancelled, &items),
            OrderStatus::Cancelled
        );
    }

    #[test]
    fn derive_is_idempotent() {
        let items = vec![item(10, 4)];
        let once = derive_status(OrderStatus::Pending, &items);
        let twice = derive_status(once, &items);
        assert_eq!(once, twice);
    }

    #[test]
    fn order_with_no_items_keeps_status() {
        assert_eq!(
            derive_status(OrderStatus::Pending, &[]),
            OrderStatus::Pending
        );
    }
}
