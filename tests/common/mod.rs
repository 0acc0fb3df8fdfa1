use chrono::{DateTime, Duration, Utc};
use sea_orm::{ActiveModelTrait, Set};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;
use warehouse_api::{
    db::{establish_connection_with_config, run_migrations, DbConfig, DbPool},
    entities::{batch_item, order, order_item, product},
    events::EventSender,
    handlers::AppServices,
};

/// Opens a named in-memory sqlite database and runs migrations. Each test
/// passes its own name so parallel tests do not share state.
pub async fn setup(name: &str) -> (Arc<DbPool>, AppServices, mpsc::Receiver<warehouse_api::events::Event>) {
    let pool = establish_connection_with_config(&DbConfig {
        url: format!("sqlite:file:{}?mode=memory&cache=shared", name),
        ..Default::default()
    })
    .await
    .expect("Failed to create DB pool");

    run_migrations(&pool).await.expect("Failed to run migrations");

    let db = Arc::new(pool);
    let (tx, rx) = mpsc::channel(1024);
    let services = AppServices::new(db.clone(), Arc::new(EventSender::new(tx)));

    (db, services, rx)
}

pub async fn create_product(db: &DbPool, name: &str, sku: &str) -> product::Model {
    product::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_string()),
        sku: Set(sku.to_string()),
        description: Set(None),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("Failed to insert product")
}

/// Inserts an order with one item for the product, with an explicit creation
/// time so FIFO ordering is deterministic in tests.
pub async fn create_order_with_item(
    db: &DbPool,
    order_number: &str,
    product_id: Uuid,
    quantity: i32,
    created_at: DateTime<Utc>,
) -> (order::Model, order_item::Model) {
    let order = order::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_number: Set(order_number.to_string()),
        status: Set(order::OrderStatus::Pending),
        notes: Set(None),
        created_at: Set(created_at),
        updated_at: Set(Some(created_at)),
    }
    .insert(db)
    .await
    .expect("Failed to insert order");

    let item = order_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order.id),
        product_id: Set(product_id),
        quantity: Set(quantity),
        completed_quantity: Set(0),
        created_at: Set(created_at),
        updated_at: Set(Some(created_at)),
    }
    .insert(db)
    .await
    .expect("Failed to insert order item");

    (order, item)
}

pub async fn create_batch_item(db: &DbPool, product_id: Uuid, quantity: i32) -> batch_item::Model {
    batch_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        batch_id: Set(Uuid::new_v4()),
        product_id: Set(product_id),
        quantity: Set(quantity),
        container_code: Set(Some("CONT-01".to_string())),
        order_item_id: Set(None),
        created_at: Set(Utc::now()),
    }
    .insert(db)
    .await
    .expect("Failed to insert batch item")
}

/// Convenience for spacing order timestamps apart.
pub fn minutes_ago(minutes: i64) -> DateTime<Utc> {
    Utc::now() - Duration::minutes(minutes)
}
