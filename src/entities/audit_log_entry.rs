use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed set of actions the activity log can carry. The reporting view
/// filters and joins on these values, so they are stable wire strings.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(64))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    #[sea_orm(string_value = "CREATE_PRODUCT")]
    CreateProduct,
    #[sea_orm(string_value = "UPDATE_PRODUCT")]
    UpdateProduct,
    #[sea_orm(string_value = "DELETE_PRODUCT")]
    DeleteProduct,
    #[sea_orm(string_value = "CREATE_ORDER")]
    CreateOrder,
    #[sea_orm(string_value = "UPDATE_ORDER")]
    UpdateOrder,
    #[sea_orm(string_value = "DELETE_ORDER")]
    DeleteOrder,
    #[sea_orm(string_value = "CREATE_BATCH")]
    CreateBatch,
    #[sea_orm(string_value = "AUTO_ASSIGN_BATCH_TO_ORDER")]
    AutoAssignBatchToOrder,
    #[sea_orm(string_value = "OVER_ASSIGN_BATCH_TO_ORDER")]
    OverAssignBatchToOrder,
}

/// Append-only record of one mutation. Never updated or deleted.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "audit_log_entries")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub action: AuditAction,

    /// Human-readable description embedding quantity and identifiers.
    pub description: String,

    pub quantity: Option<i32>,

    /// Actor the mutation is attributed to.
    pub user_id: Uuid,

    pub order_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub batch_item_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
