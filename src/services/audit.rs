use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, instrument};
use uuid::Uuid;

use crate::{
    db::DbPool,
    entities::audit_log_entry::{
        self, ActiveModel as AuditActiveModel, AuditAction, Entity as AuditEntity,
        Model as AuditModel,
    },
    errors::ServiceError,
};

/// One audit record to append. References are optional so the same shape
/// serves product, order and batch mutations.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub action: AuditAction,
    pub description: String,
    pub quantity: Option<i32>,
    pub user_id: Uuid,
    pub order_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub batch_item_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuditLogPage {
    pub entries: Vec<AuditModel>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

#[derive(Debug, Clone, Default)]
pub struct AuditLogFilter {
    pub order_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub action: Option<AuditAction>,
}

/// Appends one audit entry on the given connection. Callers pass their open
/// transaction so the entry commits or aborts together with the mutation it
/// describes.
pub async fn append<C: ConnectionTrait>(
    conn: &C,
    entry: NewAuditEntry,
) -> Result<AuditModel, ServiceError> {
    let model = AuditActiveModel {
        id: Set(Uuid::new_v4()),
        action: Set(entry.action),
        description: Set(entry.description),
        quantity: Set(entry.quantity),
        user_id: Set(entry.user_id),
        order_id: Set(entry.order_id),
        product_id: Set(entry.product_id),
        batch_item_id: Set(entry.batch_item_id),
        created_at: Set(Utc::now()),
    };

    model.insert(conn).await.map_err(|e| {
        error!(error = %e, "Failed to append audit log entry");
        ServiceError::DatabaseError(e)
    })
}

/// Read-only access to the activity log for the reporting view.
#[derive(Clone)]
pub struct AuditLogService {
    db: Arc<DbPool>,
}

impl AuditLogService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Lists audit entries newest first, optionally filtered by order,
    /// product or action kind.
    #[instrument(skip(self))]
    pub async fn list(
        &self,
        filter: AuditLogFilter,
        page: u64,
        per_page: u64,
    ) -> Result<AuditLogPage, ServiceError> {
        let db = &*self.db;

        let mut query = AuditEntity::find().order_by_desc(audit_log_entry::Column::CreatedAt);

        if let Some(order_id) = filter.order_id {
            query = query.filter(audit_log_entry::Column::OrderId.eq(order_id));
        }
        if let Some(product_id) = filter.product_id {
            query = query.filter(audit_log_entry::Column::ProductId.eq(product_id));
        }
        if let Some(action) = filter.action {
            query = query.filter(audit_log_entry::Column::Action.eq(action));
        }

        let paginator = query.paginate(db, per_page.max(1));
        let total = paginator.num_items().await?;
        let entries = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok(AuditLogPage {
            entries,
            total,
            page,
            per_page,
        })
    }
}
