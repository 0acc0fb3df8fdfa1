pub mod audit;
pub mod batches;
pub mod health;
pub mod orders;
pub mod products;

use std::sync::Arc;

use crate::db::DbPool;
use crate::events::EventSender;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub products: Arc<crate::services::products::ProductService>,
    pub orders: Arc<crate::services::orders::OrderService>,
    pub batches: Arc<crate::services::batches::BatchService>,
    pub allocation: crate::services::allocation::AllocationService,
    pub audit: Arc<crate::services::audit::AuditLogService>,
}

impl AppServices {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        let products = Arc::new(crate::services::products::ProductService::new(
            db_pool.clone(),
            Some(event_sender.clone()),
        ));
        let orders = Arc::new(crate::services::orders::OrderService::new(
            db_pool.clone(),
            Some(event_sender.clone()),
        ));
        let allocation = crate::services::allocation::AllocationService::new(
            db_pool.clone(),
            (*orders).clone(),
            Some(event_sender.clone()),
        );
        let batches = Arc::new(crate::services::batches::BatchService::new(
            db_pool.clone(),
            allocation.clone(),
            Some(event_sender),
        ));
        let audit = Arc::new(crate::services::audit::AuditLogService::new(db_pool));

        Self {
            products,
            orders,
            batches,
            allocation,
            audit,
        }
    }
}
