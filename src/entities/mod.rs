pub mod audit_log_entry;
pub mod batch_item;
pub mod batch_item_assignment;
pub mod order;
pub mod order_item;
pub mod product;
