pub mod allocation;
pub mod audit;
pub mod batches;
pub mod order_status;
pub mod orders;
pub mod products;
