use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::entities::order::OrderStatus;

/// Events emitted by the services for in-process consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Order events
    OrderCreated(Uuid),
    OrderDeleted(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },

    // Product events
    ProductCreated(Uuid),
    ProductUpdated(Uuid),
    ProductDeleted(Uuid),

    // Batch events
    BatchCreated {
        batch_id: Uuid,
        item_count: usize,
    },
    BatchItemAllocated {
        batch_item_id: Uuid,
        product_id: Uuid,
        assigned_quantity: i32,
        remaining_quantity: i32,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Event processing loop. Currently the only consumer is the log; keeping it
/// in place gives webhooks or outbox delivery a seam to hook into later.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(
                    order_id = %order_id,
                    ?old_status,
                    ?new_status,
                    "order status changed"
                );
            }
            Event::BatchItemAllocated {
                batch_item_id,
                product_id,
                assigned_quantity,
                remaining_quantity,
            } => {
                info!(
                    batch_item_id = %batch_item_id,
                    product_id = %product_id,
                    assigned = assigned_quantity,
                    remaining = remaining_quantity,
                    "batch item allocated"
                );
            }
            other => debug!("Received event: {:?}", other),
        }
    }

    info!("Event channel closed; stopping event processing loop");
}
