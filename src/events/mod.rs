use async_trait::async_trait;
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::errors::ServiceError;

/// Domain events emitted after a committed inventory change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    FabricRollReceived {
        tenant_id: Uuid,
        fabric_id: Uuid,
        roll_id: Uuid,
        roll_number: String,
        initial_length: Decimal,
    },
    FabricAllocated {
        tenant_id: Uuid,
        order_id: Uuid,
        fabric_id: Uuid,
        allocation_ids: Vec<Uuid>,
        total_allocated: Decimal,
        remaining_needed: Decimal,
        strategy: String,
    },
    FabricAllocationReleased {
        tenant_id: Uuid,
        allocation_id: Uuid,
        roll_id: Uuid,
        released_length: Decimal,
    },
    FabricAllocationConfirmed {
        tenant_id: Uuid,
        allocation_id: Uuid,
    },
    FabricAllocationCut {
        tenant_id: Uuid,
        allocation_id: Uuid,
        actual_used_length: Decimal,
        remnant_length: Decimal,
    },
    FabricRollUpdated {
        tenant_id: Uuid,
        roll_id: Uuid,
        roll_number: String,
    },
    FabricRollDamaged {
        tenant_id: Uuid,
        roll_id: Uuid,
    },
    FabricRollRemoved {
        tenant_id: Uuid,
        roll_id: Uuid,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::FabricRollReceived { .. } => "fabric_roll_received",
            Event::FabricAllocated { .. } => "fabric_allocated",
            Event::FabricAllocationReleased { .. } => "fabric_allocation_released",
            Event::FabricAllocationConfirmed { .. } => "fabric_allocation_confirmed",
            Event::FabricAllocationCut { .. } => "fabric_allocation_cut",
            Event::FabricRollUpdated { .. } => "fabric_roll_updated",
            Event::FabricRollDamaged { .. } => "fabric_roll_damaged",
            Event::FabricRollRemoved { .. } => "fabric_roll_removed",
        }
    }

    pub fn tenant_id(&self) -> Uuid {
        match self {
            Event::FabricRollReceived { tenant_id, .. }
            | Event::FabricAllocated { tenant_id, .. }
            | Event::FabricAllocationReleased { tenant_id, .. }
            | Event::FabricAllocationConfirmed { tenant_id, .. }
            | Event::FabricAllocationCut { tenant_id, .. }
            | Event::FabricRollUpdated { tenant_id, .. }
            | Event::FabricRollDamaged { tenant_id, .. }
            | Event::FabricRollRemoved { tenant_id, .. } => *tenant_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), ServiceError> {
        self.sender
            .send(event)
            .await
            .map_err(|e| ServiceError::EventError(format!("Failed to send event: {}", e)))
    }

    /// Sends an event for a change that is already committed. Failure is
    /// logged and swallowed.
    pub async fn send_or_log(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.send(event).await {
            warn!(event = name, error = %e, "dropping event");
        }
    }
}

/// Bounded event channel.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSender::new(tx), rx)
}

// Handlers implementing this trait will process events asynchronously.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &Event) -> Result<(), String>;
}

/// Writes every event to the log as JSON.
pub struct LoggingEventHandler;

#[async_trait]
impl EventHandler for LoggingEventHandler {
    async fn handle_event(&self, event: &Event) -> Result<(), String> {
        let payload = serde_json::to_string(event).map_err(|e| e.to_string())?;
        info!(event = event.name(), tenant_id = %event.tenant_id(), %payload, "inventory event");
        Ok(())
    }
}

/// Drains `rx` until every sender is dropped, fanning each event out to
/// `handlers` concurrently. Handler errors are logged and do not stop the loop.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, handlers: Vec<Arc<dyn EventHandler>>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        debug!(event = event.name(), "Received event");
        let results = join_all(handlers.iter().map(|handler| handler.handle_event(&event))).await;
        for e in results.into_iter().filter_map(Result::err) {
            error!(event = event.name(), error = %e, "Event handler failed");
        }
    }

    info!("Event channel closed, stopping event processing");
}
