use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::{FabricRoll, FabricRollPatch, NewFabricRoll, RollStatus};
use crate::repositories::{FabricCatalog, InventoryStore};

/// Goods receipt of one physical roll.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReceiveRollRequest {
    pub tenant_id: Uuid,
    pub fabric_id: Uuid,
    #[validate(length(min = 1, max = 64))]
    pub roll_number: String,
    pub initial_length: Decimal,
    pub width: Option<Decimal>,
    #[validate(length(max = 64))]
    pub supplier_lot_no: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    #[validate(length(max = 128))]
    pub location: Option<String>,
    #[validate(length(max = 500))]
    pub notes: Option<String>,
}

impl ReceiveRollRequest {
    pub fn new(
        tenant_id: Uuid,
        fabric_id: Uuid,
        roll_number: impl Into<String>,
        initial_length: Decimal,
    ) -> Self {
        Self {
            tenant_id,
            fabric_id,
            roll_number: roll_number.into(),
            initial_length,
            width: None,
            supplier_lot_no: None,
            received_at: None,
            location: None,
            notes: None,
        }
    }
}

impl From<ReceiveRollRequest> for NewFabricRoll {
    fn from(req: ReceiveRollRequest) -> Self {
        NewFabricRoll {
            tenant_id: req.tenant_id,
            fabric_id: req.fabric_id,
            roll_number: req.roll_number,
            initial_length: req.initial_length,
            width: req.width,
            supplier_lot_no: req.supplier_lot_no,
            received_at: req.received_at,
            location: req.location,
            notes: req.notes,
        }
    }
}

/// Receipt and housekeeping of fabric rolls.
#[derive(Clone)]
pub struct FabricRollService {
    store: Arc<dyn InventoryStore>,
    catalog: Arc<dyn FabricCatalog>,
    event_sender: Arc<EventSender>,
}

fn roll_not_found(roll_id: Uuid) -> ServiceError {
    ServiceError::NotFound(format!("fabric roll {}", roll_id))
}

fn ensure_tenant(tenant_id: Uuid) -> Result<(), ServiceError> {
    if tenant_id.is_nil() {
        return Err(ServiceError::Unauthorized(
            "tenant id is required".to_string(),
        ));
    }
    Ok(())
}

impl FabricRollService {
    pub fn new(
        store: Arc<dyn InventoryStore>,
        catalog: Arc<dyn FabricCatalog>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            store,
            catalog,
            event_sender,
        }
    }

    /// Registers a fabric in the tenant's catalog and returns its id.
    #[instrument(skip(self))]
    pub async fn register_fabric(
        &self,
        tenant_id: Uuid,
        name: &str,
        sku: Option<String>,
    ) -> Result<Uuid, ServiceError> {
        ensure_tenant(tenant_id)?;
        if name.trim().is_empty() {
            return Err(ServiceError::InvalidArgument(
                "fabric name is required".to_string(),
            ));
        }
        self.catalog.register_fabric(tenant_id, name.trim(), sku).await
    }

    #[instrument(
        skip(self, request),
        fields(
            tenant_id = %request.tenant_id,
            fabric_id = %request.fabric_id,
            roll_number = %request.roll_number
        )
    )]
    pub async fn receive_roll(&self, request: ReceiveRollRequest) -> Result<FabricRoll, ServiceError> {
        request.validate()?;
        ensure_tenant(request.tenant_id)?;

        if !self
            .catalog
            .fabric_exists(request.tenant_id, request.fabric_id)
            .await?
        {
            return Err(ServiceError::FabricNotFound(request.fabric_id));
        }

        let roll = FabricRoll::receive(request.into())?;
        if self
            .store
            .get_roll_by_number(roll.tenant_id, &roll.roll_number)
            .await?
            .is_some()
        {
            return Err(ServiceError::Conflict(format!(
                "roll number {} already exists",
                roll.roll_number
            )));
        }

        // The unique index still rejects a concurrent duplicate at insert.
        let mut txn = self.store.begin().await?;
        txn.insert_roll(&roll).await?;
        txn.commit().await?;

        info!(roll_id = %roll.id, initial_length = %roll.initial_length, "fabric roll received");
        self.event_sender
            .send_or_log(Event::FabricRollReceived {
                tenant_id: roll.tenant_id,
                fabric_id: roll.fabric_id,
                roll_id: roll.id,
                roll_number: roll.roll_number.clone(),
                initial_length: roll.initial_length,
            })
            .await;
        Ok(roll)
    }

    pub async fn get_roll(&self, tenant_id: Uuid, roll_id: Uuid) -> Result<FabricRoll, ServiceError> {
        ensure_tenant(tenant_id)?;
        self.store
            .get_roll(tenant_id, roll_id)
            .await?
            .ok_or_else(|| roll_not_found(roll_id))
    }

    pub async fn get_roll_by_number(
        &self,
        tenant_id: Uuid,
        roll_number: &str,
    ) -> Result<FabricRoll, ServiceError> {
        ensure_tenant(tenant_id)?;
        self.store
            .get_roll_by_number(tenant_id, roll_number.trim())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("fabric roll {}", roll_number)))
    }

    pub async fn list_rolls(
        &self,
        tenant_id: Uuid,
        fabric_id: Uuid,
        status: Option<RollStatus>,
    ) -> Result<Vec<FabricRoll>, ServiceError> {
        ensure_tenant(tenant_id)?;
        self.store.list_rolls(tenant_id, fabric_id, status).await
    }

    /// Corrects a roll's number, width, location or notes. Lengths and status
    /// are left alone.
    #[instrument(skip(self, patch))]
    pub async fn update_roll_details(
        &self,
        tenant_id: Uuid,
        roll_id: Uuid,
        patch: FabricRollPatch,
    ) -> Result<FabricRoll, ServiceError> {
        ensure_tenant(tenant_id)?;
        if patch.is_empty() {
            return Err(ServiceError::InvalidArgument(
                "nothing to update".to_string(),
            ));
        }

        let mut txn = self.store.begin().await?;
        let mut roll = txn
            .find_roll(tenant_id, roll_id)
            .await?
            .ok_or_else(|| roll_not_found(roll_id))?;
        roll.apply_patch(patch)?;
        txn.update_roll(&roll).await?;
        txn.commit().await?;

        info!(roll_number = %roll.roll_number, "fabric roll updated");
        self.event_sender
            .send_or_log(Event::FabricRollUpdated {
                tenant_id,
                roll_id,
                roll_number: roll.roll_number.clone(),
            })
            .await;
        Ok(roll)
    }

    /// Takes a roll out of circulation. Existing allocations are kept.
    #[instrument(skip(self))]
    pub async fn mark_roll_damaged(
        &self,
        tenant_id: Uuid,
        roll_id: Uuid,
    ) -> Result<FabricRoll, ServiceError> {
        ensure_tenant(tenant_id)?;

        let mut txn = self.store.begin().await?;
        let mut roll = txn
            .find_roll(tenant_id, roll_id)
            .await?
            .ok_or_else(|| roll_not_found(roll_id))?;
        roll.mark_damaged();
        txn.update_roll(&roll).await?;

        let active = txn.count_active_allocations(tenant_id, roll_id).await?;
        txn.commit().await?;

        if active > 0 {
            warn!(active_allocations = active, "damaged roll still has active allocations");
        }
        self.event_sender
            .send_or_log(Event::FabricRollDamaged { tenant_id, roll_id })
            .await;
        Ok(roll)
    }

    /// Deletes a roll that was never allocated from. Allocation records,
    /// cancelled ones included, are kept as history, so a roll with any of
    /// them stays; mark it damaged instead.
    #[instrument(skip(self))]
    pub async fn remove_roll(&self, tenant_id: Uuid, roll_id: Uuid) -> Result<(), ServiceError> {
        ensure_tenant(tenant_id)?;

        let mut txn = self.store.begin().await?;
        if txn.find_roll(tenant_id, roll_id).await?.is_none() {
            return Err(roll_not_found(roll_id));
        }
        let recorded = txn.count_allocations(tenant_id, roll_id).await?;
        if recorded > 0 {
            return Err(ServiceError::Conflict(format!(
                "fabric roll {} has {} allocation record(s)",
                roll_id, recorded
            )));
        }
        txn.delete_roll(tenant_id, roll_id).await?;
        txn.commit().await?;

        info!("fabric roll removed");
        self.event_sender
            .send_or_log(Event::FabricRollRemoved { tenant_id, roll_id })
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events;
    use crate::repositories::InMemoryInventoryStore;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    struct Fixture {
        store: InMemoryInventoryStore,
        service: FabricRollService,
        events: tokio::sync::mpsc::Receiver<Event>,
        tenant_id: Uuid,
        fabric_id: Uuid,
    }

    async fn fixture() -> Fixture {
        let store = InMemoryInventoryStore::new();
        let (sender, events) = events::channel(16);
        let service = FabricRollService::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(sender),
        );
        let tenant_id = Uuid::new_v4();
        let fabric_id = service
            .register_fabric(tenant_id, "Navy wool twill", Some("WL-220".into()))
            .await
            .unwrap();
        Fixture {
            store,
            service,
            events,
            tenant_id,
            fabric_id,
        }
    }

    #[tokio::test]
    async fn received_roll_is_available_and_announced() {
        let mut fx = fixture().await;
        let roll = fx
            .service
            .receive_roll(ReceiveRollRequest::new(fx.tenant_id, fx.fabric_id, " VBC-2025-001 ", dec!(50)))
            .await
            .unwrap();

        assert_eq!(roll.roll_number, "VBC-2025-001");
        assert_eq!(roll.current_length, dec!(50));
        assert_eq!(roll.status, RollStatus::Available);

        let by_number = fx
            .service
            .get_roll_by_number(fx.tenant_id, "VBC-2025-001")
            .await
            .unwrap();
        assert_eq!(by_number.id, roll.id);

        assert_matches!(
            fx.events.recv().await,
            Some(Event::FabricRollReceived { roll_id, .. }) if roll_id == roll.id
        );
    }

    #[tokio::test]
    async fn receipt_checks_fabric_and_number() {
        let fx = fixture().await;
        assert_matches!(
            fx.service
                .receive_roll(ReceiveRollRequest::new(fx.tenant_id, Uuid::new_v4(), "R-1", dec!(10)))
                .await,
            Err(ServiceError::FabricNotFound(_))
        );
        assert_matches!(
            fx.service
                .receive_roll(ReceiveRollRequest::new(fx.tenant_id, fx.fabric_id, "R-1", Decimal::ZERO))
                .await,
            Err(ServiceError::InvalidArgument(_))
        );
        assert_matches!(
            fx.service
                .receive_roll(ReceiveRollRequest::new(fx.tenant_id, fx.fabric_id, "", dec!(10)))
                .await,
            Err(ServiceError::InvalidArgument(_))
        );

        fx.service
            .receive_roll(ReceiveRollRequest::new(fx.tenant_id, fx.fabric_id, "R-1", dec!(10)))
            .await
            .unwrap();
        assert_matches!(
            fx.service
                .receive_roll(ReceiveRollRequest::new(fx.tenant_id, fx.fabric_id, "R-1", dec!(12)))
                .await,
            Err(ServiceError::Conflict(_))
        );
    }

    #[tokio::test]
    async fn damaged_rolls_are_filtered_by_status() {
        let fx = fixture().await;
        let a = fx
            .service
            .receive_roll(ReceiveRollRequest::new(fx.tenant_id, fx.fabric_id, "R-A", dec!(10)))
            .await
            .unwrap();
        fx.service
            .receive_roll(ReceiveRollRequest::new(fx.tenant_id, fx.fabric_id, "R-B", dec!(20)))
            .await
            .unwrap();

        let damaged = fx.service.mark_roll_damaged(fx.tenant_id, a.id).await.unwrap();
        assert_eq!(damaged.status, RollStatus::Damaged);

        let available = fx
            .service
            .list_rolls(fx.tenant_id, fx.fabric_id, Some(RollStatus::Available))
            .await
            .unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].roll_number, "R-B");
        assert_eq!(
            fx.service
                .list_rolls(fx.tenant_id, fx.fabric_id, None)
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn rolls_are_invisible_to_other_tenants() {
        let fx = fixture().await;
        let roll = fx
            .service
            .receive_roll(ReceiveRollRequest::new(fx.tenant_id, fx.fabric_id, "R-1", dec!(10)))
            .await
            .unwrap();

        let other = Uuid::new_v4();
        assert_matches!(fx.service.get_roll(other, roll.id).await, Err(ServiceError::NotFound(_)));
        assert_matches!(
            fx.service.mark_roll_damaged(other, roll.id).await,
            Err(ServiceError::NotFound(_))
        );
        assert_matches!(
            fx.service.get_roll(Uuid::nil(), roll.id).await,
            Err(ServiceError::Unauthorized(_))
        );
    }

    #[tokio::test]
    async fn remove_keeps_rolls_with_allocation_history() {
        use crate::models::FabricAllocation;

        let fx = fixture().await;
        let roll = fx
            .service
            .receive_roll(ReceiveRollRequest::new(fx.tenant_id, fx.fabric_id, "R-1", dec!(10)))
            .await
            .unwrap();

        let mut allocation = FabricAllocation::reserve(fx.tenant_id, Uuid::new_v4(), roll.id, dec!(4));
        let mut txn = fx.store.begin().await.unwrap();
        txn.insert_allocation(&allocation).await.unwrap();
        txn.commit().await.unwrap();

        assert_matches!(
            fx.service.remove_roll(fx.tenant_id, roll.id).await,
            Err(ServiceError::Conflict(_))
        );

        allocation.cancel().unwrap();
        let mut txn = fx.store.begin().await.unwrap();
        txn.update_allocation(&allocation).await.unwrap();
        txn.commit().await.unwrap();

        // Cancelled allocations are still history.
        assert_matches!(
            fx.service.remove_roll(fx.tenant_id, roll.id).await,
            Err(ServiceError::Conflict(_))
        );
        assert!(fx.service.get_roll(fx.tenant_id, roll.id).await.is_ok());
        assert_eq!(
            fx.store.get_allocation(fx.tenant_id, allocation.id).await.unwrap(),
            Some(allocation)
        );
    }

    #[tokio::test]
    async fn remove_deletes_a_never_allocated_roll() {
        let mut fx = fixture().await;
        let roll = fx
            .service
            .receive_roll(ReceiveRollRequest::new(fx.tenant_id, fx.fabric_id, "R-1", dec!(10)))
            .await
            .unwrap();

        fx.service.remove_roll(fx.tenant_id, roll.id).await.unwrap();
        assert_matches!(
            fx.service.get_roll(fx.tenant_id, roll.id).await,
            Err(ServiceError::NotFound(_))
        );

        assert_matches!(fx.events.recv().await, Some(Event::FabricRollReceived { .. }));
        assert_matches!(
            fx.events.recv().await,
            Some(Event::FabricRollRemoved { roll_id, .. }) if roll_id == roll.id
        );
    }

    #[tokio::test]
    async fn details_update_leaves_lengths_and_status() {
        let mut fx = fixture().await;
        let roll = fx
            .service
            .receive_roll(ReceiveRollRequest::new(fx.tenant_id, fx.fabric_id, "R-1", dec!(10)))
            .await
            .unwrap();
        fx.service.mark_roll_damaged(fx.tenant_id, roll.id).await.unwrap();

        let updated = fx
            .service
            .update_roll_details(
                fx.tenant_id,
                roll.id,
                FabricRollPatch {
                    roll_number: Some("R-1A".to_string()),
                    location: Some("Shelf 4".to_string()),
                    ..FabricRollPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.roll_number, "R-1A");
        assert_eq!(updated.status, RollStatus::Damaged);

        let stored = fx.service.get_roll_by_number(fx.tenant_id, "R-1A").await.unwrap();
        assert_eq!(stored.id, roll.id);
        assert_eq!(stored.location.as_deref(), Some("Shelf 4"));
        assert_eq!(stored.current_length, dec!(10));
        assert_eq!(stored.initial_length, dec!(10));

        let mut names = Vec::new();
        for _ in 0..3 {
            names.push(fx.events.recv().await.unwrap().name());
        }
        assert_eq!(
            names,
            vec!["fabric_roll_received", "fabric_roll_damaged", "fabric_roll_updated"]
        );
    }

    #[tokio::test]
    async fn details_update_rejects_taken_numbers_and_empty_patches() {
        let fx = fixture().await;
        fx.service
            .receive_roll(ReceiveRollRequest::new(fx.tenant_id, fx.fabric_id, "R-1", dec!(10)))
            .await
            .unwrap();
        let second = fx
            .service
            .receive_roll(ReceiveRollRequest::new(fx.tenant_id, fx.fabric_id, "R-2", dec!(10)))
            .await
            .unwrap();

        let rename = |number: &str| FabricRollPatch {
            roll_number: Some(number.to_string()),
            ..FabricRollPatch::default()
        };
        assert_matches!(
            fx.service
                .update_roll_details(fx.tenant_id, second.id, rename("R-1"))
                .await,
            Err(ServiceError::Conflict(_))
        );
        assert_eq!(
            fx.service.get_roll(fx.tenant_id, second.id).await.unwrap().roll_number,
            "R-2"
        );

        assert_matches!(
            fx.service
                .update_roll_details(fx.tenant_id, second.id, FabricRollPatch::default())
                .await,
            Err(ServiceError::InvalidArgument(_))
        );
        assert_matches!(
            fx.service
                .update_roll_details(Uuid::new_v4(), second.id, rename("R-9"))
                .await,
            Err(ServiceError::NotFound(_))
        );

        // Keeping its own number is not a conflict.
        fx.service
            .update_roll_details(fx.tenant_id, second.id, rename("R-2"))
            .await
            .unwrap();
    }
}
