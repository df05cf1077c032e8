//! Roll-level fabric allocation.
//!
//! Allocation runs inside one store transaction: candidate rolls are locked
//! with skip-locked semantics, lengths are deducted, RESERVED allocation
//! records are written, and everything commits together or not at all.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::config::AllocationConfig;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::metrics;
use crate::models::{ensure_length_scale, AllocationStatus, FabricAllocation, FabricRoll};
use crate::repositories::{CandidateQuery, FabricCatalog, InventoryStore, InventoryTransaction};
use crate::services::allocation_strategy::{select_rolls, AllocationStrategy};
use crate::tracing::with_timing;

const SLOW_LOOKUP_MS: u128 = 250;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AllocateInventoryRequest {
    pub tenant_id: Uuid,
    pub order_id: Uuid,
    pub order_item_id: Option<Uuid>,
    pub fabric_id: Uuid,
    /// Meters needed.
    pub required_length: Decimal,
    /// FIFO, LIFO or BEST_FIT. Unknown values fall back to FIFO; absent
    /// uses the configured default.
    pub strategy: Option<String>,
    #[validate(length(max = 500))]
    pub notes: Option<String>,
}

impl AllocateInventoryRequest {
    pub fn new(tenant_id: Uuid, order_id: Uuid, fabric_id: Uuid, required_length: Decimal) -> Self {
        Self {
            tenant_id,
            order_id,
            order_item_id: None,
            fabric_id,
            required_length,
            strategy: None,
            notes: None,
        }
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationOutcome {
    pub allocations: Vec<FabricAllocation>,
    pub total_allocated: Decimal,
    /// Zero, or a shortfall within the configured tolerance.
    pub remaining_needed: Decimal,
    pub strategy: AllocationStrategy,
}

/// Consumption of a roll as recorded by its allocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollLedger {
    pub roll_id: Uuid,
    pub roll_number: String,
    pub initial_length: Decimal,
    pub current_length: Decimal,
    /// `initial_length - current_length`
    pub consumed_length: Decimal,
    /// Sum of non-cancelled allocation lengths.
    pub allocated_length: Decimal,
    pub active_allocations: usize,
    /// `consumed_length - allocated_length`; non-zero means the roll and its
    /// allocations disagree.
    pub drift: Decimal,
    pub balanced: bool,
}

fn ensure_tenant(tenant_id: Uuid) -> Result<(), ServiceError> {
    if tenant_id.is_nil() {
        return Err(ServiceError::Unauthorized(
            "tenant id is required".to_string(),
        ));
    }
    Ok(())
}

fn allocation_not_found(allocation_id: Uuid) -> ServiceError {
    ServiceError::NotFound(format!("fabric allocation {}", allocation_id))
}

/// Puts an allocation's length back on its roll and cancels it, within `txn`.
/// The roll is read without a row lock.
async fn release_in_txn(
    txn: &mut Box<dyn InventoryTransaction>,
    mut allocation: FabricAllocation,
) -> Result<(FabricAllocation, FabricRoll), ServiceError> {
    allocation.cancel()?;

    let mut roll = txn
        .find_roll(allocation.tenant_id, allocation.fabric_roll_id)
        .await?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("fabric roll {}", allocation.fabric_roll_id))
        })?;
    roll.release(allocation.allocated_length)?;

    txn.update_roll(&roll).await?;
    txn.update_allocation(&allocation).await?;
    Ok((allocation, roll))
}

#[derive(Clone)]
pub struct InventoryAllocationService {
    store: Arc<dyn InventoryStore>,
    catalog: Arc<dyn FabricCatalog>,
    event_sender: Arc<EventSender>,
    settings: AllocationConfig,
}

impl InventoryAllocationService {
    pub fn new(
        store: Arc<dyn InventoryStore>,
        catalog: Arc<dyn FabricCatalog>,
        event_sender: Arc<EventSender>,
        settings: AllocationConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            event_sender,
            settings,
        }
    }

    pub fn settings(&self) -> &AllocationConfig {
        &self.settings
    }

    fn resolve_strategy(&self, requested: Option<&str>) -> AllocationStrategy {
        match requested.map(str::trim).filter(|s| !s.is_empty()) {
            Some(name) => AllocationStrategy::parse_lenient(Some(name)),
            None => self.settings.default_strategy,
        }
    }

    /// Allocates `required_length` meters of a fabric to an order.
    ///
    /// Either every allocation record and length deduction is committed, or
    /// none is.
    #[instrument(
        skip(self, request),
        fields(
            tenant_id = %request.tenant_id,
            order_id = %request.order_id,
            fabric_id = %request.fabric_id,
            required_length = %request.required_length
        )
    )]
    pub async fn allocate_inventory(
        &self,
        request: AllocateInventoryRequest,
    ) -> Result<AllocationOutcome, ServiceError> {
        let result = self.try_allocate(&request).await;
        match &result {
            Ok(outcome) => {
                metrics::record_allocation(outcome.total_allocated);
                info!(
                    allocations = outcome.allocations.len(),
                    total_allocated = %outcome.total_allocated,
                    strategy = %outcome.strategy,
                    "fabric allocated"
                );
            }
            Err(e) => {
                metrics::record_allocation_failure(&e.code().to_ascii_lowercase());
                warn!(error = %e, "fabric allocation failed");
            }
        }
        result
    }

    async fn try_allocate(
        &self,
        request: &AllocateInventoryRequest,
    ) -> Result<AllocationOutcome, ServiceError> {
        request.validate()?;
        ensure_tenant(request.tenant_id)?;
        if request.required_length <= Decimal::ZERO {
            return Err(ServiceError::InvalidArgument(
                "required_length must be greater than 0".to_string(),
            ));
        }
        ensure_length_scale("required_length", request.required_length)?;
        let required = request.required_length;
        let strategy = self.resolve_strategy(request.strategy.as_deref());

        let (tenant_id, fabric_id) = (request.tenant_id, request.fabric_id);
        let catalog = &self.catalog;
        let fabric_known = with_timing("fabric_exists", SLOW_LOOKUP_MS, move || {
            catalog.fabric_exists(tenant_id, fabric_id)
        })
        .await?;
        if !fabric_known {
            return Err(ServiceError::FabricNotFound(fabric_id));
        }

        // Dropped without commit on every early return below.
        let mut txn = self.store.begin().await?;

        let query = CandidateQuery {
            tenant_id: request.tenant_id,
            fabric_id: request.fabric_id,
            min_length: if self.settings.allow_split_across_rolls {
                Decimal::ZERO
            } else {
                required
            },
        };
        let candidates = txn.lock_candidate_rolls(&query).await?;
        if candidates.is_empty() {
            return Err(ServiceError::InsufficientInventory(format!(
                "no available fabric rolls for fabric_id={}, required_length={:.2}m",
                request.fabric_id, required
            )));
        }

        let selected: Vec<FabricRoll> = select_rolls(&candidates, required, strategy)
            .into_iter()
            .cloned()
            .collect();
        if selected.is_empty() {
            return Err(ServiceError::InsufficientInventory(format!(
                "cannot allocate {:.2}m from available rolls",
                required
            )));
        }
        debug!(
            candidates = candidates.len(),
            selected = selected.len(),
            "rolls selected"
        );

        let mut allocations = Vec::with_capacity(selected.len());
        let mut remaining = required;
        let mut total_allocated = Decimal::ZERO;

        for mut roll in selected {
            if remaining <= Decimal::ZERO {
                break;
            }
            let length = remaining.min(roll.current_length);
            roll.allocate(length)?;
            txn.update_roll(&roll).await?;

            let mut allocation =
                FabricAllocation::reserve(request.tenant_id, request.order_id, roll.id, length);
            allocation.order_item_id = request.order_item_id;
            allocation.notes = request.notes.clone();
            txn.insert_allocation(&allocation).await?;

            remaining -= length;
            total_allocated += length;
            allocations.push(allocation);
        }

        if remaining > self.settings.shortfall_tolerance {
            return Err(ServiceError::InsufficientInventory(format!(
                "still need {:.2}m after allocating from all available rolls",
                remaining
            )));
        }

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::FabricAllocated {
                tenant_id: request.tenant_id,
                order_id: request.order_id,
                fabric_id: request.fabric_id,
                allocation_ids: allocations.iter().map(|a| a.id).collect(),
                total_allocated,
                remaining_needed: remaining,
                strategy: strategy.to_string(),
            })
            .await;

        Ok(AllocationOutcome {
            allocations,
            total_allocated,
            remaining_needed: remaining,
            strategy,
        })
    }

    /// Returns an allocation's length to its roll and cancels it.
    ///
    /// Releasing an already cancelled allocation succeeds without changes.
    /// The status is checked again inside the transaction, but neither the
    /// allocation nor the roll is locked: two releases whose transactions
    /// overlap can both credit the roll, and a release racing an allocation
    /// of the same roll can lose one of the two writes.
    #[instrument(skip(self))]
    pub async fn release_allocation(
        &self,
        tenant_id: Uuid,
        allocation_id: Uuid,
    ) -> Result<(), ServiceError> {
        ensure_tenant(tenant_id)?;

        let allocation = self
            .store
            .get_allocation(tenant_id, allocation_id)
            .await?
            .ok_or_else(|| allocation_not_found(allocation_id))?;
        if allocation.status == AllocationStatus::Cancelled {
            debug!("allocation already cancelled");
            return Ok(());
        }

        let mut txn = self.store.begin().await?;
        // A concurrent release may have committed since the read above.
        let allocation = txn
            .find_allocation(tenant_id, allocation.id)
            .await?
            .ok_or_else(|| allocation_not_found(allocation_id))?;
        if allocation.status == AllocationStatus::Cancelled {
            debug!("allocation cancelled by a concurrent release");
            return Ok(());
        }
        let (released, roll) = release_in_txn(&mut txn, allocation).await?;
        txn.commit().await?;

        metrics::record_release();
        info!(
            roll_id = %roll.id,
            released_length = %released.allocated_length,
            roll_length = %roll.current_length,
            "fabric allocation released"
        );
        self.event_sender
            .send_or_log(Event::FabricAllocationReleased {
                tenant_id,
                allocation_id,
                roll_id: roll.id,
                released_length: released.allocated_length,
            })
            .await;
        Ok(())
    }

    /// Releases every RESERVED or CONFIRMED allocation of an order in one
    /// transaction. CUT allocations are left alone. Returns the released ids.
    #[instrument(skip(self))]
    pub async fn release_order_allocations(
        &self,
        tenant_id: Uuid,
        order_id: Uuid,
    ) -> Result<Vec<Uuid>, ServiceError> {
        ensure_tenant(tenant_id)?;

        let releasable: Vec<FabricAllocation> = self
            .store
            .list_allocations_by_order(tenant_id, order_id)
            .await?
            .into_iter()
            .filter(|a| a.status.is_cancellable())
            .collect();
        if releasable.is_empty() {
            return Ok(Vec::new());
        }

        let mut txn = self.store.begin().await?;
        let mut released = Vec::with_capacity(releasable.len());
        for allocation in releasable {
            released.push(release_in_txn(&mut txn, allocation).await?);
        }
        txn.commit().await?;

        for (allocation, roll) in &released {
            metrics::record_release();
            self.event_sender
                .send_or_log(Event::FabricAllocationReleased {
                    tenant_id,
                    allocation_id: allocation.id,
                    roll_id: roll.id,
                    released_length: allocation.allocated_length,
                })
                .await;
        }
        info!(released = released.len(), "order allocations released");
        Ok(released.into_iter().map(|(a, _)| a.id).collect())
    }

    #[instrument(skip(self))]
    pub async fn confirm_allocation(
        &self,
        tenant_id: Uuid,
        allocation_id: Uuid,
    ) -> Result<FabricAllocation, ServiceError> {
        ensure_tenant(tenant_id)?;

        let mut txn = self.store.begin().await?;
        let mut allocation = txn
            .find_allocation(tenant_id, allocation_id)
            .await?
            .ok_or_else(|| allocation_not_found(allocation_id))?;
        allocation.confirm()?;
        txn.update_allocation(&allocation).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::FabricAllocationConfirmed {
                tenant_id,
                allocation_id,
            })
            .await;
        Ok(allocation)
    }

    /// Records that the allocated fabric was cut. The roll itself is not
    /// touched; its length was deducted at allocation time.
    #[instrument(skip(self))]
    pub async fn mark_allocation_cut(
        &self,
        tenant_id: Uuid,
        allocation_id: Uuid,
        actual_used_length: Decimal,
        remnant_length: Decimal,
    ) -> Result<FabricAllocation, ServiceError> {
        ensure_tenant(tenant_id)?;
        ensure_length_scale("actual_used_length", actual_used_length)?;
        ensure_length_scale("remnant_length", remnant_length)?;

        let mut txn = self.store.begin().await?;
        let mut allocation = txn
            .find_allocation(tenant_id, allocation_id)
            .await?
            .ok_or_else(|| allocation_not_found(allocation_id))?;

        if self.settings.enforce_cut_balance {
            let gap = allocation.cut_balance_gap(actual_used_length, remnant_length);
            if gap > self.settings.shortfall_tolerance {
                return Err(ServiceError::InvalidArgument(format!(
                    "actual_used_length + remnant_length must equal allocated length {}m (off by {}m)",
                    allocation.allocated_length, gap
                )));
            }
        }
        allocation.mark_as_cut(actual_used_length, remnant_length)?;
        txn.update_allocation(&allocation).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::FabricAllocationCut {
                tenant_id,
                allocation_id,
                actual_used_length,
                remnant_length,
            })
            .await;
        Ok(allocation)
    }

    pub async fn get_allocation(
        &self,
        tenant_id: Uuid,
        allocation_id: Uuid,
    ) -> Result<FabricAllocation, ServiceError> {
        ensure_tenant(tenant_id)?;
        self.store
            .get_allocation(tenant_id, allocation_id)
            .await?
            .ok_or_else(|| allocation_not_found(allocation_id))
    }

    pub async fn list_order_allocations(
        &self,
        tenant_id: Uuid,
        order_id: Uuid,
    ) -> Result<Vec<FabricAllocation>, ServiceError> {
        ensure_tenant(tenant_id)?;
        self.store.list_allocations_by_order(tenant_id, order_id).await
    }

    pub async fn list_active_roll_allocations(
        &self,
        tenant_id: Uuid,
        roll_id: Uuid,
    ) -> Result<Vec<FabricAllocation>, ServiceError> {
        ensure_tenant(tenant_id)?;
        self.store
            .list_active_allocations_by_roll(tenant_id, roll_id)
            .await
    }

    /// Compares what a roll has lost against what its allocations account for.
    #[instrument(skip(self))]
    pub async fn roll_ledger(
        &self,
        tenant_id: Uuid,
        roll_id: Uuid,
    ) -> Result<RollLedger, ServiceError> {
        ensure_tenant(tenant_id)?;
        let roll = self
            .store
            .get_roll(tenant_id, roll_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("fabric roll {}", roll_id)))?;
        let active = self
            .store
            .list_active_allocations_by_roll(tenant_id, roll_id)
            .await?;

        let allocated_length: Decimal = active.iter().map(|a| a.allocated_length).sum();
        let consumed_length = roll.consumed_length();
        let drift = consumed_length - allocated_length;
        let balanced = drift.abs() <= self.settings.shortfall_tolerance;
        if !balanced {
            warn!(%roll_id, %drift, "roll length does not match its allocations");
        }

        Ok(RollLedger {
            roll_id,
            roll_number: roll.roll_number,
            initial_length: roll.initial_length,
            current_length: roll.current_length,
            consumed_length,
            allocated_length,
            active_allocations: active.len(),
            drift,
            balanced,
        })
    }
}
