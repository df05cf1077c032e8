//! Process-local inventory store.
//!
//! Mirrors the row-locking behaviour of the relational store closely enough
//! for the allocation service to be exercised without a database: candidate
//! rows are locked per transaction and skipped by others, writes are staged
//! until commit, and dropping a transaction discards its writes and locks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::{debug, trace};
use uuid::Uuid;

use super::{CandidateQuery, FabricCatalog, InventoryStore, InventoryTransaction};
use crate::errors::ServiceError;
use crate::models::{FabricAllocation, FabricRoll, RollStatus};

#[derive(Debug, Clone)]
struct FabricRecord {
    tenant_id: Uuid,
    #[allow(dead_code)]
    name: String,
    #[allow(dead_code)]
    sku: Option<String>,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Tables {
    fabrics: DashMap<Uuid, FabricRecord>,
    rolls: DashMap<Uuid, FabricRoll>,
    allocations: DashMap<Uuid, FabricAllocation>,
    /// roll id -> id of the transaction holding its row lock
    row_locks: DashMap<Uuid, u64>,
    /// Serialises commits so each one applies atomically.
    commit_gate: Mutex<()>,
    next_txn: AtomicU64,
}

/// `dashmap`-backed store; clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryStore {
    tables: Arc<Tables>,
}

impl InMemoryInventoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of roll rows currently locked by open transactions.
    pub fn locked_rows(&self) -> usize {
        self.tables.row_locks.len()
    }

    /// Typed handle on an open transaction, for callers that need to
    /// interleave two transactions step by step.
    pub fn begin_local(&self) -> InMemoryTransaction {
        let id = self.tables.next_txn.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(txn = id, "begin");
        InMemoryTransaction {
            id,
            tables: Arc::clone(&self.tables),
            held_locks: Vec::new(),
            staged_rolls: HashMap::new(),
            staged_allocations: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
enum StagedRoll {
    Upsert(FabricRoll),
    Deleted,
}

pub struct InMemoryTransaction {
    id: u64,
    tables: Arc<Tables>,
    held_locks: Vec<Uuid>,
    staged_rolls: HashMap<Uuid, StagedRoll>,
    staged_allocations: HashMap<Uuid, FabricAllocation>,
}

impl InMemoryTransaction {
    /// Takes the row lock on `roll_id` unless another transaction holds it.
    fn try_lock(&mut self, roll_id: Uuid) -> bool {
        match self.tables.row_locks.entry(roll_id) {
            Entry::Vacant(slot) => {
                slot.insert(self.id);
                self.held_locks.push(roll_id);
                true
            }
            Entry::Occupied(slot) => *slot.get() == self.id,
        }
    }

    fn unlock(&mut self, roll_id: Uuid) {
        let id = self.id;
        self.tables.row_locks.remove_if(&roll_id, |_, owner| *owner == id);
        self.held_locks.retain(|held| *held != roll_id);
    }

    fn release_locks(&mut self) {
        let id = self.id;
        for roll_id in self.held_locks.drain(..) {
            self.tables.row_locks.remove_if(&roll_id, |_, owner| *owner == id);
        }
    }

    /// The roll as this transaction sees it: its own staged write, else the
    /// committed row.
    fn visible_roll(&self, roll_id: Uuid) -> Option<FabricRoll> {
        match self.staged_rolls.get(&roll_id) {
            Some(StagedRoll::Upsert(roll)) => Some(roll.clone()),
            Some(StagedRoll::Deleted) => None,
            None => self.tables.rolls.get(&roll_id).map(|r| r.value().clone()),
        }
    }

    fn visible_allocations(&self) -> Vec<FabricAllocation> {
        let mut merged: HashMap<Uuid, FabricAllocation> = self
            .tables
            .allocations
            .iter()
            .map(|a| (*a.key(), a.value().clone()))
            .collect();
        for (id, staged) in &self.staged_allocations {
            merged.insert(*id, staged.clone());
        }
        merged.into_values().collect()
    }

    fn roll_number_taken(&self, roll: &FabricRoll) -> bool {
        let committed = self.tables.rolls.iter().any(|existing| {
            existing.id != roll.id
                && existing.tenant_id == roll.tenant_id
                && existing.roll_number == roll.roll_number
                && !matches!(self.staged_rolls.get(&existing.id), Some(StagedRoll::Deleted))
        });
        let staged = self.staged_rolls.values().any(|staged| match staged {
            StagedRoll::Upsert(other) => {
                other.id != roll.id
                    && other.tenant_id == roll.tenant_id
                    && other.roll_number == roll.roll_number
            }
            StagedRoll::Deleted => false,
        });
        committed || staged
    }

    fn check_length_bounds(roll: &FabricRoll) -> Result<(), ServiceError> {
        if roll.current_length < Decimal::ZERO || roll.current_length > roll.initial_length {
            return Err(ServiceError::InternalError(format!(
                "roll {} length {} outside 0..={}",
                roll.id, roll.current_length, roll.initial_length
            )));
        }
        Ok(())
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if !self.held_locks.is_empty() {
            debug!(txn = self.id, locks = self.held_locks.len(), "rolling back");
        }
        self.release_locks();
    }
}

#[async_trait]
impl InventoryTransaction for InMemoryTransaction {
    async fn lock_candidate_rolls(
        &mut self,
        query: &CandidateQuery,
    ) -> Result<Vec<FabricRoll>, ServiceError> {
        let matches = |roll: &FabricRoll| {
            roll.tenant_id == query.tenant_id
                && roll.fabric_id == query.fabric_id
                && roll.status == RollStatus::Available
                && roll.current_length >= query.min_length
                && roll.current_length > Decimal::ZERO
        };

        let scanned: Vec<Uuid> = self
            .tables
            .rolls
            .iter()
            .filter(|r| matches(r.value()))
            .map(|r| *r.key())
            .collect();

        let mut locked = Vec::new();
        for roll_id in scanned {
            let already_held = self.held_locks.contains(&roll_id);
            if !self.try_lock(roll_id) {
                trace!(txn = self.id, %roll_id, "skipping locked roll");
                continue;
            }
            // Re-check after locking: another transaction may have committed
            // between the scan and the lock.
            match self.visible_roll(roll_id) {
                Some(roll) if matches(&roll) => locked.push(roll),
                _ if !already_held => self.unlock(roll_id),
                _ => {}
            }
        }

        locked.sort_by(|a, b| {
            a.current_length
                .cmp(&b.current_length)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(locked)
    }

    async fn find_roll(
        &mut self,
        tenant_id: Uuid,
        roll_id: Uuid,
    ) -> Result<Option<FabricRoll>, ServiceError> {
        Ok(self
            .visible_roll(roll_id)
            .filter(|roll| roll.tenant_id == tenant_id))
    }

    async fn find_allocation(
        &mut self,
        tenant_id: Uuid,
        allocation_id: Uuid,
    ) -> Result<Option<FabricAllocation>, ServiceError> {
        let allocation = match self.staged_allocations.get(&allocation_id) {
            Some(staged) => Some(staged.clone()),
            None => self
                .tables
                .allocations
                .get(&allocation_id)
                .map(|a| a.value().clone()),
        };
        Ok(allocation.filter(|a| a.tenant_id == tenant_id))
    }

    async fn count_active_allocations(
        &mut self,
        tenant_id: Uuid,
        roll_id: Uuid,
    ) -> Result<u64, ServiceError> {
        let count = self
            .visible_allocations()
            .iter()
            .filter(|a| a.tenant_id == tenant_id && a.fabric_roll_id == roll_id && a.is_active())
            .count();
        Ok(count as u64)
    }

    async fn count_allocations(
        &mut self,
        tenant_id: Uuid,
        roll_id: Uuid,
    ) -> Result<u64, ServiceError> {
        let count = self
            .visible_allocations()
            .iter()
            .filter(|a| a.tenant_id == tenant_id && a.fabric_roll_id == roll_id)
            .count();
        Ok(count as u64)
    }

    async fn insert_roll(&mut self, roll: &FabricRoll) -> Result<(), ServiceError> {
        if self.visible_roll(roll.id).is_some() {
            return Err(ServiceError::Conflict(format!("fabric roll {} already exists", roll.id)));
        }
        if self.roll_number_taken(roll) {
            return Err(ServiceError::Conflict(format!(
                "roll number {} already exists",
                roll.roll_number
            )));
        }
        Self::check_length_bounds(roll)?;
        self.staged_rolls
            .insert(roll.id, StagedRoll::Upsert(roll.clone()));
        Ok(())
    }

    async fn update_roll(&mut self, roll: &FabricRoll) -> Result<(), ServiceError> {
        match self.visible_roll(roll.id) {
            Some(existing) if existing.tenant_id == roll.tenant_id => {}
            _ => return Err(ServiceError::NotFound(format!("fabric roll {}", roll.id))),
        }
        Self::check_length_bounds(roll)?;
        if self.roll_number_taken(roll) {
            return Err(ServiceError::Conflict(format!(
                "roll number {} already exists",
                roll.roll_number
            )));
        }
        // An UPDATE takes the row lock when it is free.
        self.try_lock(roll.id);
        self.staged_rolls
            .insert(roll.id, StagedRoll::Upsert(roll.clone()));
        Ok(())
    }

    async fn delete_roll(&mut self, tenant_id: Uuid, roll_id: Uuid) -> Result<(), ServiceError> {
        match self.visible_roll(roll_id) {
            Some(existing) if existing.tenant_id == tenant_id => {}
            _ => return Err(ServiceError::NotFound(format!("fabric roll {}", roll_id))),
        }
        // Allocation rows restrict the delete.
        if self
            .visible_allocations()
            .iter()
            .any(|a| a.fabric_roll_id == roll_id)
        {
            return Err(ServiceError::Conflict(format!(
                "fabric roll {} is referenced by allocations",
                roll_id
            )));
        }
        self.try_lock(roll_id);
        self.staged_rolls.insert(roll_id, StagedRoll::Deleted);
        Ok(())
    }

    async fn insert_allocation(
        &mut self,
        allocation: &FabricAllocation,
    ) -> Result<(), ServiceError> {
        if allocation.allocated_length <= Decimal::ZERO {
            return Err(ServiceError::InvalidArgument(
                "allocated length must be greater than 0".to_string(),
            ));
        }
        if self.visible_roll(allocation.fabric_roll_id).is_none() {
            return Err(ServiceError::NotFound(format!(
                "fabric roll {}",
                allocation.fabric_roll_id
            )));
        }
        if self.tables.allocations.contains_key(&allocation.id)
            || self.staged_allocations.contains_key(&allocation.id)
        {
            return Err(ServiceError::Conflict(format!(
                "fabric allocation {} already exists",
                allocation.id
            )));
        }
        self.staged_allocations
            .insert(allocation.id, allocation.clone());
        Ok(())
    }

    async fn update_allocation(
        &mut self,
        allocation: &FabricAllocation,
    ) -> Result<(), ServiceError> {
        match self.find_allocation(allocation.tenant_id, allocation.id).await? {
            Some(_) => {
                self.staged_allocations
                    .insert(allocation.id, allocation.clone());
                Ok(())
            }
            None => Err(ServiceError::NotFound(format!(
                "fabric allocation {}",
                allocation.id
            ))),
        }
    }

    async fn commit(mut self: Box<Self>) -> Result<(), ServiceError> {
        {
            let _gate = self
                .tables
                .commit_gate
                .lock()
                .map_err(|_| ServiceError::InternalError("commit gate poisoned".to_string()))?;

            for staged in self.staged_rolls.values() {
                if let StagedRoll::Upsert(roll) = staged {
                    if self.roll_number_taken(roll) {
                        return Err(ServiceError::Conflict(format!(
                            "roll number {} already exists",
                            roll.roll_number
                        )));
                    }
                }
            }

            for (roll_id, staged) in self.staged_rolls.drain() {
                match staged {
                    StagedRoll::Upsert(roll) => {
                        self.tables.rolls.insert(roll_id, roll);
                    }
                    StagedRoll::Deleted => {
                        self.tables.rolls.remove(&roll_id);
                    }
                }
            }
            for (allocation_id, allocation) in self.staged_allocations.drain() {
                self.tables.allocations.insert(allocation_id, allocation);
            }
        }

        trace!(txn = self.id, "commit");
        self.release_locks();
        Ok(())
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn begin(&self) -> Result<Box<dyn InventoryTransaction>, ServiceError> {
        Ok(Box::new(self.begin_local()))
    }

    async fn get_roll(
        &self,
        tenant_id: Uuid,
        roll_id: Uuid,
    ) -> Result<Option<FabricRoll>, ServiceError> {
        Ok(self
            .tables
            .rolls
            .get(&roll_id)
            .map(|r| r.value().clone())
            .filter(|r| r.tenant_id == tenant_id))
    }

    async fn get_roll_by_number(
        &self,
        tenant_id: Uuid,
        roll_number: &str,
    ) -> Result<Option<FabricRoll>, ServiceError> {
        Ok(self
            .tables
            .rolls
            .iter()
            .find(|r| r.tenant_id == tenant_id && r.roll_number == roll_number)
            .map(|r| r.value().clone()))
    }

    async fn list_rolls(
        &self,
        tenant_id: Uuid,
        fabric_id: Uuid,
        status: Option<RollStatus>,
    ) -> Result<Vec<FabricRoll>, ServiceError> {
        let mut rolls: Vec<FabricRoll> = self
            .tables
            .rolls
            .iter()
            .filter(|r| r.tenant_id == tenant_id && r.fabric_id == fabric_id)
            .filter(|r| status.map_or(true, |s| r.status == s))
            .map(|r| r.value().clone())
            .collect();
        rolls.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rolls)
    }

    async fn get_allocation(
        &self,
        tenant_id: Uuid,
        allocation_id: Uuid,
    ) -> Result<Option<FabricAllocation>, ServiceError> {
        Ok(self
            .tables
            .allocations
            .get(&allocation_id)
            .map(|a| a.value().clone())
            .filter(|a| a.tenant_id == tenant_id))
    }

    async fn list_allocations_by_order(
        &self,
        tenant_id: Uuid,
        order_id: Uuid,
    ) -> Result<Vec<FabricAllocation>, ServiceError> {
        let mut allocations: Vec<FabricAllocation> = self
            .tables
            .allocations
            .iter()
            .filter(|a| a.tenant_id == tenant_id && a.order_id == order_id)
            .map(|a| a.value().clone())
            .collect();
        allocations.sort_by(|a, b| a.allocated_at.cmp(&b.allocated_at));
        Ok(allocations)
    }

    async fn list_active_allocations_by_roll(
        &self,
        tenant_id: Uuid,
        roll_id: Uuid,
    ) -> Result<Vec<FabricAllocation>, ServiceError> {
        let mut allocations: Vec<FabricAllocation> = self
            .tables
            .allocations
            .iter()
            .filter(|a| a.tenant_id == tenant_id && a.fabric_roll_id == roll_id && a.is_active())
            .map(|a| a.value().clone())
            .collect();
        allocations.sort_by(|a, b| a.allocated_at.cmp(&b.allocated_at));
        Ok(allocations)
    }
}

#[async_trait]
impl FabricCatalog for InMemoryInventoryStore {
    async fn fabric_exists(&self, tenant_id: Uuid, fabric_id: Uuid) -> Result<bool, ServiceError> {
        Ok(self
            .tables
            .fabrics
            .get(&fabric_id)
            .map_or(false, |f| f.tenant_id == tenant_id))
    }

    async fn register_fabric(
        &self,
        tenant_id: Uuid,
        name: &str,
        sku: Option<String>,
    ) -> Result<Uuid, ServiceError> {
        let id = Uuid::new_v4();
        self.tables.fabrics.insert(
            id,
            FabricRecord {
                tenant_id,
                name: name.to_string(),
                sku,
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }
}
