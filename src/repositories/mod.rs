//! Storage contracts for rolls and allocations.
//!
//! The allocation service only talks to storage through these traits, so it
//! runs unchanged against [`SeaOrmInventoryStore`] and the in-memory
//! [`InMemoryInventoryStore`] double.

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::{FabricAllocation, FabricRoll, RollStatus};

pub mod in_memory;
pub mod sea_orm_store;

pub use in_memory::InMemoryInventoryStore;
pub use sea_orm_store::SeaOrmInventoryStore;

/// Filter for the rolls an allocation may draw from.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateQuery {
    pub tenant_id: Uuid,
    pub fabric_id: Uuid,
    /// Rolls with less than this many meters left are not candidates.
    pub min_length: Decimal,
}

/// A unit of work against the inventory tables.
///
/// Dropping a transaction without calling [`InventoryTransaction::commit`]
/// rolls it back and releases every row lock it holds.
#[async_trait]
pub trait InventoryTransaction: Send {
    /// Locks and returns AVAILABLE rolls matching `query`, ascending by
    /// `current_length`. Rows already locked by another transaction are
    /// skipped, never waited on.
    async fn lock_candidate_rolls(
        &mut self,
        query: &CandidateQuery,
    ) -> Result<Vec<FabricRoll>, ServiceError>;

    /// Plain read of a roll; takes no row lock.
    async fn find_roll(
        &mut self,
        tenant_id: Uuid,
        roll_id: Uuid,
    ) -> Result<Option<FabricRoll>, ServiceError>;

    async fn find_allocation(
        &mut self,
        tenant_id: Uuid,
        allocation_id: Uuid,
    ) -> Result<Option<FabricAllocation>, ServiceError>;

    async fn count_active_allocations(
        &mut self,
        tenant_id: Uuid,
        roll_id: Uuid,
    ) -> Result<u64, ServiceError>;

    /// Allocation records of any status, cancelled ones included.
    async fn count_allocations(&mut self, tenant_id: Uuid, roll_id: Uuid)
        -> Result<u64, ServiceError>;

    async fn insert_roll(&mut self, roll: &FabricRoll) -> Result<(), ServiceError>;

    /// Persists length, status and descriptive fields; `NotFound` when the
    /// roll does not exist for the roll's tenant, `Conflict` when its roll
    /// number is taken by another roll of the tenant.
    async fn update_roll(&mut self, roll: &FabricRoll) -> Result<(), ServiceError>;

    /// Deletes a roll no allocation record references; `Conflict` otherwise.
    async fn delete_roll(&mut self, tenant_id: Uuid, roll_id: Uuid) -> Result<(), ServiceError>;

    async fn insert_allocation(&mut self, allocation: &FabricAllocation)
        -> Result<(), ServiceError>;

    async fn update_allocation(&mut self, allocation: &FabricAllocation)
        -> Result<(), ServiceError>;

    async fn commit(self: Box<Self>) -> Result<(), ServiceError>;
}

/// Entry point to inventory storage: opens transactions and serves
/// tenant-scoped reads outside of them.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn InventoryTransaction>, ServiceError>;

    async fn get_roll(&self, tenant_id: Uuid, roll_id: Uuid)
        -> Result<Option<FabricRoll>, ServiceError>;

    async fn get_roll_by_number(
        &self,
        tenant_id: Uuid,
        roll_number: &str,
    ) -> Result<Option<FabricRoll>, ServiceError>;

    /// Rolls of one fabric, newest first.
    async fn list_rolls(
        &self,
        tenant_id: Uuid,
        fabric_id: Uuid,
        status: Option<RollStatus>,
    ) -> Result<Vec<FabricRoll>, ServiceError>;

    async fn get_allocation(
        &self,
        tenant_id: Uuid,
        allocation_id: Uuid,
    ) -> Result<Option<FabricAllocation>, ServiceError>;

    /// Allocations of one order, oldest first.
    async fn list_allocations_by_order(
        &self,
        tenant_id: Uuid,
        order_id: Uuid,
    ) -> Result<Vec<FabricAllocation>, ServiceError>;

    /// Non-cancelled allocations drawing on one roll, oldest first.
    async fn list_active_allocations_by_roll(
        &self,
        tenant_id: Uuid,
        roll_id: Uuid,
    ) -> Result<Vec<FabricAllocation>, ServiceError>;
}

/// The fabric master rolls are received against.
#[async_trait]
pub trait FabricCatalog: Send + Sync {
    async fn fabric_exists(&self, tenant_id: Uuid, fabric_id: Uuid) -> Result<bool, ServiceError>;

    /// Registers a fabric and returns its id.
    async fn register_fabric(
        &self,
        tenant_id: Uuid,
        name: &str,
        sku: Option<String>,
    ) -> Result<Uuid, ServiceError>;
}
