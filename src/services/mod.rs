//! Fabric inventory services.

pub mod allocation_strategy;
pub mod fabric_rolls;
pub mod inventory_allocation;

pub use allocation_strategy::{select_rolls, AllocationStrategy};
pub use fabric_rolls::{FabricRollService, ReceiveRollRequest};
pub use inventory_allocation::{
    AllocateInventoryRequest, AllocationOutcome, InventoryAllocationService, RollLedger,
};
