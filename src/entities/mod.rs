//! SeaORM entities for the fabric inventory tables.

pub mod fabric;
pub mod fabric_allocation;
pub mod fabric_roll;

pub use fabric::{Entity as Fabric, Model as FabricModel};
pub use fabric_allocation::{Entity as FabricAllocationEntity, Model as FabricAllocationModel};
pub use fabric_roll::{Entity as FabricRollEntity, Model as FabricRollModel};
