//! Domain models for roll-level fabric inventory.

pub mod fabric_allocation;
pub mod fabric_roll;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::errors::ServiceError;

pub use fabric_allocation::{AllocationStatus, FabricAllocation};
pub use fabric_roll::{FabricRoll, FabricRollPatch, NewFabricRoll, RollStatus};

/// Shortfall (in meters) tolerated when an allocation does not quite reach the requirement.
pub const SHORTFALL_TOLERANCE: Decimal = dec!(0.01);

/// Decimal places kept by the length columns (`DECIMAL(12,3)`).
pub const LENGTH_SCALE: u32 = 3;

/// Decimal places kept by the width column (`DECIMAL(8,2)`).
pub const WIDTH_SCALE: u32 = 2;

/// Rejects a length the database would have to round.
pub fn ensure_length_scale(field: &str, value: Decimal) -> Result<(), ServiceError> {
    ensure_scale(field, value, LENGTH_SCALE)
}

pub(crate) fn ensure_scale(field: &str, value: Decimal, max_scale: u32) -> Result<(), ServiceError> {
    // 1.2000 is fine; only significant digits count.
    if value.normalize().scale() > max_scale {
        return Err(ServiceError::InvalidArgument(format!(
            "{} supports at most {} decimal places, got {}",
            field, max_scale, value
        )));
    }
    Ok(())
}
