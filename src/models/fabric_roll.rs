use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use super::{ensure_length_scale, ensure_scale, WIDTH_SCALE};
use crate::errors::ServiceError;

/// Lifecycle state of a physical fabric roll.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RollStatus {
    Available,
    Allocated,
    Consumed,
    Damaged,
}

/// Goods-receipt data for a new roll.
#[derive(Debug, Clone)]
pub struct NewFabricRoll {
    pub tenant_id: Uuid,
    pub fabric_id: Uuid,
    pub roll_number: String,
    pub initial_length: Decimal,
    pub width: Option<Decimal>,
    pub supplier_lot_no: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub notes: Option<String>,
}

/// Corrections to a roll's descriptive fields. `None` leaves a field as is;
/// lengths and status are never part of a patch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FabricRollPatch {
    pub roll_number: Option<String>,
    pub width: Option<Decimal>,
    pub location: Option<String>,
    pub notes: Option<String>,
}

impl FabricRollPatch {
    pub fn is_empty(&self) -> bool {
        self.roll_number.is_none()
            && self.width.is_none()
            && self.location.is_none()
            && self.notes.is_none()
    }
}

fn validate_width(width: Option<Decimal>) -> Result<(), ServiceError> {
    if let Some(w) = width {
        if w <= Decimal::ZERO {
            return Err(ServiceError::InvalidArgument(
                "width must be greater than 0".to_string(),
            ));
        }
        ensure_scale("width", w, WIDTH_SCALE)?;
    }
    Ok(())
}

/// A single physical roll of fabric, tracked as a partially consumable unit.
///
/// `current_length` always stays within `0..=initial_length`. The status is
/// maintained by [`FabricRoll::allocate`] and [`FabricRoll::release`] rather
/// than being authoritative on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FabricRoll {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub fabric_id: Uuid,
    /// Human roll number, e.g. `VBC-2025-001`.
    pub roll_number: String,
    /// Meters on receipt. Never changes afterwards.
    pub initial_length: Decimal,
    /// Meters still on the roll.
    pub current_length: Decimal,
    /// Width in centimeters.
    pub width: Option<Decimal>,
    pub supplier_lot_no: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub status: RollStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FabricRoll {
    /// Creates an AVAILABLE roll whose remaining length equals its received length.
    pub fn receive(new_roll: NewFabricRoll) -> Result<Self, ServiceError> {
        if new_roll.initial_length <= Decimal::ZERO {
            return Err(ServiceError::InvalidArgument(
                "initial_length must be greater than 0".to_string(),
            ));
        }
        ensure_length_scale("initial_length", new_roll.initial_length)?;
        if new_roll.roll_number.trim().is_empty() {
            return Err(ServiceError::InvalidArgument(
                "roll_number is required".to_string(),
            ));
        }
        validate_width(new_roll.width)?;

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            tenant_id: new_roll.tenant_id,
            fabric_id: new_roll.fabric_id,
            roll_number: new_roll.roll_number.trim().to_string(),
            initial_length: new_roll.initial_length,
            current_length: new_roll.initial_length,
            width: new_roll.width,
            supplier_lot_no: new_roll.supplier_lot_no,
            received_at: new_roll.received_at.or(Some(now)),
            location: new_roll.location,
            status: RollStatus::Available,
            notes: new_roll.notes,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn can_allocate(&self, length: Decimal) -> bool {
        self.status == RollStatus::Available && self.current_length >= length
    }

    /// Removes `length` meters from the roll.
    ///
    /// The roll becomes CONSUMED when exactly nothing is left, ALLOCATED otherwise.
    pub fn allocate(&mut self, length: Decimal) -> Result<(), ServiceError> {
        if length <= Decimal::ZERO {
            return Err(ServiceError::InvalidArgument(
                "allocated length must be greater than 0".to_string(),
            ));
        }
        if !self.can_allocate(length) {
            return Err(ServiceError::CannotAllocate(self.id));
        }
        if self.current_length < length {
            return Err(ServiceError::InsufficientLength(self.id));
        }

        self.current_length -= length;
        self.status = if self.current_length.is_zero() {
            RollStatus::Consumed
        } else {
            RollStatus::Allocated
        };
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Puts `length` meters back on the roll.
    ///
    /// Only CONSUMED reverts to AVAILABLE. An ALLOCATED roll stays ALLOCATED
    /// because the roll cannot tell whether other allocations still hold part of it.
    pub fn release(&mut self, length: Decimal) -> Result<(), ServiceError> {
        if length <= Decimal::ZERO {
            return Err(ServiceError::InvalidArgument(
                "released length must be greater than 0".to_string(),
            ));
        }
        let restored = self.current_length + length;
        if restored > self.initial_length {
            return Err(ServiceError::InvalidArgument(format!(
                "releasing {}m would put roll {} above its initial length of {}m",
                length, self.roll_number, self.initial_length
            )));
        }

        self.current_length = restored;
        if self.status == RollStatus::Consumed {
            self.status = RollStatus::Available;
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Applies `patch` to the descriptive fields. Nothing changes on error.
    pub fn apply_patch(&mut self, patch: FabricRollPatch) -> Result<(), ServiceError> {
        let roll_number = match patch.roll_number {
            Some(number) if number.trim().is_empty() => {
                return Err(ServiceError::InvalidArgument(
                    "roll_number must not be empty".to_string(),
                ))
            }
            Some(number) => Some(number.trim().to_string()),
            None => None,
        };
        validate_width(patch.width)?;

        if let Some(number) = roll_number {
            self.roll_number = number;
        }
        if patch.width.is_some() {
            self.width = patch.width;
        }
        if patch.location.is_some() {
            self.location = patch.location;
        }
        if patch.notes.is_some() {
            self.notes = patch.notes;
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn mark_damaged(&mut self) {
        self.status = RollStatus::Damaged;
        self.updated_at = Utc::now();
    }

    /// Meters taken off the roll since receipt.
    pub fn consumed_length(&self) -> Decimal {
        self.initial_length - self.current_length
    }
}
