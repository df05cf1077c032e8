use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::errors::ServiceError;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationStatus {
    Reserved,
    Confirmed,
    Cut,
    Cancelled,
}

impl AllocationStatus {
    pub fn is_cancellable(self) -> bool {
        matches!(self, Self::Reserved | Self::Confirmed)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cut | Self::Cancelled)
    }
}

/// A claim on part of one roll for one order.
///
/// Records are never deleted; cancelled and cut allocations stay as the audit
/// trail of how a roll's material was used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FabricAllocation {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub order_id: Uuid,
    pub order_item_id: Option<Uuid>,
    pub fabric_roll_id: Uuid,
    pub allocated_length: Decimal,
    pub actual_used_length: Option<Decimal>,
    /// Offcut left over after cutting.
    pub remnant_length: Option<Decimal>,
    pub status: AllocationStatus,
    pub allocated_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cut_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FabricAllocation {
    pub fn reserve(
        tenant_id: Uuid,
        order_id: Uuid,
        fabric_roll_id: Uuid,
        allocated_length: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            order_id,
            order_item_id: None,
            fabric_roll_id,
            allocated_length,
            actual_used_length: None,
            remnant_length: None,
            status: AllocationStatus::Reserved,
            allocated_at: now,
            confirmed_at: None,
            cut_at: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status != AllocationStatus::Cancelled
    }

    pub fn confirm(&mut self) -> Result<(), ServiceError> {
        if self.status != AllocationStatus::Reserved {
            return Err(self.invalid_transition("confirm"));
        }
        let now = Utc::now();
        self.status = AllocationStatus::Confirmed;
        self.confirmed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Records the cut. Whether `actual_used + remnant` must add up to the
    /// allocated length is a policy of the caller; see [`Self::cut_balance_gap`].
    pub fn mark_as_cut(
        &mut self,
        actual_used_length: Decimal,
        remnant_length: Decimal,
    ) -> Result<(), ServiceError> {
        if !self.status.is_cancellable() {
            return Err(self.invalid_transition("cut"));
        }
        if actual_used_length < Decimal::ZERO || remnant_length < Decimal::ZERO {
            return Err(ServiceError::InvalidArgument(
                "cut lengths must not be negative".to_string(),
            ));
        }
        let now = Utc::now();
        self.status = AllocationStatus::Cut;
        self.actual_used_length = Some(actual_used_length);
        self.remnant_length = Some(remnant_length);
        self.cut_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Absolute difference between the allocated length and what a cut reports.
    pub fn cut_balance_gap(&self, actual_used_length: Decimal, remnant_length: Decimal) -> Decimal {
        (self.allocated_length - actual_used_length - remnant_length).abs()
    }

    pub fn cancel(&mut self) -> Result<(), ServiceError> {
        if !self.status.is_cancellable() {
            return Err(self.invalid_transition("cancel"));
        }
        self.status = AllocationStatus::Cancelled;
        self.updated_at = Utc::now();
        Ok(())
    }

    fn invalid_transition(&self, action: &str) -> ServiceError {
        ServiceError::InvalidStatus(format!(
            "cannot {} allocation {} in status {}",
            action, self.id, self.status
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn reserved(length: Decimal) -> FabricAllocation {
        FabricAllocation::reserve(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), length)
    }

    #[test]
    fn reserve_starts_reserved() {
        let a = reserved(dec!(3.2));
        assert_eq!(a.status, AllocationStatus::Reserved);
        assert!(a.is_active());
        assert!(a.confirmed_at.is_none());
        assert!(a.cut_at.is_none());
    }

    #[test]
    fn confirm_stamps_confirmed_at() {
        let mut a = reserved(dec!(3.2));
        a.confirm().unwrap();
        assert_eq!(a.status, AllocationStatus::Confirmed);
        assert!(a.confirmed_at.is_some());
        assert_matches!(a.confirm(), Err(ServiceError::InvalidStatus(_)));
    }

    #[test]
    fn mark_as_cut_records_usage() {
        let mut a = reserved(dec!(3.2));
        a.confirm().unwrap();
        a.mark_as_cut(dec!(3.0), dec!(0.2)).unwrap();
        assert_eq!(a.status, AllocationStatus::Cut);
        assert_eq!(a.actual_used_length, Some(dec!(3.0)));
        assert_eq!(a.remnant_length, Some(dec!(0.2)));
        assert!(a.cut_at.is_some());
        assert_eq!(a.cut_balance_gap(dec!(3.0), dec!(0.2)), Decimal::ZERO);
    }

    #[test]
    fn cut_allocations_are_terminal() {
        let mut a = reserved(dec!(2));
        a.mark_as_cut(dec!(2), Decimal::ZERO).unwrap();
        assert!(a.status.is_terminal());
        assert_matches!(a.cancel(), Err(ServiceError::InvalidStatus(_)));
        assert_matches!(a.mark_as_cut(dec!(1), dec!(1)), Err(ServiceError::InvalidStatus(_)));
    }

    #[test]
    fn cancel_from_reserved_or_confirmed() {
        let mut a = reserved(dec!(2));
        a.cancel().unwrap();
        assert_eq!(a.status, AllocationStatus::Cancelled);
        assert!(!a.is_active());

        let mut b = reserved(dec!(2));
        b.confirm().unwrap();
        b.cancel().unwrap();
        assert_eq!(b.status, AllocationStatus::Cancelled);
        assert_matches!(b.cancel(), Err(ServiceError::InvalidStatus(_)));
    }

    #[test]
    fn negative_cut_lengths_are_rejected() {
        let mut a = reserved(dec!(2));
        assert_matches!(a.mark_as_cut(dec!(-1), dec!(3)), Err(ServiceError::InvalidArgument(_)));
        assert_eq!(a.status, AllocationStatus::Reserved);
    }
}
