//! Roll selection heuristics.
//!
//! Candidates arrive sorted ascending by remaining length. Selection never
//! mutates a roll; it only decides which rolls the orchestrator draws from
//! and in what order.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::models::FabricRoll;

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum AllocationStrategy {
    /// Candidates in the order given.
    #[default]
    Fifo,
    /// Candidates in reverse order.
    Lifo,
    /// A single roll that covers the demand on its own, when one exists.
    BestFit,
}

impl AllocationStrategy {
    /// Parses a strategy name, falling back to FIFO for anything unknown.
    pub fn parse_lenient(value: Option<&str>) -> Self {
        value
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }
}

/// Chooses which rolls to consume for `required` meters.
///
/// FIFO and LIFO accumulate rolls until one covers what is still missing.
/// When the candidates cannot cover the demand, every candidate is returned
/// and the caller detects the shortfall.
pub fn select_rolls<'a>(
    candidates: &'a [FabricRoll],
    required: Decimal,
    strategy: AllocationStrategy,
) -> Vec<&'a FabricRoll> {
    match strategy {
        AllocationStrategy::Fifo => accumulate(candidates.iter(), required),
        AllocationStrategy::Lifo => accumulate(candidates.iter().rev(), required),
        AllocationStrategy::BestFit => best_fit(candidates, required),
    }
}

fn accumulate<'a, I>(rolls: I, required: Decimal) -> Vec<&'a FabricRoll>
where
    I: Iterator<Item = &'a FabricRoll>,
{
    let mut selected = Vec::new();
    let mut remaining = required;
    for roll in rolls {
        if remaining <= Decimal::ZERO {
            break;
        }
        selected.push(roll);
        if roll.current_length >= remaining {
            break;
        }
        remaining -= roll.current_length;
    }
    selected
}

fn best_fit(candidates: &[FabricRoll], required: Decimal) -> Vec<&FabricRoll> {
    // Ascending order makes the first sufficient roll the one with least waste.
    match candidates.iter().find(|r| r.current_length >= required) {
        Some(roll) => vec![roll],
        None => accumulate(candidates.iter(), required),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RollStatus;
    use chrono::Utc;
    use rstest::rstest;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn rolls(lengths: &[Decimal]) -> Vec<FabricRoll> {
        let now = Utc::now();
        lengths
            .iter()
            .enumerate()
            .map(|(i, len)| FabricRoll {
                id: Uuid::new_v4(),
                tenant_id: Uuid::nil(),
                fabric_id: Uuid::nil(),
                roll_number: format!("R-{}", i),
                initial_length: *len,
                current_length: *len,
                width: None,
                supplier_lot_no: None,
                received_at: None,
                location: None,
                status: RollStatus::Available,
                notes: None,
                created_at: now,
                updated_at: now,
            })
            .collect()
    }

    fn picked(selected: &[&FabricRoll]) -> Vec<String> {
        selected.iter().map(|r| r.roll_number.clone()).collect()
    }

    #[rstest]
    #[case::fifo_first_covers(AllocationStrategy::Fifo, &[dec!(10), dec!(20)], dec!(8), &["R-0"])]
    #[case::fifo_accumulates(AllocationStrategy::Fifo, &[dec!(5), dec!(10), dec!(20)], dec!(12), &["R-0", "R-1"])]
    #[case::fifo_exact_boundary(AllocationStrategy::Fifo, &[dec!(5), dec!(7)], dec!(12), &["R-0", "R-1"])]
    #[case::lifo_largest_first(AllocationStrategy::Lifo, &[dec!(10), dec!(20)], dec!(8), &["R-1"])]
    #[case::lifo_accumulates(AllocationStrategy::Lifo, &[dec!(3), dec!(4), dec!(5)], dec!(8), &["R-2", "R-1"])]
    #[case::best_fit_single(AllocationStrategy::BestFit, &[dec!(5), dec!(9), dec!(30)], dec!(8), &["R-1"])]
    #[case::best_fit_fallback(AllocationStrategy::BestFit, &[dec!(3), dec!(4), dec!(5)], dec!(8), &["R-0", "R-1", "R-2"])]
    #[case::shortfall_returns_everything(AllocationStrategy::Fifo, &[dec!(2), dec!(3)], dec!(8), &["R-0", "R-1"])]
    #[case::no_candidates(AllocationStrategy::BestFit, &[], dec!(1), &[])]
    fn selects_expected_rolls(
        #[case] strategy: AllocationStrategy,
        #[case] lengths: &[Decimal],
        #[case] required: Decimal,
        #[case] expected: &[&str],
    ) {
        let candidates = rolls(lengths);
        let selected = select_rolls(&candidates, required, strategy);
        assert_eq!(picked(&selected), expected);
    }

    #[rstest]
    #[case(Some("FIFO"), AllocationStrategy::Fifo)]
    #[case(Some("lifo"), AllocationStrategy::Lifo)]
    #[case(Some("BEST_FIT"), AllocationStrategy::BestFit)]
    #[case(Some(" best_fit "), AllocationStrategy::BestFit)]
    #[case(Some("RANDOM"), AllocationStrategy::Fifo)]
    #[case(Some(""), AllocationStrategy::Fifo)]
    #[case(None, AllocationStrategy::Fifo)]
    fn parses_leniently(#[case] input: Option<&str>, #[case] expected: AllocationStrategy) {
        assert_eq!(AllocationStrategy::parse_lenient(input), expected);
    }

    #[test]
    fn selection_does_not_touch_rolls() {
        let candidates = rolls(&[dec!(5), dec!(20)]);
        let before = candidates.clone();
        let _ = select_rolls(&candidates, dec!(8), AllocationStrategy::BestFit);
        assert_eq!(candidates, before);
    }
}
