mod common;

use std::collections::HashMap;

use assert_matches::assert_matches;
use common::Harness;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tailor_inventory::{
    models::{FabricAllocation, FabricRoll, NewFabricRoll, RollStatus},
    repositories::{CandidateQuery, InventoryTransaction},
    ServiceError,
};
use uuid::Uuid;

fn new_roll(h: &Harness, number: &str, length: Decimal) -> FabricRoll {
    FabricRoll::receive(NewFabricRoll {
        tenant_id: h.tenant_id,
        fabric_id: h.fabric_id,
        roll_number: number.to_string(),
        initial_length: length,
        width: None,
        supplier_lot_no: None,
        received_at: None,
        location: None,
        notes: None,
    })
    .unwrap()
}

#[tokio::test]
async fn locked_rolls_are_skipped_not_waited_on() {
    let h = Harness::in_memory().await;
    let roll = h.receive("A", dec!(20)).await;

    let mut holder = h.memory().begin_local();
    let locked = holder
        .lock_candidate_rolls(&CandidateQuery {
            tenant_id: h.tenant_id,
            fabric_id: h.fabric_id,
            min_length: dec!(1),
        })
        .await
        .unwrap();
    assert_eq!(locked.len(), 1);

    // The only roll is held elsewhere, so the allocation fails immediately.
    assert_matches!(
        h.allocate(dec!(8), None).await,
        Err(ServiceError::InsufficientInventory(_))
    );
    assert_eq!(h.roll(roll.id).await.current_length, dec!(20));

    drop(holder);
    assert_eq!(h.memory().locked_rows(), 0);
    let outcome = h.allocate(dec!(8), None).await.unwrap();
    assert_eq!(outcome.allocations[0].fabric_roll_id, roll.id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_allocations_never_double_book() {
    let h = Harness::in_memory().await;
    let mut rolls = Vec::new();
    for i in 0..10 {
        rolls.push(h.receive(&format!("R-{i}"), dec!(10)).await);
    }

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let service = h.allocations.clone();
        let request = h.request(dec!(10), None);
        tasks.push(tokio::spawn(async move {
            service.allocate_inventory(request).await
        }));
    }

    let mut succeeded = 0usize;
    let mut per_roll: HashMap<Uuid, usize> = HashMap::new();
    for task in tasks {
        match task.await.unwrap() {
            Ok(outcome) => {
                succeeded += 1;
                assert_eq!(outcome.allocations.len(), 1);
                *per_roll
                    .entry(outcome.allocations[0].fabric_roll_id)
                    .or_default() += 1;
            }
            Err(e) => assert_matches!(e, ServiceError::InsufficientInventory(_)),
        }
    }

    assert!((1..=10).contains(&succeeded), "succeeded: {succeeded}");
    assert!(per_roll.values().all(|count| *count == 1));

    let mut consumed = 0usize;
    for roll in &rolls {
        let current = h.roll(roll.id).await;
        assert!(current.current_length >= Decimal::ZERO);
        if current.status == RollStatus::Consumed {
            consumed += 1;
        }
        let ledger = h.allocations.roll_ledger(h.tenant_id, roll.id).await.unwrap();
        assert!(ledger.balanced, "roll {} drifted by {}", ledger.roll_number, ledger.drift);
    }
    assert_eq!(consumed, succeeded);
    assert_eq!(h.memory().locked_rows(), 0);
}

#[tokio::test]
async fn release_does_not_take_the_row_lock() {
    let h = Harness::in_memory().await;

    // A roll back in stock while an older allocation still draws on it.
    let mut roll = new_roll(&h, "A", dec!(20));
    let existing = FabricAllocation::reserve(h.tenant_id, Uuid::new_v4(), roll.id, dec!(8));
    roll.current_length = dec!(12);
    let mut seed = Box::new(h.memory().begin_local());
    seed.insert_roll(&roll).await.unwrap();
    seed.insert_allocation(&existing).await.unwrap();
    seed.commit().await.unwrap();

    // An allocation transaction holds the roll with a snapshot of 12m.
    let mut allocator = Box::new(h.memory().begin_local());
    let mut candidates = allocator
        .lock_candidate_rolls(&CandidateQuery {
            tenant_id: h.tenant_id,
            fabric_id: h.fabric_id,
            min_length: dec!(5),
        })
        .await
        .unwrap();
    let mut held = candidates.remove(0);

    // The release is not blocked by that lock.
    h.allocations
        .release_allocation(h.tenant_id, existing.id)
        .await
        .unwrap();
    assert_eq!(h.roll(roll.id).await.current_length, dec!(20));

    held.allocate(dec!(5)).unwrap();
    allocator.update_roll(&held).await.unwrap();
    allocator
        .insert_allocation(&FabricAllocation::reserve(
            h.tenant_id,
            Uuid::new_v4(),
            roll.id,
            dec!(5),
        ))
        .await
        .unwrap();
    allocator.commit().await.unwrap();

    // The allocator's stale write wins and the released 8m disappear.
    let ledger = h.allocations.roll_ledger(h.tenant_id, roll.id).await.unwrap();
    assert_eq!(ledger.current_length, dec!(7));
    assert_eq!(ledger.allocated_length, dec!(5));
    assert_eq!(ledger.drift, dec!(8));
    assert!(!ledger.balanced);
}

#[tokio::test]
async fn interleaved_releases_lose_an_update() {
    let h = Harness::in_memory().await;

    let mut roll = new_roll(&h, "A", dec!(20));
    let first = FabricAllocation::reserve(h.tenant_id, Uuid::new_v4(), roll.id, dec!(8));
    let second = FabricAllocation::reserve(h.tenant_id, Uuid::new_v4(), roll.id, dec!(12));
    roll.current_length = Decimal::ZERO;
    roll.status = RollStatus::Consumed;
    let mut seed = Box::new(h.memory().begin_local());
    seed.insert_roll(&roll).await.unwrap();
    seed.insert_allocation(&first).await.unwrap();
    seed.insert_allocation(&second).await.unwrap();
    seed.commit().await.unwrap();
    assert!(h
        .allocations
        .roll_ledger(h.tenant_id, roll.id)
        .await
        .unwrap()
        .balanced);

    // Both releases read the roll before either writes.
    let mut one = Box::new(h.memory().begin_local());
    let mut two = Box::new(h.memory().begin_local());
    let mut seen_by_one = one.find_roll(h.tenant_id, roll.id).await.unwrap().unwrap();
    let mut seen_by_two = two.find_roll(h.tenant_id, roll.id).await.unwrap().unwrap();

    let mut first_cancelled = first.clone();
    first_cancelled.cancel().unwrap();
    seen_by_one.release(first.allocated_length).unwrap();
    one.update_roll(&seen_by_one).await.unwrap();
    one.update_allocation(&first_cancelled).await.unwrap();

    let mut second_cancelled = second.clone();
    second_cancelled.cancel().unwrap();
    seen_by_two.release(second.allocated_length).unwrap();
    two.update_roll(&seen_by_two).await.unwrap();
    two.update_allocation(&second_cancelled).await.unwrap();

    one.commit().await.unwrap();
    two.commit().await.unwrap();

    let ledger = h.allocations.roll_ledger(h.tenant_id, roll.id).await.unwrap();
    assert_eq!(ledger.active_allocations, 0);
    assert_eq!(ledger.current_length, dec!(12));
    assert_eq!(ledger.drift, dec!(8));
}
