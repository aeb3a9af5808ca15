//! Reservation properties checked against `InMemoryRaffleStore`.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use proptest::prelude::*;
use raffle_core::error::RaffleError;
use raffle_core::store::{PurchaseRepository, ReservationEngine, TicketQuery};
use raffle_core::types::{
    Page, PurchaseId, PurchaseStatus, TicketNumber, TicketStatus, UserId,
};
use raffle_testing::{InMemoryRaffleStore, fixtures};
use std::collections::HashSet;

fn numbers(raw: &[u32]) -> Vec<TicketNumber> {
    raw.iter().copied().map(TicketNumber::new).collect()
}

#[tokio::test]
async fn test_explicit_plus_random_fill() {
    let store = InMemoryRaffleStore::new();
    let lottery = store.open_lottery_with(1..=10);
    let user = UserId::new();

    let tickets = store
        .claim_tickets(lottery, user, PurchaseId::new(), &numbers(&[5]), 3)
        .await
        .unwrap();

    assert_eq!(tickets.len(), 3);
    assert_eq!(tickets[0].number, TicketNumber::new(5));
    let distinct: HashSet<_> = tickets.iter().map(|t| t.number).collect();
    assert_eq!(distinct.len(), 3);
    assert!(distinct.iter().all(|n| (1..=10).contains(&n.get())));
    assert_eq!(store.sold_count(lottery), 3);
    assert_eq!(store.available_count(lottery), 7);
}

#[tokio::test]
async fn test_taken_explicit_number_changes_nothing() {
    let store = InMemoryRaffleStore::new();
    let lottery = store.open_lottery_with(1..=10);
    let user = UserId::new();

    store
        .claim_tickets(lottery, user, PurchaseId::new(), &numbers(&[5]), 1)
        .await
        .unwrap();
    let before = store.tickets(lottery);

    let result = store
        .claim_tickets(lottery, user, PurchaseId::new(), &numbers(&[5]), 2)
        .await;

    let err = result.unwrap_err();
    assert_eq!(
        err,
        RaffleError::TicketUnavailable {
            number: TicketNumber::new(5)
        }
    );
    assert!(err.to_string().contains('5'));
    assert_eq!(store.tickets(lottery), before);
}

#[tokio::test]
async fn test_insufficient_supply_changes_nothing() {
    let store = InMemoryRaffleStore::new();
    let lottery = store.open_lottery_with(1..=10);
    let user = UserId::new();

    store
        .claim_tickets(lottery, user, PurchaseId::new(), &[], 7)
        .await
        .unwrap();
    let before = store.tickets(lottery);

    let result = store
        .claim_tickets(lottery, user, PurchaseId::new(), &[], 5)
        .await;

    assert_eq!(
        result,
        Err(RaffleError::InsufficientTickets {
            requested: 5,
            available: 3
        })
    );
    assert_eq!(store.tickets(lottery), before);
}

#[tokio::test]
async fn test_cancel_returns_tickets_to_pool() {
    let store = InMemoryRaffleStore::new();
    let lottery = store.open_lottery_with(1..=10);
    let purchase = fixtures::purchase(UserId::new(), 3);

    store
        .create_with_tickets(lottery, &purchase, &numbers(&[5, 6, 7]))
        .await
        .unwrap();

    let change = store
        .update_status(purchase.id, PurchaseStatus::Cancelled)
        .await
        .unwrap();
    assert_eq!(change.released, 3);

    for ticket in store.tickets(lottery) {
        assert_eq!(ticket.status, TicketStatus::Available);
        assert!(ticket.is_consistent());
    }

    // The released numbers can be claimed again.
    store
        .claim_tickets(lottery, UserId::new(), PurchaseId::new(), &numbers(&[5, 6, 7]), 3)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_release_twice() {
    let store = InMemoryRaffleStore::new();
    let lottery = store.open_lottery(10);
    let purchase_id = PurchaseId::new();

    store
        .claim_tickets(lottery, UserId::new(), purchase_id, &[], 4)
        .await
        .unwrap();

    assert_eq!(store.release_tickets(purchase_id).await.unwrap(), 4);
    let once = store.tickets(lottery);
    assert_eq!(store.release_tickets(purchase_id).await.unwrap(), 0);
    assert_eq!(store.tickets(lottery), once);
}

#[tokio::test]
async fn test_concurrent_claims_never_share_a_ticket() {
    let store = InMemoryRaffleStore::new();
    let lottery = store.open_lottery(50);

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .claim_tickets(lottery, UserId::new(), PurchaseId::new(), &[], 3)
                    .await
            })
        })
        .collect();

    let mut claimed = Vec::new();
    for result in futures::future::join_all(handles).await {
        match result.unwrap() {
            Ok(tickets) => claimed.extend(tickets.into_iter().map(|t| t.number)),
            Err(err) => assert!(err.is_unavailable(), "unexpected error: {err:?}"),
        }
    }

    let distinct: HashSet<_> = claimed.iter().copied().collect();
    assert_eq!(distinct.len(), claimed.len());
    assert_eq!(claimed.len(), 48); // 16 purchases of 3 fit in 50
    assert_eq!(store.sold_count(lottery), 48);
}

#[tokio::test]
async fn test_leaderboard_ignores_pending_and_cancelled() {
    let store = InMemoryRaffleStore::new();
    let lottery = store.open_lottery(100);
    let ana = fixtures::user("Ana");
    let luis = fixtures::user("Luis");
    store.add_user(ana.clone());
    store.add_user(luis.clone());

    for (user, quantity, status) in [
        (ana.id, 4, Some(PurchaseStatus::Verified)),
        (luis.id, 9, None),
        (luis.id, 2, Some(PurchaseStatus::Verified)),
        (ana.id, 5, Some(PurchaseStatus::Cancelled)),
    ] {
        let purchase = fixtures::purchase(user, quantity);
        store
            .create_with_tickets(lottery, &purchase, &[])
            .await
            .unwrap();
        if let Some(status) = status {
            store.update_status(purchase.id, status).await.unwrap();
        }
    }

    let board = store.leaderboard(Page::default()).await.unwrap();
    let ranked: Vec<_> = board.iter().map(|e| (e.user.name.as_str(), e.quantity)).collect();
    assert_eq!(ranked, vec![("Ana", 4), ("Luis", 2)]);
}

#[tokio::test]
async fn test_find_owner_and_check_numbers() {
    let store = InMemoryRaffleStore::new();
    let lottery = store.open_lottery(10);
    let ana = fixtures::user("Ana");
    store.add_user(ana.clone());

    store
        .claim_tickets(lottery, ana.id, PurchaseId::new(), &numbers(&[8, 3]), 2)
        .await
        .unwrap();

    let owner = store
        .find_owner(lottery, TicketNumber::new(8))
        .await
        .unwrap()
        .expect("ticket 8 is sold");
    assert_eq!(owner.user, ana);
    assert_eq!(owner.numbers, numbers(&[3, 8]));

    assert_eq!(store.find_owner(lottery, TicketNumber::new(4)).await.unwrap(), None);

    let taken = store
        .unavailable_numbers(lottery, &numbers(&[1, 3, 8, 99]))
        .await
        .unwrap();
    assert_eq!(taken, numbers(&[3, 8, 99]));
    assert!(store.unavailable_numbers(lottery, &[]).await.unwrap().is_empty());

    let percentage = store.availability_percentage(lottery).await.unwrap();
    assert!((percentage - 20.0).abs() < 1e-9);
}

#[derive(Debug, Clone)]
enum Op {
    Claim { explicit: Vec<u32>, quantity: u32 },
    Release { index: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (proptest::collection::vec(0u32..25, 0..4), 1u32..8).prop_map(|(explicit, extra)| {
            let mut seen = HashSet::new();
            let explicit: Vec<u32> = explicit.into_iter().filter(|n| seen.insert(*n)).collect();
            #[allow(clippy::cast_possible_truncation)]
            let quantity = explicit.len() as u32 + extra;
            Op::Claim { explicit, quantity }
        }),
        (0usize..16).prop_map(|index| Op::Release { index }),
    ]
}

proptest! {
    /// Conservation: sold + available never drifts from the pool size, and
    /// failed claims leave the pool untouched.
    #[test]
    fn conservation_and_atomicity(ops in proptest::collection::vec(op_strategy(), 1..40)) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let store = InMemoryRaffleStore::new();
            let lottery = store.open_lottery(20);
            let mut purchases = Vec::new();

            for op in ops {
                match op {
                    Op::Claim { explicit, quantity } => {
                        let before = store.tickets(lottery);
                        let purchase_id = PurchaseId::new();
                        let result = store
                            .claim_tickets(lottery, UserId::new(), purchase_id, &numbers(&explicit), quantity)
                            .await;
                        match result {
                            Ok(tickets) => {
                                prop_assert_eq!(tickets.len(), quantity as usize);
                                purchases.push(purchase_id);
                            }
                            Err(err) => {
                                prop_assert!(err.is_unavailable());
                                prop_assert_eq!(store.tickets(lottery), before);
                            }
                        }
                    }
                    Op::Release { index } => {
                        if let Some(purchase_id) = purchases.get(index) {
                            store.release_tickets(*purchase_id).await.unwrap();
                        }
                    }
                }

                prop_assert_eq!(store.sold_count(lottery) + store.available_count(lottery), 20);
                prop_assert!(store.tickets(lottery).iter().all(|t| t.is_consistent()));
            }
            Ok(())
        })?;
    }

    /// Mutual exclusion: tickets held by distinct purchases never overlap.
    #[test]
    fn purchases_hold_disjoint_tickets(quantities in proptest::collection::vec(1u32..6, 1..12)) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let store = InMemoryRaffleStore::new();
            let lottery = store.open_lottery(30);
            let mut seen = HashSet::new();

            for quantity in quantities {
                let purchase_id = PurchaseId::new();
                if store
                    .claim_tickets(lottery, UserId::new(), purchase_id, &[], quantity)
                    .await
                    .is_ok()
                {
                    for number in store.purchase_tickets(purchase_id) {
                        prop_assert!(seen.insert(number), "ticket {} sold twice", number);
                    }
                }
            }
            Ok(())
        })?;
    }
}
