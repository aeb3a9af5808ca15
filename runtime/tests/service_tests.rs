//! Purchase lifecycle tests for `RaffleService` over the in-memory store.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use raffle_core::environment::{Clock, Mailer, ProofCompressor};
use raffle_core::error::RaffleError;
use raffle_core::types::{PurchaseId, PurchaseStatus, TicketNumber, UserId};
use raffle_core::validation::PurchasePolicy;
use raffle_runtime::retry::retry_transient;
use raffle_runtime::{
    NotificationQueue, NotificationWorker, RaffleEnvironment, RaffleService, RetryPolicy,
};
use raffle_testing::{
    FailingMailer, InMemoryRaffleStore, PassthroughCompressor, RecordingMailer,
    RejectingCompressor, fixtures, test_clock,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Test Fixtures
// ============================================================================

const POOL: u32 = 10;

fn policy() -> PurchasePolicy {
    PurchasePolicy {
        pool_size: POOL,
        ..PurchasePolicy::default()
    }
}

struct Harness {
    service: RaffleService,
    store: InMemoryRaffleStore,
    worker: NotificationWorker,
}

fn harness_with(compressor: Arc<dyn ProofCompressor>, mailer: Arc<dyn Mailer>) -> Harness {
    let store = InMemoryRaffleStore::new();
    let (notifications, worker) = NotificationQueue::start(mailer, 64, Duration::from_secs(1));
    let service = RaffleService::new(
        RaffleEnvironment {
            store: Arc::new(store.clone()),
            compressor,
            notifications,
            clock: Arc::new(test_clock()),
        },
        policy(),
    );

    Harness {
        service,
        store,
        worker,
    }
}

fn harness(mailer: &RecordingMailer) -> Harness {
    harness_with(Arc::new(PassthroughCompressor), Arc::new(mailer.clone()))
}

fn numbers(raw: &[u32]) -> Vec<TicketNumber> {
    raw.iter().copied().map(TicketNumber::new).collect()
}

// ============================================================================
// Create
// ============================================================================

#[tokio::test]
async fn test_create_purchase_claims_tickets_and_notifies() {
    let mailer = RecordingMailer::new();
    let h = harness(&mailer);
    let lottery = h.store.open_lottery(POOL);

    let purchase_id = h
        .service
        .create_purchase(fixtures::intent(UserId::new(), 3, &["7"]))
        .await
        .unwrap();

    let purchase = h.service.get_purchase(purchase_id).await.unwrap();
    assert_eq!(purchase.status, PurchaseStatus::Pending);
    assert_eq!(purchase.quantity, 3);
    assert_eq!(purchase.created_at, test_clock().now());

    let owned = h.store.purchase_tickets(purchase_id);
    assert_eq!(owned.len(), 3);
    assert!(owned.contains(&TicketNumber::new(7)));
    assert_eq!(h.store.sold_count(lottery), 3);

    assert!(h.worker.shutdown(Duration::from_secs(5)).await);
    assert_eq!(mailer.sent(), vec![purchase_id]);
}

#[tokio::test]
async fn test_invalid_intent_touches_nothing() {
    let mailer = RecordingMailer::new();
    let h = harness(&mailer);
    let lottery = h.store.open_lottery(POOL);

    let cases = [
        fixtures::intent(UserId::new(), 1, &[]),
        fixtures::intent(UserId::new(), 2, &["3", "3"]),
        fixtures::intent(UserId::new(), 2, &["1", "2", "3"]),
        fixtures::intent(UserId::new(), 2, &["12"]),
        fixtures::intent(UserId::new(), 2, &["abc"]),
    ];

    for intent in cases {
        let err = h.service.create_purchase(intent).await.unwrap_err();
        assert!(matches!(err, RaffleError::Validation(_)), "{err}");
    }

    let mut no_reference = fixtures::intent(UserId::new(), 2, &[]);
    no_reference.payment.reference_digits = "12".to_string();
    let err = h.service.create_purchase(no_reference).await.unwrap_err();
    assert!(err.is_validation());

    assert_eq!(h.store.purchase_count(), 0);
    assert_eq!(h.store.sold_count(lottery), 0);
    assert!(h.worker.shutdown(Duration::from_secs(5)).await);
    assert!(mailer.sent().is_empty());
}

#[tokio::test]
async fn test_rejected_proof_touches_nothing() {
    let mailer = RecordingMailer::new();
    let h = harness_with(Arc::new(RejectingCompressor), Arc::new(mailer.clone()));
    let lottery = h.store.open_lottery(POOL);

    let err = h
        .service
        .create_purchase(fixtures::intent(UserId::new(), 2, &[]))
        .await
        .unwrap_err();

    assert!(matches!(err, RaffleError::ProofRejected(_)));
    assert_eq!(h.store.purchase_count(), 0);
    assert_eq!(h.store.sold_count(lottery), 0);
}

#[tokio::test]
async fn test_taken_number_rejects_whole_purchase() {
    let mailer = RecordingMailer::new();
    let h = harness(&mailer);
    let lottery = h.store.open_lottery(POOL);

    h.service
        .create_purchase(fixtures::intent(UserId::new(), 2, &["5"]))
        .await
        .unwrap();

    let err = h
        .service
        .create_purchase(fixtures::intent(UserId::new(), 3, &["1", "5"]))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        RaffleError::TicketUnavailable {
            number: TicketNumber::new(5)
        }
    );
    assert_eq!(h.store.purchase_count(), 1);
    assert_eq!(h.store.sold_count(lottery), 2);
}

#[tokio::test]
async fn test_insufficient_tickets_reports_counts() {
    let mailer = RecordingMailer::new();
    let h = harness(&mailer);
    let lottery = h.store.open_lottery(POOL);

    h.service
        .create_purchase(fixtures::intent(UserId::new(), 9, &[]))
        .await
        .unwrap();

    let err = h
        .service
        .create_purchase(fixtures::intent(UserId::new(), 2, &[]))
        .await
        .unwrap_err();

    assert_eq!(
        err,
        RaffleError::InsufficientTickets {
            requested: 2,
            available: 1
        }
    );
    assert_eq!(h.store.sold_count(lottery), 9);
    assert_eq!(h.store.purchase_count(), 1);
}

#[tokio::test]
async fn test_no_active_lottery() {
    let mailer = RecordingMailer::new();
    let h = harness(&mailer);

    let err = h
        .service
        .create_purchase(fixtures::intent(UserId::new(), 2, &[]))
        .await
        .unwrap_err();

    assert_eq!(err, RaffleError::NoActiveLottery);
    assert_eq!(h.store.purchase_count(), 0);
}

#[tokio::test]
async fn test_timeout_persists_nothing() {
    let mailer = RecordingMailer::new();
    let h = harness(&mailer);
    let lottery = h.store.open_lottery(POOL);
    h.store.set_create_latency(Duration::from_millis(500));
    let service = h
        .service
        .clone()
        .with_purchase_timeout(Duration::from_millis(20));

    let err = service
        .create_purchase(fixtures::intent(UserId::new(), 2, &[]))
        .await
        .unwrap_err();

    assert_eq!(err, RaffleError::Timeout(Duration::from_millis(20)));
    assert!(err.is_retryable());
    assert_eq!(h.store.purchase_count(), 0);
    assert_eq!(h.store.sold_count(lottery), 0);
    assert!(h.worker.shutdown(Duration::from_secs(5)).await);
    assert!(mailer.sent().is_empty());
}

#[tokio::test]
async fn test_notification_failure_does_not_fail_purchase() {
    let h = harness_with(Arc::new(PassthroughCompressor), Arc::new(FailingMailer));
    let lottery = h.store.open_lottery(POOL);

    let purchase_id = h
        .service
        .create_purchase(fixtures::intent(UserId::new(), 2, &[]))
        .await
        .unwrap();

    assert!(h.worker.shutdown(Duration::from_secs(5)).await);
    assert_eq!(h.store.purchase_tickets(purchase_id).len(), 2);
    assert_eq!(h.store.sold_count(lottery), 2);
}

#[tokio::test]
async fn test_transient_claim_failure_is_retried() {
    let mailer = RecordingMailer::new();
    let h = harness(&mailer);
    let lottery = h.store.open_lottery(POOL);
    h.store
        .fail_next_claim(RaffleError::Transient("serialization failure".to_string()));

    let policy = RetryPolicy::builder()
        .initial_delay(Duration::from_millis(1))
        .jitter(false)
        .build();
    let intent = fixtures::intent(UserId::new(), 3, &["4"]);
    let purchase_id = retry_transient(&policy, || h.service.create_purchase(intent.clone()))
        .await
        .unwrap();

    assert_eq!(h.store.purchase_count(), 1);
    assert_eq!(h.store.sold_count(lottery), 3);
    assert!(h.store.purchase_tickets(purchase_id).contains(&TicketNumber::new(4)));
}

#[tokio::test]
async fn test_concurrent_purchases_never_share_tickets() {
    let mailer = RecordingMailer::new();
    let h = harness(&mailer);
    let lottery = h.store.open_lottery(POOL);

    let attempts = (0..6).map(|_| {
        let service = h.service.clone();
        tokio::spawn(async move {
            service
                .create_purchase(fixtures::intent(UserId::new(), 2, &[]))
                .await
        })
    });
    let results = futures::future::join_all(attempts).await;

    let created: Vec<_> = results
        .into_iter()
        .map(|joined| joined.unwrap())
        .filter_map(Result::ok)
        .collect();
    assert_eq!(created.len(), 5);

    let mut seen = HashSet::new();
    for purchase_id in &created {
        for number in h.store.purchase_tickets(*purchase_id) {
            assert!(seen.insert(number), "ticket {number} sold twice");
        }
    }
    assert_eq!(h.store.sold_count(lottery), 10);
}

// ============================================================================
// Status updates
// ============================================================================

#[tokio::test]
async fn test_cancel_releases_tickets() {
    let mailer = RecordingMailer::new();
    let h = harness(&mailer);
    let lottery = h.store.open_lottery(POOL);

    let purchase_id = h
        .service
        .create_purchase(fixtures::intent(UserId::new(), 3, &["2"]))
        .await
        .unwrap();

    let change = h
        .service
        .update_purchase_status(purchase_id, "cancelled")
        .await
        .unwrap();

    assert_eq!(change.previous, PurchaseStatus::Pending);
    assert_eq!(change.current, PurchaseStatus::Cancelled);
    assert_eq!(change.released, 3);
    assert_eq!(h.store.available_count(lottery), POOL as usize);
    assert!(h.store.purchase_tickets(purchase_id).is_empty());

    // Re-cancelling succeeds and releases nothing.
    let again = h
        .service
        .update_purchase_status(purchase_id, "cancelled")
        .await
        .unwrap();
    assert_eq!(again.released, 0);

    let err = h
        .service
        .update_purchase_status(purchase_id, "verified")
        .await
        .unwrap_err();
    assert!(matches!(err, RaffleError::InvalidTransition { .. }));

    // The released number can be bought again.
    h.service
        .create_purchase(fixtures::intent(UserId::new(), 2, &["2"]))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_verify_keeps_tickets() {
    let mailer = RecordingMailer::new();
    let h = harness(&mailer);
    let lottery = h.store.open_lottery(POOL);

    let purchase_id = h
        .service
        .create_purchase(fixtures::intent(UserId::new(), 2, &[]))
        .await
        .unwrap();

    let change = h
        .service
        .update_purchase_status(purchase_id, " verified ")
        .await
        .unwrap();
    assert_eq!(change.current, PurchaseStatus::Verified);
    assert_eq!(change.released, 0);
    assert_eq!(h.store.sold_count(lottery), 2);

    let err = h
        .service
        .update_purchase_status(purchase_id, "cancelled")
        .await
        .unwrap_err();
    assert_eq!(
        err,
        RaffleError::InvalidTransition {
            from: PurchaseStatus::Verified,
            to: PurchaseStatus::Cancelled
        }
    );
    assert_eq!(h.store.sold_count(lottery), 2);
}

#[tokio::test]
async fn test_failed_release_leaves_purchase_pending() {
    let mailer = RecordingMailer::new();
    let h = harness(&mailer);
    let lottery = h.store.open_lottery(POOL);

    let purchase_id = h
        .service
        .create_purchase(fixtures::intent(UserId::new(), 2, &[]))
        .await
        .unwrap();
    h.store.fail_next_release("connection reset");

    let err = h
        .service
        .update_purchase_status(purchase_id, "cancelled")
        .await
        .unwrap_err();

    assert!(matches!(err, RaffleError::Compensation { .. }));
    assert!(err.is_retryable());
    let purchase = h.service.get_purchase(purchase_id).await.unwrap();
    assert_eq!(purchase.status, PurchaseStatus::Pending);
    assert_eq!(h.store.sold_count(lottery), 2);

    let change = h
        .service
        .update_purchase_status(purchase_id, "cancelled")
        .await
        .unwrap();
    assert_eq!(change.released, 2);
    assert_eq!(h.store.sold_count(lottery), 0);
}

#[tokio::test]
async fn test_status_update_rejects_bad_input() {
    let mailer = RecordingMailer::new();
    let h = harness(&mailer);
    h.store.open_lottery(POOL);

    let purchase_id = h
        .service
        .create_purchase(fixtures::intent(UserId::new(), 2, &[]))
        .await
        .unwrap();

    for status in ["pending", "shipped", ""] {
        let err = h
            .service
            .update_purchase_status(purchase_id, status)
            .await
            .unwrap_err();
        assert!(matches!(err, RaffleError::Validation(_)), "{status}: {err}");
    }

    let unknown = PurchaseId::new();
    let err = h
        .service
        .update_purchase_status(unknown, "verified")
        .await
        .unwrap_err();
    assert_eq!(err, RaffleError::PurchaseNotFound(unknown));
}

// ============================================================================
// Queries
// ============================================================================

#[tokio::test]
async fn test_availability_percentage() {
    let mailer = RecordingMailer::new();
    let h = harness(&mailer);

    assert!(h.service.get_availability_percentage().await.unwrap().abs() < f64::EPSILON);

    h.store.open_lottery(POOL);
    h.service
        .create_purchase(fixtures::intent(UserId::new(), 3, &[]))
        .await
        .unwrap();

    let sold = h.service.get_availability_percentage().await.unwrap();
    assert!((sold - 30.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_check_numbers_and_owner_lookup() {
    let mailer = RecordingMailer::new();
    let h = harness(&mailer);

    // Nothing to check needs no lottery.
    assert!(h.service.check_numbers(&[]).await.unwrap().is_empty());

    h.store.open_lottery(POOL);
    let ana = fixtures::user("Ana");
    h.store.add_user(ana.clone());

    h.service
        .create_purchase(fixtures::intent(ana.id, 2, &["1", "8"]))
        .await
        .unwrap();

    let taken = h.service.check_numbers(&numbers(&[0, 1, 8, 9])).await.unwrap();
    let taken: HashSet<_> = taken.into_iter().collect();
    assert_eq!(taken, numbers(&[1, 8]).into_iter().collect::<HashSet<_>>());

    assert_eq!(h.service.get_user_tickets(ana.id).await.unwrap(), numbers(&[1, 8]));
    assert!(h.service.get_user_tickets(UserId::new()).await.unwrap().is_empty());

    let owner = h
        .service
        .find_by_ticket_number(TicketNumber::new(8))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(owner.user.email, "ana@example.com");
    assert_eq!(owner.numbers, numbers(&[1, 8]));

    assert!(h
        .service
        .find_by_ticket_number(TicketNumber::new(0))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_listing_and_leaderboard() {
    let mailer = RecordingMailer::new();
    let h = harness(&mailer);
    h.store.open_lottery(POOL);

    let ana = fixtures::user("Ana");
    let luis = fixtures::user("Luis");
    h.store.add_user(ana.clone());
    h.store.add_user(luis.clone());

    let a = h
        .service
        .create_purchase(fixtures::intent(ana.id, 2, &[]))
        .await
        .unwrap();
    let b = h
        .service
        .create_purchase(fixtures::intent(luis.id, 3, &[]))
        .await
        .unwrap();
    h.service
        .create_purchase(fixtures::intent(ana.id, 4, &[]))
        .await
        .unwrap();
    h.service.update_purchase_status(a, "verified").await.unwrap();
    h.service.update_purchase_status(b, "verified").await.unwrap();

    let all = h.service.list_purchases(None, 1, 20).await.unwrap();
    assert_eq!(all.total, 3);
    assert_eq!(h.service.list_purchases(Some(""), 1, 20).await.unwrap().total, 3);

    let verified = h
        .service
        .list_purchases(Some("verified"), 1, 20)
        .await
        .unwrap();
    assert_eq!(verified.total, 2);
    assert!(verified
        .rows
        .iter()
        .all(|row| row.purchase.status == PurchaseStatus::Verified));

    let err = h
        .service
        .list_purchases(Some("bogus"), 1, 20)
        .await
        .unwrap_err();
    assert!(err.is_validation());

    // Ana's 4-ticket purchase is still pending, so Luis leads.
    let board = h.service.get_leaderboard(1, 10).await.unwrap();
    assert_eq!(board.len(), 2);
    assert_eq!(board[0].user.id, luis.id);
    assert_eq!(board[0].quantity, 3);
    assert_eq!(board[1].user.id, ana.id);
    assert_eq!(board[1].quantity, 2);
}
