//! The Purchase Lifecycle Manager and the query facade.
//!
//! [`RaffleService`] is what the HTTP layer talks to. It validates input,
//! compresses the payment proof, resolves the active lottery on every call,
//! and delegates ticket work to the store. After a purchase commits it hands
//! the purchase to the [`NotificationQueue`] and returns.
//!
//! # State machine
//!
//! ```text
//! pending ──verify──▶ verified
//!    │
//!    └────cancel───▶ cancelled   (tickets released in the same transaction)
//! ```

use crate::metrics::{PURCHASES_CREATED, PURCHASES_REJECTED, TICKETS_CLAIMED, TICKETS_RELEASED};
use crate::notifier::NotificationQueue;
use raffle_core::environment::{Clock, ProofCompressor};
use raffle_core::error::{RaffleError, Result};
use raffle_core::store::RaffleStore;
use raffle_core::types::{
    LeaderboardEntry, Page, Purchase, PurchaseId, PurchaseIntent, PurchaseListing,
    PurchaseStatus, StatusChange, TicketNumber, TicketOwner, UserId,
};
use raffle_core::validation::{PurchasePolicy, parse_status_update, validate_intent};
use std::sync::Arc;
use std::time::Duration;

/// Default upper bound on claim + persistence.
pub const DEFAULT_PURCHASE_TIMEOUT: Duration = Duration::from_secs(15);

/// Collaborators injected at startup.
#[derive(Clone)]
pub struct RaffleEnvironment {
    /// Ticket pool, reservation engine, purchases and queries
    pub store: Arc<dyn RaffleStore>,
    /// Payment-proof compression
    pub compressor: Arc<dyn ProofCompressor>,
    /// Post-commit notification hand-off
    pub notifications: NotificationQueue,
    /// Source of `created_at`
    pub clock: Arc<dyn Clock>,
}

/// Purchase lifecycle and read-side entry points.
#[derive(Clone)]
pub struct RaffleService {
    env: RaffleEnvironment,
    policy: PurchasePolicy,
    purchase_timeout: Duration,
}

impl RaffleService {
    /// Create a service with the given limits.
    #[must_use]
    pub const fn new(env: RaffleEnvironment, policy: PurchasePolicy) -> Self {
        Self {
            env,
            policy,
            purchase_timeout: DEFAULT_PURCHASE_TIMEOUT,
        }
    }

    /// Override the deadline for claim + persistence.
    #[must_use]
    pub const fn with_purchase_timeout(mut self, timeout: Duration) -> Self {
        self.purchase_timeout = timeout;
        self
    }

    /// Active limits.
    #[must_use]
    pub const fn policy(&self) -> &PurchasePolicy {
        &self.policy
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Create a pending purchase and claim its tickets.
    ///
    /// The purchase row and the ticket claims commit together or not at all.
    /// On success a notification is queued; its outcome never affects the
    /// result.
    ///
    /// # Errors
    ///
    /// - `Validation`: bad quantity, numbers or payment fields
    /// - `ProofRejected`: the proof image could not be compressed
    /// - `NoActiveLottery`: nothing is on sale
    /// - `TicketUnavailable` / `InsufficientTickets`: inventory conflict
    /// - `Timeout`: the deadline elapsed; nothing was persisted
    /// - `Transient` / `Database`: store failure; safe to retry
    pub async fn create_purchase(&self, intent: PurchaseIntent) -> Result<PurchaseId> {
        let user_id = intent.user_id;
        let quantity = intent.quantity;

        match self.try_create_purchase(intent).await {
            Ok(purchase_id) => Ok(purchase_id),
            Err(err) => {
                metrics::counter!(PURCHASES_REJECTED, "reason" => err.kind()).increment(1);
                if err.is_validation() || err.is_unavailable() {
                    tracing::info!(user_id = %user_id, quantity, error = %err, "Purchase rejected");
                } else {
                    tracing::warn!(user_id = %user_id, quantity, error = %err, "Purchase failed");
                }
                Err(err)
            }
        }
    }

    async fn try_create_purchase(&self, intent: PurchaseIntent) -> Result<PurchaseId> {
        let explicit = validate_intent(&intent, &self.policy)?;

        let PurchaseIntent {
            user_id,
            quantity,
            payment,
            payment_proof,
            ..
        } = intent;

        let compressor = Arc::clone(&self.env.compressor);
        let payment_proof = tokio::task::spawn_blocking(move || compressor.compress(&payment_proof))
            .await
            .map_err(|e| RaffleError::ProofRejected(format!("compression task failed: {e}")))??;

        let purchase = Purchase {
            id: PurchaseId::new(),
            user_id,
            quantity,
            payment,
            payment_proof,
            status: PurchaseStatus::Pending,
            created_at: self.env.clock.now(),
        };

        // Dropping the store future on timeout rolls its transaction back.
        let store = &self.env.store;
        let (lottery_id, tickets) = tokio::time::timeout(self.purchase_timeout, async {
            let lottery_id = store.active_lottery().await?;
            let tickets = store
                .create_with_tickets(lottery_id, &purchase, &explicit)
                .await?;
            Ok::<_, RaffleError>((lottery_id, tickets))
        })
        .await
        .map_err(|_| RaffleError::Timeout(self.purchase_timeout))??;

        metrics::counter!(PURCHASES_CREATED).increment(1);
        metrics::counter!(TICKETS_CLAIMED).increment(tickets.len() as u64);
        tracing::info!(
            purchase_id = %purchase.id,
            user_id = %purchase.user_id,
            lottery_id = %lottery_id,
            quantity = purchase.quantity,
            explicit = explicit.len(),
            "Purchase created"
        );

        let purchase_id = purchase.id;
        self.env.notifications.enqueue(purchase);
        Ok(purchase_id)
    }

    /// Apply an administrative status change (`"verified"` or `"cancelled"`).
    ///
    /// Cancelling releases the purchase's tickets in the same transaction.
    /// Re-applying `cancelled` to a cancelled purchase re-runs the release,
    /// which is how an operator retries a failed compensation.
    ///
    /// # Errors
    ///
    /// - `Validation`: `status` is not `verified` or `cancelled`
    /// - `PurchaseNotFound`: unknown purchase
    /// - `InvalidTransition`: the purchase is already in the other terminal state
    /// - `Compensation`: the ticket release failed; the purchase is unchanged
    /// - `Transient` / `Database`: store failure
    pub async fn update_purchase_status(
        &self,
        purchase_id: PurchaseId,
        status: &str,
    ) -> Result<StatusChange> {
        let status = parse_status_update(status)?;

        match self.env.store.update_status(purchase_id, status).await {
            Ok(change) => {
                if change.released > 0 {
                    metrics::counter!(TICKETS_RELEASED).increment(change.released);
                }
                tracing::info!(
                    purchase_id = %purchase_id,
                    from = %change.previous,
                    to = %change.current,
                    released = change.released,
                    "Purchase status updated"
                );
                Ok(change)
            }
            Err(err @ RaffleError::Compensation { .. }) => {
                tracing::error!(
                    purchase_id = %purchase_id,
                    error = %err,
                    "Ticket release failed during cancellation; retry the cancellation"
                );
                Err(err)
            }
            Err(err) => {
                tracing::warn!(purchase_id = %purchase_id, error = %err, "Status update failed");
                Err(err)
            }
        }
    }

    /// Load one purchase.
    ///
    /// # Errors
    ///
    /// Returns `PurchaseNotFound` for an unknown id, or store failures.
    pub async fn get_purchase(&self, purchase_id: PurchaseId) -> Result<Purchase> {
        self.env
            .store
            .get_purchase(purchase_id)
            .await?
            .ok_or(RaffleError::PurchaseNotFound(purchase_id))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Queries
    // ═══════════════════════════════════════════════════════════════════════

    /// Admin listing, newest first.
    ///
    /// An empty or absent `status` lists every purchase.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an unknown status, or store failures.
    pub async fn list_purchases(
        &self,
        status: Option<&str>,
        page: i64,
        per_page: i64,
    ) -> Result<PurchaseListing> {
        let status = status
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PurchaseStatus::parse)
            .transpose()?;

        self.env
            .store
            .list_purchases(status, Page::new(page, per_page))
            .await
    }

    /// Users ranked by tickets in verified purchases.
    ///
    /// # Errors
    ///
    /// Returns store failures.
    pub async fn get_leaderboard(&self, page: i64, per_page: i64) -> Result<Vec<LeaderboardEntry>> {
        self.env.store.leaderboard(Page::new(page, per_page)).await
    }

    /// Percentage of the active lottery's tickets that are sold.
    ///
    /// `0.0` when no lottery is active or its pool is empty.
    ///
    /// # Errors
    ///
    /// Returns store failures.
    pub async fn get_availability_percentage(&self) -> Result<f64> {
        match self.env.store.active_lottery().await {
            Ok(lottery_id) => self.env.store.availability_percentage(lottery_id).await,
            Err(RaffleError::NoActiveLottery) => Ok(0.0),
            Err(err) => Err(err),
        }
    }

    /// Subset of `candidates` that can no longer be bought.
    ///
    /// # Errors
    ///
    /// Returns `NoActiveLottery` or store failures.
    pub async fn check_numbers(&self, candidates: &[TicketNumber]) -> Result<Vec<TicketNumber>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let lottery_id = self.env.store.active_lottery().await?;
        self.env
            .store
            .unavailable_numbers(lottery_id, candidates)
            .await
    }

    /// Numbers `user_id` owns in the active lottery, ascending.
    ///
    /// # Errors
    ///
    /// Returns `NoActiveLottery` or store failures.
    pub async fn get_user_tickets(&self, user_id: UserId) -> Result<Vec<TicketNumber>> {
        let lottery_id = self.env.store.active_lottery().await?;
        self.env.store.user_tickets(lottery_id, user_id).await
    }

    /// Owner of a sold ticket and all of their numbers.
    ///
    /// `None` if the number is not sold.
    ///
    /// # Errors
    ///
    /// Returns `NoActiveLottery` or store failures.
    pub async fn find_by_ticket_number(&self, number: TicketNumber) -> Result<Option<TicketOwner>> {
        let lottery_id = self.env.store.active_lottery().await?;
        self.env.store.find_owner(lottery_id, number).await
    }
}
