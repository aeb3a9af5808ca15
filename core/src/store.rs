//! Store abstractions: the Reservation Engine, the purchase repository and
//! the read-side queries.
//!
//! # Implementations
//!
//! - `PostgresRaffleStore` (in `raffle-postgres`): production, row locking with
//!   `FOR UPDATE SKIP LOCKED`
//! - `InMemoryRaffleStore` (in `raffle-testing`): fast, deterministic tests
//!
//! # Ownership of ticket writes
//!
//! Ticket status is mutated only through [`ReservationEngine::claim_tickets`]
//! and [`ReservationEngine::release_tickets`]. The purchase repository calls
//! the same claim/release paths inside its own transaction when it creates or
//! cancels a purchase; no other code writes ticket rows.
//!
//! # Dyn Compatibility
//!
//! These traits return `Pin<Box<dyn Future>>` instead of using `async fn` so
//! that the lifecycle manager can hold `Arc<dyn PurchaseRepository>` handles
//! injected at startup.

use crate::error::Result;
use crate::types::{
    LeaderboardEntry, LotteryId, Page, Purchase, PurchaseId, PurchaseListing, PurchaseStatus,
    StatusChange, Ticket, TicketNumber, TicketOwner, UserId,
};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by the store traits.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Resolves the currently active lottery.
///
/// Resolved fresh on every request; implementations must not cache the id
/// across requests.
pub trait LotteryResolver: Send + Sync {
    /// Id of the single active lottery.
    ///
    /// # Errors
    ///
    /// - `NoActiveLottery`: no lottery is active
    /// - `Transient` / `Database`: store failure
    fn active_lottery(&self) -> StoreFuture<'_, LotteryId>;
}

/// Atomically claims and releases tickets.
///
/// # Claim algorithm
///
/// One transaction:
///
/// 1. Each explicit number is claimed with a conditional update guarded by
///    `status = available`. A miss aborts with `TicketUnavailable { number }`
///    without waiting on other transactions.
/// 2. `quantity - explicit.len()` further tickets are selected from the
///    available ones, skipping rows locked by concurrent transactions.
/// 3. Fewer rows than needed aborts with `InsufficientTickets`; no partial
///    allocation is ever returned or persisted.
/// 4. The selected rows are marked sold for the same user and purchase.
///
/// Any error rolls the whole transaction back.
pub trait ReservationEngine: Send + Sync {
    /// Claim `quantity` tickets for `purchase_id`: all of `explicit`, plus
    /// random available tickets for the remainder.
    ///
    /// Returns every assigned ticket (explicit first, then random).
    ///
    /// # Errors
    ///
    /// - `Validation`: `quantity == 0`, duplicates, or `explicit.len() > quantity`
    /// - `TicketUnavailable`: an explicit number is sold or does not exist
    /// - `InsufficientTickets`: not enough free tickets for the random fill
    /// - `Transient` / `Database`: store failure
    fn claim_tickets<'a>(
        &'a self,
        lottery_id: LotteryId,
        user_id: UserId,
        purchase_id: PurchaseId,
        explicit: &'a [TicketNumber],
        quantity: u32,
    ) -> StoreFuture<'a, Vec<Ticket>>;

    /// Return every ticket of `purchase_id` to the pool.
    ///
    /// Idempotent: releasing twice, or releasing a purchase with no tickets,
    /// succeeds and reports `0` on the later call.
    ///
    /// # Errors
    ///
    /// - `Transient` / `Database`: store failure
    fn release_tickets(&self, purchase_id: PurchaseId) -> StoreFuture<'_, u64>;
}

/// Persistence for purchases and their lifecycle transitions.
pub trait PurchaseRepository: Send + Sync {
    /// Insert `purchase` (status `Pending`) and claim its tickets in the same
    /// transaction. On any failure neither the purchase row nor any ticket
    /// claim remains.
    ///
    /// # Errors
    ///
    /// Same as [`ReservationEngine::claim_tickets`], plus store failures on
    /// the insert.
    fn create_with_tickets<'a>(
        &'a self,
        lottery_id: LotteryId,
        purchase: &'a Purchase,
        explicit: &'a [TicketNumber],
    ) -> StoreFuture<'a, Vec<Ticket>>;

    /// Apply an administrative status change.
    ///
    /// Moving to `Cancelled` releases the purchase's tickets in the same
    /// transaction as the status update.
    ///
    /// # Errors
    ///
    /// - `PurchaseNotFound`: unknown purchase
    /// - `InvalidTransition`: the state machine forbids the change
    /// - `Compensation`: the ticket release failed; nothing was changed
    /// - `Transient` / `Database`: store failure
    fn update_status(
        &self,
        purchase_id: PurchaseId,
        status: PurchaseStatus,
    ) -> StoreFuture<'_, StatusChange>;

    /// Load a purchase by id.
    ///
    /// # Errors
    ///
    /// Returns store failures; an unknown id is `Ok(None)`.
    fn get_purchase(&self, purchase_id: PurchaseId) -> StoreFuture<'_, Option<Purchase>>;

    /// Admin listing, newest first, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns store failures.
    fn list_purchases(
        &self,
        status: Option<PurchaseStatus>,
        page: Page,
    ) -> StoreFuture<'_, PurchaseListing>;

    /// Users ranked by total quantity of their verified purchases.
    ///
    /// # Errors
    ///
    /// Returns store failures.
    fn leaderboard(&self, page: Page) -> StoreFuture<'_, Vec<LeaderboardEntry>>;
}

/// Lock-free snapshot reads over the ticket pool.
pub trait TicketQuery: Send + Sync {
    /// Sold tickets as a percentage of the pool; `0.0` for an empty pool.
    ///
    /// # Errors
    ///
    /// Returns store failures.
    fn availability_percentage(&self, lottery_id: LotteryId) -> StoreFuture<'_, f64>;

    /// Subset of `candidates` that is not available.
    ///
    /// # Errors
    ///
    /// Returns store failures.
    fn unavailable_numbers<'a>(
        &'a self,
        lottery_id: LotteryId,
        candidates: &'a [TicketNumber],
    ) -> StoreFuture<'a, Vec<TicketNumber>>;

    /// Numbers owned by `user_id`, ascending.
    ///
    /// # Errors
    ///
    /// Returns store failures.
    fn user_tickets(
        &self,
        lottery_id: LotteryId,
        user_id: UserId,
    ) -> StoreFuture<'_, Vec<TicketNumber>>;

    /// Owner of a sold ticket and all of that owner's numbers; `None` when
    /// the number is not sold.
    ///
    /// # Errors
    ///
    /// Returns store failures.
    fn find_owner(
        &self,
        lottery_id: LotteryId,
        number: TicketNumber,
    ) -> StoreFuture<'_, Option<TicketOwner>>;
}

/// Everything the lifecycle manager needs from one backing store.
pub trait RaffleStore: LotteryResolver + ReservationEngine + PurchaseRepository + TicketQuery {}

impl<T> RaffleStore for T where T: LotteryResolver + ReservationEngine + PurchaseRepository + TicketQuery {}
