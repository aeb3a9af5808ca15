//! In-memory raffle store for fast, deterministic testing.
//!
//! Every operation runs inside one critical section over the whole state,
//! which stands in for the database transaction: it validates everything
//! first and only then mutates, so a failed claim leaves no trace.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use raffle_core::error::{RaffleError, Result};
use raffle_core::store::{
    LotteryResolver, PurchaseRepository, ReservationEngine, StoreFuture, TicketQuery,
};
use raffle_core::types::{
    LeaderboardEntry, LotteryId, Page, Purchase, PurchaseId, PurchaseListing, PurchaseStatus,
    PurchaseSummary, StatusChange, Ticket, TicketNumber, TicketOwner, TicketStatus, UserContact,
    UserId,
};
use raffle_core::validation::check_claim;
use rand::seq::SliceRandom;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct State {
    active: Option<LotteryId>,
    tickets: HashMap<LotteryId, BTreeMap<TicketNumber, Ticket>>,
    purchases: HashMap<PurchaseId, Purchase>,
    users: HashMap<UserId, UserContact>,
    fail_next_release: Option<String>,
    fail_next_claim: Option<RaffleError>,
    create_latency: Option<Duration>,
}

impl State {
    fn pool_mut(&mut self, lottery_id: LotteryId) -> Result<&mut BTreeMap<TicketNumber, Ticket>> {
        self.tickets
            .get_mut(&lottery_id)
            .ok_or_else(|| RaffleError::Database(format!("unknown lottery {lottery_id}")))
    }

    fn claim(
        &mut self,
        lottery_id: LotteryId,
        user_id: UserId,
        purchase_id: PurchaseId,
        explicit: &[TicketNumber],
        quantity: u32,
    ) -> Result<Vec<Ticket>> {
        check_claim(explicit, quantity)?;
        if let Some(err) = self.fail_next_claim.take() {
            return Err(err);
        }

        let pool = self.pool_mut(lottery_id)?;

        let mut ordered = explicit.to_vec();
        ordered.sort_unstable();
        for number in ordered {
            let free = pool
                .get(&number)
                .is_some_and(|t| t.status == TicketStatus::Available);
            if !free {
                return Err(RaffleError::TicketUnavailable { number });
            }
        }

        #[allow(clippy::cast_possible_truncation)] // bounded by quantity
        let remaining = quantity - explicit.len() as u32;
        let candidates: Vec<TicketNumber> = pool
            .values()
            .filter(|t| t.status == TicketStatus::Available && !explicit.contains(&t.number))
            .map(|t| t.number)
            .collect();

        if candidates.len() < remaining as usize {
            #[allow(clippy::cast_possible_truncation)]
            let available = candidates.len() as u32;
            return Err(RaffleError::InsufficientTickets {
                requested: remaining,
                available,
            });
        }

        let mut rng = rand::thread_rng();
        let random: Vec<TicketNumber> = candidates
            .choose_multiple(&mut rng, remaining as usize)
            .copied()
            .collect();

        // Validation passed; apply.
        let mut assigned = Vec::with_capacity(quantity as usize);
        for number in explicit.iter().chain(random.iter()) {
            let ticket = pool.get_mut(number).unwrap();
            ticket.status = TicketStatus::Sold;
            ticket.user_id = Some(user_id);
            ticket.purchase_id = Some(purchase_id);
            assigned.push(ticket.clone());
        }

        Ok(assigned)
    }

    fn release(&mut self, purchase_id: PurchaseId) -> Result<u64> {
        if let Some(reason) = self.fail_next_release.take() {
            return Err(RaffleError::Transient(reason));
        }

        let mut released = 0;
        for ticket in self.tickets.values_mut().flat_map(BTreeMap::values_mut) {
            if ticket.purchase_id == Some(purchase_id) {
                ticket.status = TicketStatus::Available;
                ticket.user_id = None;
                ticket.purchase_id = None;
                released += 1;
            }
        }
        Ok(released)
    }

    fn contact(&self, user_id: UserId) -> UserContact {
        self.users.get(&user_id).cloned().unwrap_or_else(|| UserContact {
            id: user_id,
            name: String::new(),
            email: String::new(),
            phone: String::new(),
        })
    }

    fn numbers_of(&self, purchase_id: PurchaseId) -> Vec<TicketNumber> {
        let mut numbers: Vec<_> = self
            .tickets
            .values()
            .flat_map(BTreeMap::values)
            .filter(|t| t.purchase_id == Some(purchase_id))
            .map(|t| t.number)
            .collect();
        numbers.sort_unstable();
        numbers
    }
}

fn paginate<T>(rows: Vec<T>, page: Page) -> Vec<T> {
    let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
    let limit = usize::try_from(page.limit()).unwrap_or(usize::MAX);
    rows.into_iter().skip(offset).take(limit).collect()
}

/// In-memory implementation of every raffle store trait.
///
/// Clones share state, so a test can keep a handle for assertions while the
/// service under test owns another.
///
/// # Example
///
/// ```
/// use raffle_testing::InMemoryRaffleStore;
/// use raffle_core::store::{LotteryResolver, ReservationEngine};
/// use raffle_core::types::{PurchaseId, TicketNumber, UserId};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryRaffleStore::new();
/// let lottery = store.open_lottery(10);
/// assert_eq!(store.active_lottery().await?, lottery);
///
/// let tickets = store
///     .claim_tickets(lottery, UserId::new(), PurchaseId::new(), &[TicketNumber::new(5)], 3)
///     .await?;
/// assert_eq!(tickets.len(), 3);
/// assert_eq!(store.available_count(lottery), 7);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryRaffleStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryRaffleStore {
    /// Create an empty store with no active lottery
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Deactivate any active lottery and open a new one with tickets
    /// `0..pool_size`
    pub fn open_lottery(&self, pool_size: u32) -> LotteryId {
        self.open_lottery_with(0..pool_size)
    }

    /// Open a lottery seeded with exactly `numbers`
    pub fn open_lottery_with(&self, numbers: impl IntoIterator<Item = u32>) -> LotteryId {
        let lottery_id = LotteryId::new();
        let pool = numbers
            .into_iter()
            .map(|n| {
                let number = TicketNumber::new(n);
                (number, Ticket::available(lottery_id, number))
            })
            .collect();

        let mut state = self.lock();
        state.tickets.insert(lottery_id, pool);
        state.active = Some(lottery_id);
        lottery_id
    }

    /// Remove the active lottery marker
    pub fn close_lottery(&self) {
        self.lock().active = None;
    }

    /// Register a buyer's contact data
    pub fn add_user(&self, user: UserContact) {
        self.lock().users.insert(user.id, user);
    }

    /// Make the next release fail with a transient error
    pub fn fail_next_release(&self, reason: impl Into<String>) {
        self.lock().fail_next_release = Some(reason.into());
    }

    /// Make the next claim fail with `err` (after argument validation)
    pub fn fail_next_claim(&self, err: RaffleError) {
        self.lock().fail_next_claim = Some(err);
    }

    /// Delay every `create_with_tickets` call by `latency` before it takes
    /// the lock
    pub fn set_create_latency(&self, latency: Duration) {
        self.lock().create_latency = Some(latency);
    }

    /// Snapshot of every ticket in `lottery_id`, ordered by number
    #[must_use]
    pub fn tickets(&self, lottery_id: LotteryId) -> Vec<Ticket> {
        self.lock()
            .tickets
            .get(&lottery_id)
            .map(|pool| pool.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of sold tickets in `lottery_id`
    #[must_use]
    pub fn sold_count(&self, lottery_id: LotteryId) -> usize {
        self.count(lottery_id, TicketStatus::Sold)
    }

    /// Number of available tickets in `lottery_id`
    #[must_use]
    pub fn available_count(&self, lottery_id: LotteryId) -> usize {
        self.count(lottery_id, TicketStatus::Available)
    }

    fn count(&self, lottery_id: LotteryId, status: TicketStatus) -> usize {
        self.lock()
            .tickets
            .get(&lottery_id)
            .map_or(0, |pool| pool.values().filter(|t| t.status == status).count())
    }

    /// Number of stored purchases
    #[must_use]
    pub fn purchase_count(&self) -> usize {
        self.lock().purchases.len()
    }

    /// Ticket numbers currently attached to `purchase_id`, ascending
    #[must_use]
    pub fn purchase_tickets(&self, purchase_id: PurchaseId) -> Vec<TicketNumber> {
        self.lock().numbers_of(purchase_id)
    }
}

impl LotteryResolver for InMemoryRaffleStore {
    fn active_lottery(&self) -> StoreFuture<'_, LotteryId> {
        Box::pin(async move { self.lock().active.ok_or(RaffleError::NoActiveLottery) })
    }
}

impl ReservationEngine for InMemoryRaffleStore {
    fn claim_tickets<'a>(
        &'a self,
        lottery_id: LotteryId,
        user_id: UserId,
        purchase_id: PurchaseId,
        explicit: &'a [TicketNumber],
        quantity: u32,
    ) -> StoreFuture<'a, Vec<Ticket>> {
        Box::pin(async move {
            self.lock()
                .claim(lottery_id, user_id, purchase_id, explicit, quantity)
        })
    }

    fn release_tickets(&self, purchase_id: PurchaseId) -> StoreFuture<'_, u64> {
        Box::pin(async move { self.lock().release(purchase_id) })
    }
}

impl PurchaseRepository for InMemoryRaffleStore {
    fn create_with_tickets<'a>(
        &'a self,
        lottery_id: LotteryId,
        purchase: &'a Purchase,
        explicit: &'a [TicketNumber],
    ) -> StoreFuture<'a, Vec<Ticket>> {
        Box::pin(async move {
            let latency = self.lock().create_latency;
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }

            let mut state = self.lock();
            if state.purchases.contains_key(&purchase.id) {
                return Err(RaffleError::Database(format!(
                    "duplicate purchase id {}",
                    purchase.id
                )));
            }

            let tickets = state.claim(
                lottery_id,
                purchase.user_id,
                purchase.id,
                explicit,
                purchase.quantity,
            )?;

            let mut stored = purchase.clone();
            stored.status = PurchaseStatus::Pending;
            state.purchases.insert(stored.id, stored);
            Ok(tickets)
        })
    }

    fn update_status(
        &self,
        purchase_id: PurchaseId,
        status: PurchaseStatus,
    ) -> StoreFuture<'_, StatusChange> {
        Box::pin(async move {
            let mut state = self.lock();
            let previous = state
                .purchases
                .get(&purchase_id)
                .map(|p| p.status)
                .ok_or(RaffleError::PurchaseNotFound(purchase_id))?;

            if !previous.can_transition_to(status) {
                return Err(RaffleError::InvalidTransition {
                    from: previous,
                    to: status,
                });
            }

            let released = if status == PurchaseStatus::Cancelled {
                state.release(purchase_id).map_err(|e| RaffleError::Compensation {
                    purchase_id,
                    reason: e.to_string(),
                })?
            } else {
                0
            };

            if let Some(purchase) = state.purchases.get_mut(&purchase_id) {
                purchase.status = status;
            }

            Ok(StatusChange {
                previous,
                current: status,
                released,
            })
        })
    }

    fn get_purchase(&self, purchase_id: PurchaseId) -> StoreFuture<'_, Option<Purchase>> {
        Box::pin(async move { Ok(self.lock().purchases.get(&purchase_id).cloned()) })
    }

    fn list_purchases(
        &self,
        status: Option<PurchaseStatus>,
        page: Page,
    ) -> StoreFuture<'_, PurchaseListing> {
        Box::pin(async move {
            let state = self.lock();
            let mut matching: Vec<&Purchase> = state
                .purchases
                .values()
                .filter(|p| status.is_none_or(|s| p.status == s))
                .collect();
            matching.sort_by(|a, b| {
                b.created_at
                    .cmp(&a.created_at)
                    .then_with(|| a.id.as_uuid().cmp(b.id.as_uuid()))
            });

            let total = matching.len() as u64;
            let rows = paginate(matching, page)
                .into_iter()
                .map(|p| PurchaseSummary {
                    user: state.contact(p.user_id),
                    purchase: p.clone(),
                    numbers: state.numbers_of(p.id),
                })
                .collect();

            Ok(PurchaseListing { rows, total })
        })
    }

    fn leaderboard(&self, page: Page) -> StoreFuture<'_, Vec<LeaderboardEntry>> {
        Box::pin(async move {
            let state = self.lock();
            let mut totals: BTreeMap<UserId, u64> = BTreeMap::new();
            for purchase in state
                .purchases
                .values()
                .filter(|p| p.status == PurchaseStatus::Verified)
            {
                *totals.entry(purchase.user_id).or_default() += u64::from(purchase.quantity);
            }

            let mut ranked: Vec<(UserId, u64)> = totals.into_iter().collect();
            ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

            Ok(paginate(ranked, page)
                .into_iter()
                .map(|(user_id, quantity)| LeaderboardEntry {
                    user: state.contact(user_id),
                    quantity,
                })
                .collect())
        })
    }
}

impl TicketQuery for InMemoryRaffleStore {
    fn availability_percentage(&self, lottery_id: LotteryId) -> StoreFuture<'_, f64> {
        Box::pin(async move {
            let state = self.lock();
            let Some(pool) = state.tickets.get(&lottery_id) else {
                return Ok(0.0);
            };
            if pool.is_empty() {
                return Ok(0.0);
            }
            let sold = pool.values().filter(|t| t.status == TicketStatus::Sold).count();
            #[allow(clippy::cast_precision_loss)]
            Ok(sold as f64 / pool.len() as f64 * 100.0)
        })
    }

    fn unavailable_numbers<'a>(
        &'a self,
        lottery_id: LotteryId,
        candidates: &'a [TicketNumber],
    ) -> StoreFuture<'a, Vec<TicketNumber>> {
        Box::pin(async move {
            if candidates.is_empty() {
                return Ok(Vec::new());
            }
            let state = self.lock();
            let pool = state.tickets.get(&lottery_id);
            Ok(candidates
                .iter()
                .filter(|n| {
                    !pool
                        .and_then(|p| p.get(n))
                        .is_some_and(|t| t.status == TicketStatus::Available)
                })
                .copied()
                .collect())
        })
    }

    fn user_tickets(
        &self,
        lottery_id: LotteryId,
        user_id: UserId,
    ) -> StoreFuture<'_, Vec<TicketNumber>> {
        Box::pin(async move {
            let state = self.lock();
            Ok(state
                .tickets
                .get(&lottery_id)
                .map(|pool| {
                    pool.values()
                        .filter(|t| t.user_id == Some(user_id))
                        .map(|t| t.number)
                        .collect()
                })
                .unwrap_or_default())
        })
    }

    fn find_owner(
        &self,
        lottery_id: LotteryId,
        number: TicketNumber,
    ) -> StoreFuture<'_, Option<TicketOwner>> {
        Box::pin(async move {
            let state = self.lock();
            let Some(pool) = state.tickets.get(&lottery_id) else {
                return Ok(None);
            };
            let Some(owner) = pool.get(&number).and_then(|t| t.user_id) else {
                return Ok(None);
            };

            let numbers = pool
                .values()
                .filter(|t| t.user_id == Some(owner))
                .map(|t| t.number)
                .collect();

            Ok(Some(TicketOwner {
                user: state.contact(owner),
                numbers,
            }))
        })
    }
}
