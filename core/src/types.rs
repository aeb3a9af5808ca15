//! Domain types for the raffle.
//!
//! Identifiers, the ticket and purchase rows, and the read models returned by
//! the query layer (admin listing, leaderboard, owner search).

use crate::error::{RaffleError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a lottery (one ticket pool)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LotteryId(Uuid);

impl LotteryId {
    /// Creates a new random `LotteryId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `LotteryId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for LotteryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LotteryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a buyer
///
/// Users are owned by the authentication collaborator; the raffle only
/// references them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(Uuid);

impl UserId {
    /// Creates a new random `UserId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `UserId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a purchase
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PurchaseId(Uuid);

impl PurchaseId {
    /// Creates a new random `PurchaseId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `PurchaseId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Parse a purchase id from its string form.
    ///
    /// # Errors
    ///
    /// Returns [`RaffleError::Validation`] if the input is not a UUID.
    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| RaffleError::Validation(format!("invalid purchase id: {s}")))
    }
}

impl Default for PurchaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PurchaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a ticket row
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TicketId(Uuid);

impl TicketId {
    /// Creates a new random `TicketId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `TicketId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TicketId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Value Objects
// ============================================================================

/// A ticket number inside a lottery's fixed number space (e.g. `0..10000`)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TicketNumber(u32);

impl TicketNumber {
    /// Creates a new `TicketNumber`
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Get the numeric value
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Parse a buyer-supplied number such as `" 42"`.
    ///
    /// # Errors
    ///
    /// Returns [`RaffleError::Validation`] naming the input if it is not a
    /// non-negative integer.
    pub fn parse(s: &str) -> Result<Self> {
        s.trim()
            .parse::<u32>()
            .map(Self)
            .map_err(|_| RaffleError::Validation(format!("invalid ticket number: {s:?}")))
    }
}

impl fmt::Display for TicketNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for TicketNumber {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Status of a single ticket
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TicketStatus {
    /// Not owned by any purchase
    Available,
    /// Claimed by a purchase (pending or verified)
    Sold,
}

impl TicketStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Sold => "sold",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "available" => Ok(Self::Available),
            "sold" => Ok(Self::Sold),
            _ => Err(RaffleError::Database(format!("Invalid ticket status: {s}"))),
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a purchase in its approval workflow.
///
/// ```text
/// Pending ──► Verified   (terminal)
///    │
///    └──────► Cancelled  (terminal, releases tickets)
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PurchaseStatus {
    /// Awaiting administrator review
    Pending,
    /// Payment confirmed
    Verified,
    /// Rejected; tickets were returned to the pool
    Cancelled,
}

impl PurchaseStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "verified" => Ok(Self::Verified),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(RaffleError::Validation(format!("Invalid purchase status: {s}"))),
        }
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Verified | Self::Cancelled)
    }

    /// Whether `self -> next` is allowed.
    ///
    /// Re-applying a terminal status is accepted as a no-op so that an
    /// operator can retry a cancellation whose ticket release failed.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Verified | Self::Cancelled)
                | (Self::Verified, Self::Verified)
                | (Self::Cancelled, Self::Cancelled)
        )
    }
}

impl fmt::Display for PurchaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment details supplied by the buyer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentMeta {
    /// Amount paid in bolivares
    pub amount_bs: f64,
    /// Amount paid in US dollars
    pub amount_usd: f64,
    /// Payment method label (e.g. "pago movil", "zelle")
    pub method: String,
    /// Trailing digits of the bank reference
    pub reference_digits: String,
}

// ============================================================================
// Entities
// ============================================================================

/// One numbered ticket in a lottery's pool
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Row identifier
    pub id: TicketId,
    /// Owning lottery
    pub lottery_id: LotteryId,
    /// Number, unique within the lottery
    pub number: TicketNumber,
    /// Current status
    pub status: TicketStatus,
    /// Owner, set iff sold
    pub user_id: Option<UserId>,
    /// Purchase that claimed it, set iff sold
    pub purchase_id: Option<PurchaseId>,
}

impl Ticket {
    /// Creates an available, unowned ticket
    #[must_use]
    pub fn available(lottery_id: LotteryId, number: TicketNumber) -> Self {
        Self {
            id: TicketId::new(),
            lottery_id,
            number,
            status: TicketStatus::Available,
            user_id: None,
            purchase_id: None,
        }
    }

    /// `available ⇔ no owner` and `sold ⇔ owner and purchase set`
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        match self.status {
            TicketStatus::Available => self.user_id.is_none() && self.purchase_id.is_none(),
            TicketStatus::Sold => self.user_id.is_some() && self.purchase_id.is_some(),
        }
    }
}

/// A buy attempt as persisted
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Purchase {
    /// Unique purchase identifier
    pub id: PurchaseId,
    /// Buyer
    pub user_id: UserId,
    /// Total tickets requested (explicit + random)
    pub quantity: u32,
    /// Payment details
    pub payment: PaymentMeta,
    /// Compressed payment-proof image (JPEG)
    pub payment_proof: Vec<u8>,
    /// Workflow status
    pub status: PurchaseStatus,
    /// When the purchase was submitted
    pub created_at: DateTime<Utc>,
}

/// Caller input for creating a purchase, before validation.
#[derive(Clone, Debug, PartialEq)]
pub struct PurchaseIntent {
    /// Authenticated buyer
    pub user_id: UserId,
    /// Total tickets requested
    pub quantity: u32,
    /// Numbers the buyer chose, as typed (e.g. `["5", " 17"]`)
    pub explicit_numbers: Vec<String>,
    /// Payment details
    pub payment: PaymentMeta,
    /// Uncompressed proof upload
    pub payment_proof: Vec<u8>,
}

/// Outcome of an administrative status update
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    /// Status before the update
    pub previous: PurchaseStatus,
    /// Status after the update
    pub current: PurchaseStatus,
    /// Tickets returned to the pool by this update
    pub released: u64,
}

// ============================================================================
// Read Models
// ============================================================================

/// Pagination request.
///
/// Non-positive values fall back to page 1 and 10 rows per page.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// 1-based page number
    pub page: u32,
    /// Rows per page
    pub per_page: u32,
}

impl Page {
    /// Default rows per page
    pub const DEFAULT_PER_PAGE: u32 = 10;
    /// Upper bound on rows per page
    pub const MAX_PER_PAGE: u32 = 100;

    /// Creates a normalized page request
    #[must_use]
    pub fn new(page: i64, per_page: i64) -> Self {
        let page = u32::try_from(page).ok().filter(|p| *p > 0).unwrap_or(1);
        let per_page = u32::try_from(per_page)
            .ok()
            .filter(|p| *p > 0)
            .unwrap_or(Self::DEFAULT_PER_PAGE)
            .min(Self::MAX_PER_PAGE);
        Self { page, per_page }
    }

    /// Rows to skip
    #[must_use]
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.per_page)
    }

    /// Rows to return
    #[must_use]
    pub fn limit(&self) -> u64 {
        u64::from(self.per_page)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(1, i64::from(Self::DEFAULT_PER_PAGE))
    }
}

/// Contact data of a buyer, as shown to administrators
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContact {
    /// User identifier
    pub id: UserId,
    /// Display name
    pub name: String,
    /// Email address
    pub email: String,
    /// Phone number
    pub phone: String,
}

/// Admin listing row: a purchase with its buyer and assigned numbers
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PurchaseSummary {
    /// Buyer contact
    pub user: UserContact,
    /// The purchase row
    pub purchase: Purchase,
    /// Ticket numbers currently attached to the purchase, ascending
    pub numbers: Vec<TicketNumber>,
}

/// Page of purchases plus the total matching the filter
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PurchaseListing {
    /// Rows on this page, newest first
    pub rows: Vec<PurchaseSummary>,
    /// Total rows matching the filter across all pages
    pub total: u64,
}

/// One leaderboard row
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// Buyer contact
    pub user: UserContact,
    /// Sum of quantity over verified purchases
    pub quantity: u64,
}

/// Result of searching a sold ticket's owner
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketOwner {
    /// Owner contact
    pub user: UserContact,
    /// All of the owner's numbers in the active lottery, ascending
    pub numbers: Vec<TicketNumber>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_number_parse_trims_and_rejects_garbage() {
        assert_eq!(TicketNumber::parse(" 42 ").ok(), Some(TicketNumber::new(42)));
        assert!(TicketNumber::parse("-1").is_err());
        assert!(TicketNumber::parse("4a").is_err());
        assert!(TicketNumber::parse("").is_err());
    }

    #[test]
    fn purchase_status_round_trips_database_strings() {
        for status in [
            PurchaseStatus::Pending,
            PurchaseStatus::Verified,
            PurchaseStatus::Cancelled,
        ] {
            assert_eq!(PurchaseStatus::parse(status.as_str()).ok(), Some(status));
        }
        assert!(PurchaseStatus::parse("refunded").is_err());
    }

    #[test]
    fn only_pending_purchases_move() {
        use PurchaseStatus::{Cancelled, Pending, Verified};

        assert!(Pending.can_transition_to(Verified));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Pending));
        assert!(!Verified.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Verified));
        assert!(!Cancelled.can_transition_to(Pending));

        // Operator retry of a terminal status is a no-op
        assert!(Cancelled.can_transition_to(Cancelled));
        assert!(Verified.can_transition_to(Verified));
    }

    #[test]
    fn ticket_consistency_tracks_ownership() {
        let mut ticket = Ticket::available(LotteryId::new(), TicketNumber::new(7));
        assert!(ticket.is_consistent());

        ticket.status = TicketStatus::Sold;
        assert!(!ticket.is_consistent());

        ticket.user_id = Some(UserId::new());
        ticket.purchase_id = Some(PurchaseId::new());
        assert!(ticket.is_consistent());
    }

    #[test]
    fn page_normalizes_bad_input() {
        assert_eq!(Page::new(0, 0), Page { page: 1, per_page: 10 });
        assert_eq!(Page::new(-3, 25), Page { page: 1, per_page: 25 });
        assert_eq!(Page::new(3, 10_000).per_page, Page::MAX_PER_PAGE);
        assert_eq!(Page::new(3, 20).offset(), 40);
    }
}
