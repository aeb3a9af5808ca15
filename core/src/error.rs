//! Error types for raffle operations.

use crate::types::{PurchaseId, PurchaseStatus, TicketNumber};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for raffle operations.
pub type Result<T> = std::result::Result<T, RaffleError>;

/// Error taxonomy shared by the store, the lifecycle manager and callers.
///
/// Callers branch on the class, not the message:
///
/// - [`is_validation`](Self::is_validation): bad input, never retried
/// - [`is_unavailable`](Self::is_unavailable): inventory conflict, re-prompt the buyer
/// - [`is_retryable`](Self::is_retryable): transient, the same call may be repeated
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RaffleError {
    // ═══════════════════════════════════════════════════════════
    // Validation Errors
    // ═══════════════════════════════════════════════════════════

    /// Request rejected before any transaction opened.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Payment proof could not be compressed under the size ceiling.
    #[error("Payment proof rejected: {0}")]
    ProofRejected(String),

    // ═══════════════════════════════════════════════════════════
    // Inventory Conflicts
    // ═══════════════════════════════════════════════════════════

    /// An explicitly chosen number is taken or does not exist.
    #[error("ticket number {number} is no longer available")]
    TicketUnavailable {
        /// The number that could not be claimed
        number: TicketNumber,
    },

    /// Not enough free tickets to fill the random part of the request.
    #[error("not enough tickets available: requested {requested}, found {available}")]
    InsufficientTickets {
        /// Random tickets requested
        requested: u32,
        /// Random tickets that could be selected
        available: u32,
    },

    // ═══════════════════════════════════════════════════════════
    // Lifecycle Errors
    // ═══════════════════════════════════════════════════════════

    /// No lottery is currently active.
    #[error("No active lottery")]
    NoActiveLottery,

    /// Purchase does not exist.
    #[error("Purchase not found: {0}")]
    PurchaseNotFound(PurchaseId),

    /// Status change not allowed by the state machine.
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status
        from: PurchaseStatus,
        /// Requested status
        to: PurchaseStatus,
    },

    // ═══════════════════════════════════════════════════════════
    // Infrastructure Errors
    // ═══════════════════════════════════════════════════════════

    /// The purchase deadline elapsed; the transaction was rolled back.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Connection loss, deadlock or serialization failure.
    #[error("Transient store error: {0}")]
    Transient(String),

    /// Any other store failure.
    #[error("Database error: {0}")]
    Database(String),

    /// Releasing tickets during cancellation failed; the purchase was left
    /// untouched and the cancellation must be retried.
    #[error("Failed to release tickets of purchase {purchase_id}: {reason}")]
    Compensation {
        /// Purchase whose cancellation failed
        purchase_id: PurchaseId,
        /// Underlying failure
        reason: String,
    },
}

impl RaffleError {
    /// Input was rejected before touching the store.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::ProofRejected(_) | Self::InvalidTransition { .. }
        )
    }

    /// Inventory conflict: the buyer should pick other numbers or a smaller
    /// quantity.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::TicketUnavailable { .. } | Self::InsufficientTickets { .. }
        )
    }

    /// The whole call can be repeated with the same input. Claims are guarded
    /// by the ticket status, so a retry never double-claims.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::Timeout(_) | Self::Compensation { .. }
        )
    }

    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::ProofRejected(_) => "proof_rejected",
            Self::TicketUnavailable { .. } => "ticket_unavailable",
            Self::InsufficientTickets { .. } => "insufficient_tickets",
            Self::NoActiveLottery => "no_active_lottery",
            Self::PurchaseNotFound(_) => "purchase_not_found",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Timeout(_) => "timeout",
            Self::Transient(_) => "transient",
            Self::Database(_) => "database",
            Self::Compensation { .. } => "compensation",
        }
    }
}

/// Failure of the purchase notification collaborator.
///
/// Kept apart from [`RaffleError`]: a notification never affects the outcome
/// of the purchase that triggered it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// Payload could not be built.
    #[error("failed to build notification: {0}")]
    Payload(String),

    /// Transport failed (connection, TLS, DNS).
    #[error("failed to send notification: {0}")]
    Transport(String),

    /// Provider answered with a non-success status.
    #[error("notification rejected with status {status}")]
    Rejected {
        /// HTTP status code
        status: u16,
    },

    /// Send did not finish within its own deadline.
    #[error("notification timed out after {0:?}")]
    Timeout(Duration),
}
