//! Request validation.
//!
//! Everything here runs before a transaction is opened. A request that fails
//! validation never reaches the Reservation Engine.

use crate::error::{RaffleError, Result};
use crate::types::{PaymentMeta, PurchaseIntent, PurchaseStatus, TicketNumber};
use std::collections::HashSet;

/// Limits applied to incoming purchases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurchasePolicy {
    /// Smallest quantity a buyer may request
    pub min_quantity: u32,
    /// Largest quantity a buyer may request
    pub max_quantity: u32,
    /// Size of the number space; valid numbers are `0..pool_size`
    pub pool_size: u32,
    /// Largest accepted proof upload, before compression
    pub max_upload_bytes: usize,
}

impl Default for PurchasePolicy {
    fn default() -> Self {
        Self {
            min_quantity: 2,
            max_quantity: 1_000,
            pool_size: 10_000,
            max_upload_bytes: 1024 * 1024,
        }
    }
}

/// Minimum length of the payment reference.
pub const MIN_REFERENCE_DIGITS: usize = 6;

/// Validate a purchase intent and return the parsed explicit numbers.
///
/// # Errors
///
/// Returns [`RaffleError::Validation`] describing the first problem found.
pub fn validate_intent(intent: &PurchaseIntent, policy: &PurchasePolicy) -> Result<Vec<TicketNumber>> {
    if intent.quantity < policy.min_quantity {
        return Err(RaffleError::Validation(format!(
            "quantity must be at least {}, got {}",
            policy.min_quantity, intent.quantity
        )));
    }
    if intent.quantity > policy.max_quantity {
        return Err(RaffleError::Validation(format!(
            "quantity must be at most {}, got {}",
            policy.max_quantity, intent.quantity
        )));
    }

    let numbers = parse_numbers(&intent.explicit_numbers)?;
    check_claim(&numbers, intent.quantity)?;

    if let Some(out_of_range) = numbers.iter().find(|n| n.get() >= policy.pool_size) {
        return Err(RaffleError::Validation(format!(
            "ticket number {out_of_range} is outside the pool (0..{})",
            policy.pool_size
        )));
    }

    validate_payment(&intent.payment)?;

    if intent.payment_proof.is_empty() {
        return Err(RaffleError::Validation("payment proof is required".to_string()));
    }
    if intent.payment_proof.len() > policy.max_upload_bytes {
        return Err(RaffleError::Validation(format!(
            "payment proof exceeds {} bytes",
            policy.max_upload_bytes
        )));
    }

    Ok(numbers)
}

/// Parse buyer-typed numbers, ignoring blank entries.
///
/// # Errors
///
/// Returns [`RaffleError::Validation`] naming the first unparsable entry.
pub fn parse_numbers(raw: &[String]) -> Result<Vec<TicketNumber>> {
    raw.iter()
        .filter(|s| !s.trim().is_empty())
        .map(|s| TicketNumber::parse(s))
        .collect()
}

/// Preconditions of `ClaimTickets`: `quantity >= 1`, no duplicate explicit
/// numbers, and `len(explicit) <= quantity`.
///
/// # Errors
///
/// Returns [`RaffleError::Validation`] if any precondition fails.
pub fn check_claim(explicit: &[TicketNumber], quantity: u32) -> Result<()> {
    if quantity == 0 {
        return Err(RaffleError::Validation("quantity must be at least 1".to_string()));
    }

    let mut seen = HashSet::with_capacity(explicit.len());
    if let Some(dup) = explicit.iter().find(|n| !seen.insert(**n)) {
        return Err(RaffleError::Validation(format!("ticket number {dup} selected twice")));
    }

    if explicit.len() > quantity as usize {
        return Err(RaffleError::Validation(format!(
            "{} numbers selected but quantity is {quantity}",
            explicit.len()
        )));
    }

    Ok(())
}

/// Check the payment fields.
///
/// # Errors
///
/// Returns [`RaffleError::Validation`] if the method is blank, the reference
/// is short or not numeric, or an amount is negative or not finite.
pub fn validate_payment(payment: &PaymentMeta) -> Result<()> {
    if payment.method.trim().is_empty() {
        return Err(RaffleError::Validation("payment method is required".to_string()));
    }

    let digits = payment.reference_digits.trim();
    if digits.len() < MIN_REFERENCE_DIGITS || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(RaffleError::Validation(format!(
            "payment reference must be at least {MIN_REFERENCE_DIGITS} digits"
        )));
    }

    for (label, amount) in [("bs", payment.amount_bs), ("usd", payment.amount_usd)] {
        if !amount.is_finite() || amount < 0.0 {
            return Err(RaffleError::Validation(format!("invalid {label} amount: {amount}")));
        }
    }

    Ok(())
}

/// Parse the target of an administrative status update.
///
/// Only `verified` and `cancelled` are accepted; a purchase can never be
/// moved back to `pending`.
///
/// # Errors
///
/// Returns [`RaffleError::Validation`] for anything else.
pub fn parse_status_update(raw: &str) -> Result<PurchaseStatus> {
    match PurchaseStatus::parse(raw.trim())? {
        PurchaseStatus::Pending => Err(RaffleError::Validation(
            "status must be verified or cancelled".to_string(),
        )),
        status => Ok(status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserId;
    use proptest::prelude::*;

    fn intent(quantity: u32, numbers: &[&str]) -> PurchaseIntent {
        PurchaseIntent {
            user_id: UserId::new(),
            quantity,
            explicit_numbers: numbers.iter().map(ToString::to_string).collect(),
            payment: PaymentMeta {
                amount_bs: 350.0,
                amount_usd: 10.0,
                method: "pago movil".to_string(),
                reference_digits: "123456".to_string(),
            },
            payment_proof: vec![0xFF, 0xD8, 0xFF],
        }
    }

    #[test]
    fn accepts_mixed_selection() {
        let numbers = validate_intent(&intent(3, &["5", " 17 "]), &PurchasePolicy::default());
        assert_eq!(numbers, Ok(vec![TicketNumber::new(5), TicketNumber::new(17)]));
    }

    #[test]
    fn rejects_quantity_below_minimum() {
        let err = validate_intent(&intent(1, &[]), &PurchasePolicy::default());
        assert!(matches!(err, Err(RaffleError::Validation(_))));
    }

    #[test]
    fn rejects_more_numbers_than_quantity() {
        let err = validate_intent(&intent(2, &["1", "2", "3"]), &PurchasePolicy::default());
        assert!(matches!(err, Err(RaffleError::Validation(_))));
    }

    #[test]
    fn rejects_duplicates_and_out_of_range() {
        let policy = PurchasePolicy::default();
        assert!(validate_intent(&intent(3, &["4", "4"]), &policy).is_err());
        assert!(validate_intent(&intent(3, &["10000"]), &policy).is_err());
        assert!(validate_intent(&intent(3, &["abc"]), &policy).is_err());
    }

    #[test]
    fn rejects_short_reference_and_missing_proof() {
        let policy = PurchasePolicy::default();

        let mut short = intent(2, &[]);
        short.payment.reference_digits = "123".to_string();
        assert!(validate_intent(&short, &policy).is_err());

        let mut no_proof = intent(2, &[]);
        no_proof.payment_proof.clear();
        assert!(validate_intent(&no_proof, &policy).is_err());

        let mut negative = intent(2, &[]);
        negative.payment.amount_usd = -1.0;
        assert!(validate_intent(&negative, &policy).is_err());
    }

    #[test]
    fn status_update_never_targets_pending() {
        assert_eq!(parse_status_update("verified"), Ok(PurchaseStatus::Verified));
        assert_eq!(parse_status_update(" cancelled "), Ok(PurchaseStatus::Cancelled));
        assert!(parse_status_update("pending").is_err());
        assert!(parse_status_update("done").is_err());
    }

    proptest! {
        #[test]
        fn distinct_in_range_selections_always_validate(
            picks in proptest::collection::hash_set(0u32..10_000, 0..20),
            extra in 0u32..20,
        ) {
            let raw: Vec<String> = picks.iter().map(ToString::to_string).collect();
            let quantity = (u32::try_from(raw.len()).unwrap_or(u32::MAX) + extra).max(2);
            let mut req = intent(quantity, &[]);
            req.explicit_numbers = raw;

            let parsed = validate_intent(&req, &PurchasePolicy::default());
            prop_assert!(parsed.is_ok());
            prop_assert_eq!(parsed.map(|n| n.len()).unwrap_or_default(), picks.len());
        }
    }
}
