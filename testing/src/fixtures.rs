//! Builders for common test inputs.

use chrono::Utc;
use raffle_core::types::{
    PaymentMeta, Purchase, PurchaseId, PurchaseIntent, PurchaseStatus, UserContact, UserId,
};

/// A payment that passes validation
#[must_use]
pub fn payment() -> PaymentMeta {
    PaymentMeta {
        amount_bs: 365.0,
        amount_usd: 10.0,
        method: "pago movil".to_string(),
        reference_digits: "004512".to_string(),
    }
}

/// Stand-in proof bytes (JPEG magic followed by padding)
#[must_use]
pub fn proof() -> Vec<u8> {
    let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0];
    bytes.resize(64, 0);
    bytes
}

/// A purchase intent that passes validation with the default policy
#[must_use]
pub fn intent(user_id: UserId, quantity: u32, explicit: &[&str]) -> PurchaseIntent {
    PurchaseIntent {
        user_id,
        quantity,
        explicit_numbers: explicit.iter().map(ToString::to_string).collect(),
        payment: payment(),
        payment_proof: proof(),
    }
}

/// A pending purchase row ready for `create_with_tickets`
#[must_use]
pub fn purchase(user_id: UserId, quantity: u32) -> Purchase {
    Purchase {
        id: PurchaseId::new(),
        user_id,
        quantity,
        payment: payment(),
        payment_proof: proof(),
        status: PurchaseStatus::Pending,
        created_at: Utc::now(),
    }
}

/// A buyer with a derived email address
#[must_use]
pub fn user(name: &str) -> UserContact {
    UserContact {
        id: UserId::new(),
        name: name.to_string(),
        email: format!("{}@example.com", name.to_lowercase()),
        phone: "+58 414 5550000".to_string(),
    }
}
