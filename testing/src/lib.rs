//! # Raffle Testing
//!
//! Testing utilities for the raffle.
//!
//! This crate provides:
//! - [`InMemoryRaffleStore`]: every store trait over a mutex-guarded map
//! - Mock mailers, compressors and a fixed clock
//! - Fixtures for purchases, intents and users
//!
//! ## Example
//!
//! ```ignore
//! use raffle_testing::{InMemoryRaffleStore, RecordingMailer, fixtures};
//!
//! #[tokio::test]
//! async fn test_purchase_flow() {
//!     let store = InMemoryRaffleStore::new();
//!     let lottery = store.open_lottery(10);
//!     let service = service_with(store.clone(), RecordingMailer::new());
//!
//!     let user = fixtures::user("Ana");
//!     service.create_purchase(fixtures::intent(user.id, 3, &["5"])).await?;
//!
//!     assert_eq!(store.sold_count(lottery), 3);
//! }
//! ```

pub mod fixtures;
pub mod memory;
pub mod mocks;

// Re-export commonly used items
pub use memory::InMemoryRaffleStore;
pub use mocks::{
    FailingMailer, FixedClock, PassthroughCompressor, RecordingMailer, RejectingCompressor,
    SlowMailer, test_clock,
};
