//! # Raffle Core
//!
//! Domain model and seams for a numbered-ticket raffle where no ticket number is
//! ever sold twice, even when many purchases race for the same pool.
//!
//! This crate has no I/O. It defines:
//!
//! - [`types`]: identifiers, tickets, purchases and the read models
//! - [`error`]: the error taxonomy shared by every layer
//! - [`validation`]: request checks that run before any transaction opens
//! - [`store`]: the Reservation Engine, purchase repository and query traits
//! - [`environment`]: collaborators injected at startup (clock, mailer, proof compressor)
//!
//! # Architecture
//!
//! ```text
//!            ┌──────────────────────────┐
//!  request → │  Purchase Lifecycle Mgr  │ (raffle-runtime)
//!            └────────────┬─────────────┘
//!                         │ create / update status
//!            ┌────────────▼─────────────┐
//!            │ PurchaseRepository +     │ (raffle-postgres, raffle-testing)
//!            │ ReservationEngine        │
//!            └────────────┬─────────────┘
//!                         │ claim / release (one transaction)
//!            ┌────────────▼─────────────┐
//!            │     Ticket Pool Store    │
//!            └──────────────────────────┘
//! ```
//!
//! Correctness under concurrency is delegated to the store's transactional
//! isolation and row locking; nothing here holds an application-level mutex.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod environment;
pub mod error;
pub mod store;
pub mod types;
pub mod validation;

pub use error::{NotifyError, RaffleError, Result};
pub use types::*;
