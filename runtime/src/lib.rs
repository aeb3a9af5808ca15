//! # Raffle Runtime
//!
//! Wires the domain crates into a running service.
//!
//! ## Core Components
//!
//! - **[`RaffleService`]**: purchase lifecycle (create, verify, cancel) and the
//!   read-side queries
//! - **[`NotificationQueue`]**: bounded post-commit hand-off to the mailer
//! - **[`JpegProofCompressor`]**: shrinks payment-proof uploads
//! - **[`HttpMailer`]**: email API client for the operator notification
//! - **[`Config`]**: environment-driven configuration
//!
//! ## Example
//!
//! ```ignore
//! use raffle_runtime::{RaffleEnvironment, RaffleService, NotificationQueue};
//!
//! let (notifications, worker) = NotificationQueue::start(mailer, 256, timeout);
//! let service = RaffleService::new(
//!     RaffleEnvironment { store, compressor, notifications, clock },
//!     config.purchase.policy(),
//! );
//!
//! let purchase_id = service.create_purchase(intent).await?;
//! service.update_purchase_status(purchase_id, "verified").await?;
//!
//! worker.shutdown(config.server.shutdown_timeout()).await;
//! ```

/// Payment-proof compression
pub mod compression;

/// Environment configuration
pub mod config;

/// Operator notification mailers
pub mod mailer;

/// Prometheus metrics for observability
pub mod metrics;

/// Background notification queue
pub mod notifier;

/// Retry logic with exponential backoff
pub mod retry;

/// Purchase lifecycle and queries
pub mod service;

pub use compression::JpegProofCompressor;
pub use config::Config;
pub use mailer::{HttpMailer, LogMailer};
pub use metrics::MetricsServer;
pub use notifier::{NotificationQueue, NotificationWorker};
pub use retry::RetryPolicy;
pub use service::{RaffleEnvironment, RaffleService};
