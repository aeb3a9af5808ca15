//! Collaborators injected into the lifecycle manager at startup.
//!
//! All external dependencies are abstracted behind traits so the manager can
//! be exercised with deterministic doubles.

use crate::error::{NotifyError, Result};
use crate::types::Purchase;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;

/// Clock trait - abstracts time operations for testability
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Sends the "new purchase received" notification.
///
/// Called from a background task after the purchase committed. Errors are
/// logged by the caller and never retried.
pub trait Mailer: Send + Sync {
    /// Notify the raffle operators about `purchase`.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] if the notification could not be delivered.
    fn notify<'a>(
        &'a self,
        purchase: &'a Purchase,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<(), NotifyError>> + Send + 'a>>;
}

/// Shrinks a payment-proof upload before it is persisted.
pub trait ProofCompressor: Send + Sync {
    /// Compress `raw` to a bounded size.
    ///
    /// # Errors
    ///
    /// Returns `ProofRejected` if the bytes are not an image or cannot be
    /// brought under the size ceiling.
    fn compress(&self, raw: &[u8]) -> Result<Vec<u8>>;
}
