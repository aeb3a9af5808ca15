//! Mock implementations of the collaborator traits.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use chrono::{DateTime, Utc};
use raffle_core::environment::{Clock, Mailer, ProofCompressor};
use raffle_core::error::{NotifyError, RaffleError, Result};
use raffle_core::types::{Purchase, PurchaseId};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type NotifyFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<(), NotifyError>> + Send + 'a>>;

/// Fixed clock for deterministic tests
///
/// Always returns the same time, making tests reproducible.
///
/// # Example
///
/// ```
/// use raffle_testing::mocks::FixedClock;
/// use raffle_core::environment::Clock;
/// use chrono::Utc;
///
/// let clock = FixedClock::new(Utc::now());
/// assert_eq!(clock.now(), clock.now());
/// ```
#[derive(Debug, Clone)]
pub struct FixedClock {
    time: Arc<Mutex<DateTime<Utc>>>,
}

impl FixedClock {
    /// Create a new fixed clock with the given time
    #[must_use]
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            time: Arc::new(Mutex::new(time)),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: chrono::Duration) {
        let mut time = self.time.lock().unwrap();
        *time += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.time.lock().unwrap()
    }
}

/// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
#[must_use]
#[allow(clippy::expect_used)]
pub fn test_clock() -> FixedClock {
    FixedClock::new(
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc),
    )
}

/// Mailer that records every notified purchase.
#[derive(Debug, Clone, Default)]
pub struct RecordingMailer {
    sent: Arc<Mutex<Vec<PurchaseId>>>,
}

impl RecordingMailer {
    /// Create an empty recording mailer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Purchases notified so far, in order
    #[must_use]
    pub fn sent(&self) -> Vec<PurchaseId> {
        self.sent.lock().unwrap().clone()
    }
}

impl Mailer for RecordingMailer {
    fn notify<'a>(&'a self, purchase: &'a Purchase) -> NotifyFuture<'a> {
        Box::pin(async move {
            self.sent.lock().unwrap().push(purchase.id);
            Ok(())
        })
    }
}

/// Mailer that always fails with a transport error.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingMailer;

impl Mailer for FailingMailer {
    fn notify<'a>(&'a self, _purchase: &'a Purchase) -> NotifyFuture<'a> {
        Box::pin(async move { Err(NotifyError::Transport("connection refused".to_string())) })
    }
}

/// Mailer that sleeps before recording, for timeout and shutdown tests.
#[derive(Debug, Clone)]
pub struct SlowMailer {
    delay: Duration,
    inner: RecordingMailer,
}

impl SlowMailer {
    /// Create a mailer that waits `delay` per notification
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            inner: RecordingMailer::new(),
        }
    }

    /// Purchases whose notification completed
    #[must_use]
    pub fn sent(&self) -> Vec<PurchaseId> {
        self.inner.sent()
    }
}

impl Mailer for SlowMailer {
    fn notify<'a>(&'a self, purchase: &'a Purchase) -> NotifyFuture<'a> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.inner.notify(purchase).await
        })
    }
}

/// Compressor that returns its input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCompressor;

impl ProofCompressor for PassthroughCompressor {
    fn compress(&self, raw: &[u8]) -> Result<Vec<u8>> {
        if raw.is_empty() {
            return Err(RaffleError::ProofRejected("empty image".to_string()));
        }
        Ok(raw.to_vec())
    }
}

/// Compressor that rejects every image.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectingCompressor;

impl ProofCompressor for RejectingCompressor {
    fn compress(&self, _raw: &[u8]) -> Result<Vec<u8>> {
        Err(RaffleError::ProofRejected(
            "unable to compress image under 81920 bytes".to_string(),
        ))
    }
}
