//! Prometheus metrics for the raffle.
//!
//! Counter names are exported as constants so the service, the notification
//! worker and dashboards agree on them. The exporter is optional: without
//! [`MetricsServer::start`] the `metrics` macros are no-ops.
//!
//! # Example
//!
//! ```rust,no_run
//! use raffle_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::describe_counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use thiserror::Error;

/// Purchases committed with their tickets
pub const PURCHASES_CREATED: &str = "raffle.purchases.created";
/// Purchases that failed, labelled by `reason`
pub const PURCHASES_REJECTED: &str = "raffle.purchases.rejected";
/// Tickets marked sold
pub const TICKETS_CLAIMED: &str = "raffle.tickets.claimed";
/// Tickets returned to the pool by cancellations
pub const TICKETS_RELEASED: &str = "raffle.tickets.released";
/// Notifications delivered
pub const NOTIFICATIONS_SENT: &str = "raffle.notifications.sent";
/// Notifications that failed or timed out
pub const NOTIFICATIONS_FAILED: &str = "raffle.notifications.failed";
/// Notifications dropped because the queue was full or closed
pub const NOTIFICATIONS_DROPPED: &str = "raffle.notifications.dropped";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus scrape endpoint.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    started: bool,
}

impl MetricsServer {
    /// Create a metrics server bound to `addr` once started.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            started: false,
        }
    }

    /// Install the global recorder and start serving `/metrics`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Install`] if a recorder is already installed
    /// or the listener cannot be bound.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        if self.started {
            return Ok(());
        }

        PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .install()
            .map_err(|e| MetricsError::Install(e.to_string()))?;

        register_metrics();
        self.started = true;

        tracing::info!(addr = %self.addr, "Metrics server started");
        Ok(())
    }

    /// Whether the exporter is running.
    #[must_use]
    pub const fn is_started(&self) -> bool {
        self.started
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(PURCHASES_CREATED, "Purchases committed with their tickets");
    describe_counter!(
        PURCHASES_REJECTED,
        "Purchases that failed validation, inventory or persistence"
    );
    describe_counter!(TICKETS_CLAIMED, "Tickets marked sold");
    describe_counter!(TICKETS_RELEASED, "Tickets returned to the pool by cancellations");
    describe_counter!(NOTIFICATIONS_SENT, "Purchase notifications delivered");
    describe_counter!(NOTIFICATIONS_FAILED, "Purchase notifications that failed or timed out");
    describe_counter!(NOTIFICATIONS_DROPPED, "Purchase notifications dropped by a full queue");
}
