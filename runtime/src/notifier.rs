//! Background notification queue.
//!
//! Purchases are handed to a bounded channel after they commit and a single
//! worker task delivers them through the [`Mailer`]. The hand-off never
//! waits: a full queue drops the notification with a warning. Each delivery
//! runs under its own timeout, and failures are logged and counted, never
//! retried and never reported to the buyer.

use crate::metrics::{NOTIFICATIONS_DROPPED, NOTIFICATIONS_FAILED, NOTIFICATIONS_SENT};
use raffle_core::environment::Mailer;
use raffle_core::error::NotifyError;
use raffle_core::types::Purchase;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Sending half of the notification queue.
///
/// Cheap to clone. Enqueueing is synchronous, so a cancelled request cannot
/// abort a notification it already handed off.
#[derive(Debug, Clone)]
pub struct NotificationQueue {
    sender: mpsc::Sender<Purchase>,
}

/// Handle to the worker task draining the queue.
///
/// Dropping it without calling [`NotificationWorker::shutdown`] also stops
/// intake; queued notifications are still delivered in the background.
#[derive(Debug)]
pub struct NotificationWorker {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl NotificationQueue {
    /// Spawn the worker and return the queue and its handle.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn start(
        mailer: Arc<dyn Mailer>,
        capacity: usize,
        send_timeout: Duration,
    ) -> (Self, NotificationWorker) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run_worker(mailer, receiver, shutdown_rx, send_timeout));

        (Self { sender }, NotificationWorker { shutdown, handle })
    }

    /// Queue a notification for `purchase`.
    ///
    /// Returns `false` if it was dropped because the queue is full or shut
    /// down.
    pub fn enqueue(&self, purchase: Purchase) -> bool {
        match self.sender.try_send(purchase) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(purchase)) => {
                metrics::counter!(NOTIFICATIONS_DROPPED, "reason" => "full").increment(1);
                tracing::warn!(
                    purchase_id = %purchase.id,
                    "Notification queue full, dropping notification"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(purchase)) => {
                metrics::counter!(NOTIFICATIONS_DROPPED, "reason" => "closed").increment(1);
                tracing::warn!(
                    purchase_id = %purchase.id,
                    "Notification queue closed, dropping notification"
                );
                false
            }
        }
    }
}

impl NotificationWorker {
    /// Stop accepting notifications and wait for the queued ones to be
    /// delivered, up to `deadline`.
    ///
    /// Returns `true` if the queue drained in time. On timeout the worker is
    /// aborted and the remaining notifications are lost.
    pub async fn shutdown(mut self, deadline: Duration) -> bool {
        // The worker may already be gone; nothing to signal then.
        let _ = self.shutdown.send(());

        if let Ok(joined) = tokio::time::timeout(deadline, &mut self.handle).await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "Notification worker panicked");
            }
            true
        } else {
            tracing::warn!(
                deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
                "Notification queue did not drain before deadline"
            );
            self.handle.abort();
            false
        }
    }
}

async fn run_worker(
    mailer: Arc<dyn Mailer>,
    mut receiver: mpsc::Receiver<Purchase>,
    mut shutdown: oneshot::Receiver<()>,
    send_timeout: Duration,
) {
    tracing::debug!("Notification worker started");

    loop {
        tokio::select! {
            message = receiver.recv() => match message {
                Some(purchase) => deliver(mailer.as_ref(), &purchase, send_timeout).await,
                None => return,
            },
            _ = &mut shutdown => break,
        }
    }

    // Refuse new work, then drain what is already queued.
    receiver.close();
    while let Some(purchase) = receiver.recv().await {
        deliver(mailer.as_ref(), &purchase, send_timeout).await;
    }

    tracing::debug!("Notification worker stopped");
}

async fn deliver(mailer: &dyn Mailer, purchase: &Purchase, send_timeout: Duration) {
    let result = match tokio::time::timeout(send_timeout, mailer.notify(purchase)).await {
        Ok(result) => result,
        Err(_) => Err(NotifyError::Timeout(send_timeout)),
    };

    match result {
        Ok(()) => {
            metrics::counter!(NOTIFICATIONS_SENT).increment(1);
            tracing::debug!(purchase_id = %purchase.id, "Purchase notification sent");
        }
        Err(err) => {
            metrics::counter!(NOTIFICATIONS_FAILED).increment(1);
            tracing::warn!(
                purchase_id = %purchase.id,
                error = %err,
                "Purchase notification failed"
            );
        }
    }
}
