//! Reservation Engine: atomic claim and idempotent release of tickets.
//!
//! Both entry points are also used by the purchase repository inside its own
//! transaction, which is why the work is done by functions that take a
//! connection rather than by the trait methods directly.

use crate::{PostgresRaffleStore, map_sqlx_error};
use raffle_core::error::{RaffleError, Result};
use raffle_core::store::{ReservationEngine, StoreFuture};
use raffle_core::types::{
    LotteryId, PurchaseId, Ticket, TicketId, TicketNumber, TicketStatus, UserId,
};
use raffle_core::validation::check_claim;
use sqlx::PgConnection;
use uuid::Uuid;

/// SQLSTATE raised by `FOR UPDATE NOWAIT` on a row another transaction holds.
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// Convert a stored ticket number back into the domain type.
pub(crate) fn ticket_number(raw: i64) -> Result<TicketNumber> {
    u32::try_from(raw)
        .map(TicketNumber::new)
        .map_err(|_| RaffleError::Database(format!("ticket number out of range: {raw}")))
}

fn sold_ticket(
    lottery_id: LotteryId,
    user_id: UserId,
    purchase_id: PurchaseId,
    id: Uuid,
    number: i64,
) -> Result<Ticket> {
    Ok(Ticket {
        id: TicketId::from_uuid(id),
        lottery_id,
        number: ticket_number(number)?,
        status: TicketStatus::Sold,
        user_id: Some(user_id),
        purchase_id: Some(purchase_id),
    })
}

/// Claim tickets on an open transaction.
///
/// The caller owns the transaction: on `Err` it must roll back (dropping a
/// `sqlx::Transaction` does), so a failed claim never leaves rows sold.
pub(crate) async fn claim_in(
    conn: &mut PgConnection,
    lottery_id: LotteryId,
    user_id: UserId,
    purchase_id: PurchaseId,
    explicit: &[TicketNumber],
    quantity: u32,
) -> Result<Vec<Ticket>> {
    check_claim(explicit, quantity)?;

    let mut assigned = Vec::with_capacity(quantity as usize);

    // Explicit numbers: lock in ascending order with NOWAIT so overlapping
    // selections never wait on each other. A user-chosen number has no
    // substitute, so a row held by another claim is a lost race.
    let mut ordered = explicit.to_vec();
    ordered.sort_unstable();

    let mut explicit_ids = Vec::with_capacity(ordered.len());
    for number in ordered {
        let id: Option<Uuid> = sqlx::query_scalar(
            r"
            SELECT id
            FROM tickets
            WHERE lottery_id = $1 AND number = $2 AND status = 'available'
            FOR UPDATE NOWAIT
            ",
        )
        .bind(lottery_id.as_uuid())
        .bind(i64::from(number.get()))
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| explicit_lock_error(e, number))?;

        let Some(id) = id else {
            tracing::debug!(
                lottery_id = %lottery_id,
                purchase_id = %purchase_id,
                number = %number,
                "Explicit ticket unavailable"
            );
            return Err(RaffleError::TicketUnavailable { number });
        };
        explicit_ids.push(id);
    }

    if !explicit_ids.is_empty() {
        let mut rows = sell(&mut *conn, user_id, purchase_id, &explicit_ids).await?;
        // Hand the explicit tickets back in the order the buyer chose them.
        rows.sort_by_key(|&(_, raw)| {
            explicit
                .iter()
                .position(|n| i64::from(n.get()) == raw)
                .unwrap_or(usize::MAX)
        });
        for (id, number_raw) in rows {
            assigned.push(sold_ticket(lottery_id, user_id, purchase_id, id, number_raw)?);
        }
    }

    // Random fill: rows locked by concurrent claims are skipped, not waited on,
    // so unrelated purchases proceed in parallel on disjoint tickets.
    #[allow(clippy::cast_possible_truncation)] // bounded by quantity (u32)
    let remaining = quantity - explicit.len() as u32;
    if remaining > 0 {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r"
            SELECT id
            FROM tickets
            WHERE lottery_id = $1 AND status = 'available'
            ORDER BY random()
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            ",
        )
        .bind(lottery_id.as_uuid())
        .bind(i64::from(remaining))
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

        if ids.len() < remaining as usize {
            #[allow(clippy::cast_possible_truncation)] // ids.len() < remaining
            let available = ids.len() as u32;
            tracing::debug!(
                lottery_id = %lottery_id,
                purchase_id = %purchase_id,
                requested = remaining,
                available,
                "Not enough tickets for random fill"
            );
            return Err(RaffleError::InsufficientTickets {
                requested: remaining,
                available,
            });
        }

        let rows = sell(&mut *conn, user_id, purchase_id, &ids).await?;
        for (id, number_raw) in rows {
            assigned.push(sold_ticket(lottery_id, user_id, purchase_id, id, number_raw)?);
        }
    }

    Ok(assigned)
}

/// A row lock held by another claim means the explicit number is taken.
fn explicit_lock_error(err: sqlx::Error, number: TicketNumber) -> RaffleError {
    let lock_held = matches!(
        &err,
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(LOCK_NOT_AVAILABLE)
    );
    if lock_held {
        RaffleError::TicketUnavailable { number }
    } else {
        map_sqlx_error(err)
    }
}

/// Mark rows already locked by this transaction as sold.
async fn sell(
    conn: &mut PgConnection,
    user_id: UserId,
    purchase_id: PurchaseId,
    ids: &[Uuid],
) -> Result<Vec<(Uuid, i64)>> {
    let rows: Vec<(Uuid, i64)> = sqlx::query_as(
        r"
        UPDATE tickets
        SET status = 'sold', user_id = $1, purchase_id = $2
        WHERE id = ANY($3)
        RETURNING id, number
        ",
    )
    .bind(user_id.as_uuid())
    .bind(purchase_id.as_uuid())
    .bind(ids)
    .fetch_all(conn)
    .await
    .map_err(map_sqlx_error)?;

    if rows.len() != ids.len() {
        return Err(RaffleError::Database(format!(
            "locked {} tickets but updated {}",
            ids.len(),
            rows.len()
        )));
    }
    Ok(rows)
}

/// Return every ticket of `purchase_id` to the pool on an open transaction.
pub(crate) async fn release_in(conn: &mut PgConnection, purchase_id: PurchaseId) -> Result<u64> {
    let result = sqlx::query(
        r"
        UPDATE tickets
        SET status = 'available', user_id = NULL, purchase_id = NULL
        WHERE purchase_id = $1
        ",
    )
    .bind(purchase_id.as_uuid())
    .execute(conn)
    .await
    .map_err(map_sqlx_error)?;

    Ok(result.rows_affected())
}

impl ReservationEngine for PostgresRaffleStore {
    fn claim_tickets<'a>(
        &'a self,
        lottery_id: LotteryId,
        user_id: UserId,
        purchase_id: PurchaseId,
        explicit: &'a [TicketNumber],
        quantity: u32,
    ) -> StoreFuture<'a, Vec<Ticket>> {
        Box::pin(async move {
            check_claim(explicit, quantity)?;

            let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
            self.set_lock_timeout(&mut *tx).await?;

            let tickets = claim_in(&mut *tx, lottery_id, user_id, purchase_id, explicit, quantity).await?;

            tx.commit().await.map_err(map_sqlx_error)?;
            Ok(tickets)
        })
    }

    fn release_tickets(&self, purchase_id: PurchaseId) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
            self.set_lock_timeout(&mut *tx).await?;

            let released = release_in(&mut *tx, purchase_id).await?;

            tx.commit().await.map_err(map_sqlx_error)?;

            tracing::debug!(purchase_id = %purchase_id, released, "Tickets released");
            Ok(released)
        })
    }
}
