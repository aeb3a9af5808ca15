//! Active-lottery resolution and the read-only ticket queries.
//!
//! None of these take row locks. Under concurrent claims they observe a
//! committed snapshot and may be stale by the time the caller acts on them.

use crate::purchases::decode_numbers;
use crate::{PostgresRaffleStore, map_sqlx_error};
use raffle_core::error::RaffleError;
use raffle_core::store::{LotteryResolver, StoreFuture, TicketQuery};
use raffle_core::types::{LotteryId, TicketNumber, TicketOwner, UserContact, UserId};
use sqlx::Row;
use uuid::Uuid;

impl LotteryResolver for PostgresRaffleStore {
    fn active_lottery(&self) -> StoreFuture<'_, LotteryId> {
        Box::pin(async move {
            let id: Option<Uuid> =
                sqlx::query_scalar("SELECT id FROM lotteries WHERE active LIMIT 1")
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;

            id.map(LotteryId::from_uuid)
                .ok_or(RaffleError::NoActiveLottery)
        })
    }
}

impl TicketQuery for PostgresRaffleStore {
    fn availability_percentage(&self, lottery_id: LotteryId) -> StoreFuture<'_, f64> {
        Box::pin(async move {
            let (sold, total): (i64, i64) = sqlx::query_as(
                r"
                SELECT COUNT(*) FILTER (WHERE status = 'sold'), COUNT(*)
                FROM tickets
                WHERE lottery_id = $1
                ",
            )
            .bind(lottery_id.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            Ok(percentage(sold, total))
        })
    }

    fn unavailable_numbers<'a>(
        &'a self,
        lottery_id: LotteryId,
        candidates: &'a [TicketNumber],
    ) -> StoreFuture<'a, Vec<TicketNumber>> {
        Box::pin(async move {
            if candidates.is_empty() {
                return Ok(Vec::new());
            }

            let raw: Vec<i64> = candidates.iter().map(|n| i64::from(n.get())).collect();

            // Numbers outside the pool have no row and are reported too.
            let free: Vec<i64> = sqlx::query_scalar(
                r"
                SELECT number
                FROM tickets
                WHERE lottery_id = $1 AND number = ANY($2) AND status = 'available'
                ",
            )
            .bind(lottery_id.as_uuid())
            .bind(&raw)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            Ok(candidates
                .iter()
                .filter(|n| !free.contains(&i64::from(n.get())))
                .copied()
                .collect())
        })
    }

    fn user_tickets(
        &self,
        lottery_id: LotteryId,
        user_id: UserId,
    ) -> StoreFuture<'_, Vec<TicketNumber>> {
        Box::pin(async move {
            let numbers: Vec<i64> = sqlx::query_scalar(
                r"
                SELECT number
                FROM tickets
                WHERE lottery_id = $1 AND user_id = $2 AND status = 'sold'
                ORDER BY number
                ",
            )
            .bind(lottery_id.as_uuid())
            .bind(user_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            decode_numbers(numbers)
        })
    }

    fn find_owner(
        &self,
        lottery_id: LotteryId,
        number: TicketNumber,
    ) -> StoreFuture<'_, Option<TicketOwner>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT u.id, u.name, u.email, u.phone,
                       ARRAY(
                           SELECT o.number
                           FROM tickets o
                           WHERE o.lottery_id = t.lottery_id
                             AND o.user_id = t.user_id
                             AND o.status = 'sold'
                           ORDER BY o.number
                       ) AS numbers
                FROM tickets t
                JOIN users u ON u.id = t.user_id
                WHERE t.lottery_id = $1 AND t.number = $2 AND t.status = 'sold'
                ",
            )
            .bind(lottery_id.as_uuid())
            .bind(i64::from(number.get()))
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            let Some(row) = row else {
                return Ok(None);
            };

            let user = UserContact {
                id: UserId::from_uuid(row.try_get("id").map_err(map_sqlx_error)?),
                name: row.try_get("name").map_err(map_sqlx_error)?,
                email: row.try_get("email").map_err(map_sqlx_error)?,
                phone: row.try_get("phone").map_err(map_sqlx_error)?,
            };
            let numbers: Vec<i64> = row.try_get("numbers").map_err(map_sqlx_error)?;

            Ok(Some(TicketOwner {
                user,
                numbers: decode_numbers(numbers)?,
            }))
        })
    }
}

#[allow(clippy::cast_precision_loss)] // ticket counts are far below 2^52
fn percentage(sold: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    sold as f64 / total as f64 * 100.0
}
