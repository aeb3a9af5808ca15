//! Purchase repository: creation with ticket claims, lifecycle transitions
//! with ticket release, admin listing and leaderboard.

use crate::reservation::{claim_in, release_in, ticket_number};
use crate::{PostgresRaffleStore, map_sqlx_error};
use chrono::{DateTime, Utc};
use raffle_core::error::{RaffleError, Result};
use raffle_core::store::{PurchaseRepository, StoreFuture};
use raffle_core::types::{
    LeaderboardEntry, LotteryId, Page, PaymentMeta, Purchase, PurchaseId, PurchaseListing,
    PurchaseStatus, PurchaseSummary, StatusChange, Ticket, TicketNumber, UserContact, UserId,
};
use raffle_core::validation::check_claim;
use sqlx::Row;
use sqlx::postgres::PgRow;

fn decode_purchase(row: &PgRow) -> std::result::Result<Purchase, sqlx::Error> {
    let quantity: i32 = row.try_get("quantity")?;
    let status: String = row.try_get("status")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;

    Ok(Purchase {
        id: PurchaseId::from_uuid(row.try_get("purchase_id")?),
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        quantity: u32::try_from(quantity).unwrap_or_default(),
        payment: PaymentMeta {
            amount_bs: row.try_get("amount_bs")?,
            amount_usd: row.try_get("amount_usd")?,
            method: row.try_get("payment_method")?,
            reference_digits: row.try_get("reference_digits")?,
        },
        payment_proof: row.try_get("payment_proof")?,
        status: PurchaseStatus::parse(&status)
            .map_err(|e| sqlx::Error::Decode(e.to_string().into()))?,
        created_at,
    })
}

fn decode_contact(row: &PgRow) -> std::result::Result<UserContact, sqlx::Error> {
    Ok(UserContact {
        id: UserId::from_uuid(row.try_get("user_id")?),
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
    })
}

pub(crate) fn decode_numbers(raw: Vec<i64>) -> Result<Vec<TicketNumber>> {
    raw.into_iter().map(ticket_number).collect()
}

impl PurchaseRepository for PostgresRaffleStore {
    fn create_with_tickets<'a>(
        &'a self,
        lottery_id: LotteryId,
        purchase: &'a Purchase,
        explicit: &'a [TicketNumber],
    ) -> StoreFuture<'a, Vec<Ticket>> {
        Box::pin(async move {
            check_claim(explicit, purchase.quantity)?;
            let quantity = i32::try_from(purchase.quantity)
                .map_err(|_| RaffleError::Validation("quantity too large".to_string()))?;

            let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
            self.set_lock_timeout(&mut *tx).await?;

            sqlx::query(
                r"
                INSERT INTO purchases (
                    id, user_id, quantity, amount_bs, amount_usd, payment_method,
                    reference_digits, payment_proof, status, created_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ",
            )
            .bind(purchase.id.as_uuid())
            .bind(purchase.user_id.as_uuid())
            .bind(quantity)
            .bind(purchase.payment.amount_bs)
            .bind(purchase.payment.amount_usd)
            .bind(&purchase.payment.method)
            .bind(&purchase.payment.reference_digits)
            .bind(&purchase.payment_proof)
            .bind(PurchaseStatus::Pending.as_str())
            .bind(purchase.created_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

            // Dropping `tx` on any error below rolls back the insert as well.
            let tickets = claim_in(
                &mut *tx,
                lottery_id,
                purchase.user_id,
                purchase.id,
                explicit,
                purchase.quantity,
            )
            .await?;

            tx.commit().await.map_err(map_sqlx_error)?;

            tracing::debug!(
                purchase_id = %purchase.id,
                lottery_id = %lottery_id,
                tickets = tickets.len(),
                "Purchase persisted with tickets"
            );

            Ok(tickets)
        })
    }

    fn update_status(
        &self,
        purchase_id: PurchaseId,
        status: PurchaseStatus,
    ) -> StoreFuture<'_, StatusChange> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
            self.set_lock_timeout(&mut *tx).await?;

            // Lock the purchase row so concurrent admin updates serialize.
            let current: Option<String> =
                sqlx::query_scalar("SELECT status FROM purchases WHERE id = $1 FOR UPDATE")
                    .bind(purchase_id.as_uuid())
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(map_sqlx_error)?;

            let previous = match current {
                Some(raw) => PurchaseStatus::parse(&raw)
                    .map_err(|_| RaffleError::Database(format!("Invalid purchase status: {raw}")))?,
                None => return Err(RaffleError::PurchaseNotFound(purchase_id)),
            };

            if !previous.can_transition_to(status) {
                return Err(RaffleError::InvalidTransition {
                    from: previous,
                    to: status,
                });
            }

            if previous != status {
                sqlx::query("UPDATE purchases SET status = $1 WHERE id = $2")
                    .bind(status.as_str())
                    .bind(purchase_id.as_uuid())
                    .execute(&mut *tx)
                    .await
                    .map_err(map_sqlx_error)?;
            }

            // Runs again on a repeated cancellation; release is idempotent.
            let released = if status == PurchaseStatus::Cancelled {
                release_in(&mut *tx, purchase_id)
                    .await
                    .map_err(|e| RaffleError::Compensation {
                        purchase_id,
                        reason: e.to_string(),
                    })?
            } else {
                0
            };

            tx.commit().await.map_err(|e| match status {
                PurchaseStatus::Cancelled => RaffleError::Compensation {
                    purchase_id,
                    reason: e.to_string(),
                },
                _ => map_sqlx_error(e),
            })?;

            Ok(StatusChange {
                previous,
                current: status,
                released,
            })
        })
    }

    fn get_purchase(&self, purchase_id: PurchaseId) -> StoreFuture<'_, Option<Purchase>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT id AS purchase_id, user_id, quantity, amount_bs, amount_usd,
                       payment_method, reference_digits, payment_proof, status, created_at
                FROM purchases
                WHERE id = $1
                ",
            )
            .bind(purchase_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            row.as_ref()
                .map(decode_purchase)
                .transpose()
                .map_err(map_sqlx_error)
        })
    }

    fn list_purchases(
        &self,
        status: Option<PurchaseStatus>,
        page: Page,
    ) -> StoreFuture<'_, PurchaseListing> {
        Box::pin(async move {
            let status_filter = status.map(|s| s.as_str());

            let total: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM purchases WHERE ($1::text IS NULL OR status = $1)",
            )
            .bind(status_filter)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            #[allow(clippy::cast_possible_wrap)] // page bounds are small
            let rows = sqlx::query(
                r"
                SELECT u.id AS user_id, u.name, u.email, u.phone,
                       p.id AS purchase_id, p.quantity, p.amount_bs, p.amount_usd,
                       p.payment_method, p.reference_digits, p.payment_proof,
                       p.status, p.created_at,
                       COALESCE(
                           ARRAY_AGG(t.number ORDER BY t.number)
                               FILTER (WHERE t.number IS NOT NULL),
                           '{}'
                       ) AS numbers
                FROM purchases p
                JOIN users u ON u.id = p.user_id
                LEFT JOIN tickets t ON t.purchase_id = p.id
                WHERE ($1::text IS NULL OR p.status = $1)
                GROUP BY u.id, p.id
                ORDER BY p.created_at DESC, p.id
                LIMIT $2 OFFSET $3
                ",
            )
            .bind(status_filter)
            .bind(page.limit() as i64)
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            let mut summaries = Vec::with_capacity(rows.len());
            for row in &rows {
                let numbers: Vec<i64> = row.try_get("numbers").map_err(map_sqlx_error)?;
                summaries.push(PurchaseSummary {
                    user: decode_contact(row).map_err(map_sqlx_error)?,
                    purchase: decode_purchase(row).map_err(map_sqlx_error)?,
                    numbers: decode_numbers(numbers)?,
                });
            }

            Ok(PurchaseListing {
                rows: summaries,
                total: u64::try_from(total).unwrap_or_default(),
            })
        })
    }

    fn leaderboard(&self, page: Page) -> StoreFuture<'_, Vec<LeaderboardEntry>> {
        Box::pin(async move {
            // Only verified purchases count; pending and cancelled never do.
            #[allow(clippy::cast_possible_wrap)] // page bounds are small
            let rows = sqlx::query(
                r"
                SELECT u.id AS user_id, u.name, u.email, u.phone,
                       SUM(p.quantity)::bigint AS quantity
                FROM purchases p
                JOIN users u ON u.id = p.user_id
                WHERE p.status = 'verified'
                GROUP BY u.id, u.name, u.email, u.phone
                ORDER BY quantity DESC, u.id
                LIMIT $1 OFFSET $2
                ",
            )
            .bind(page.limit() as i64)
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            rows.iter()
                .map(|row| {
                    let quantity: i64 = row.try_get("quantity")?;
                    Ok(LeaderboardEntry {
                        user: decode_contact(row)?,
                        quantity: u64::try_from(quantity).unwrap_or_default(),
                    })
                })
                .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
                .map_err(map_sqlx_error)
        })
    }
}

impl PostgresRaffleStore {
    /// Ticket numbers currently attached to `purchase_id`, ascending.
    ///
    /// # Errors
    ///
    /// Returns store failures.
    pub async fn purchase_tickets(&self, purchase_id: PurchaseId) -> Result<Vec<TicketNumber>> {
        let numbers: Vec<i64> =
            sqlx::query_scalar("SELECT number FROM tickets WHERE purchase_id = $1 ORDER BY number")
                .bind(purchase_id.as_uuid())
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        decode_numbers(numbers)
    }

    /// Insert or refresh a buyer's contact row.
    ///
    /// Users belong to the authentication service; this exists for seeding
    /// and tests.
    ///
    /// # Errors
    ///
    /// Returns store failures.
    pub async fn upsert_user(&self, user: &UserContact) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO users (id, name, email, phone)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name, email = EXCLUDED.email, phone = EXCLUDED.phone
            ",
        )
        .bind(user.id.as_uuid())
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.phone)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}
