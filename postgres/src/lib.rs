//! `PostgreSQL` store for the raffle.
//!
//! [`PostgresRaffleStore`] implements every store trait from `raffle-core`:
//!
//! - the Ticket Pool Store (`lotteries`, `tickets` tables)
//! - the Reservation Engine (claim with `FOR UPDATE SKIP LOCKED`, release)
//! - the purchase repository (create + claim, status updates with release)
//! - the lock-free query layer (availability, leaderboard, owner search)
//!
//! Correctness under concurrent purchases comes from row-level locking inside
//! one transaction per operation; there is no application-level mutex.
//!
//! # Example
//!
//! ```no_run
//! use raffle_postgres::PostgresRaffleStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresRaffleStore::new("postgres://localhost/raffle").await?;
//! store.migrate().await?;
//! let lottery_id = store.open_lottery(10_000).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod purchases;
mod queries;
mod reservation;

pub use error::map_sqlx_error;

use raffle_core::error::{RaffleError, Result};
use raffle_core::types::LotteryId;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use uuid::Uuid;

/// Connection and locking options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of idle connections in the pool
    pub min_connections: u32,
    /// How long to wait for a free connection
    pub acquire_timeout: Duration,
    /// Connections idle longer than this are closed
    pub idle_timeout: Duration,
    /// Upper bound on waiting for a single row lock inside a claim or release
    pub lock_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            lock_timeout: Duration::from_secs(5),
        }
    }
}

/// `PostgreSQL`-backed raffle store.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct PostgresRaffleStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresRaffleStore {
    /// Connect with default [`StoreOptions`].
    ///
    /// # Errors
    ///
    /// Returns [`RaffleError::Transient`] if the database cannot be reached.
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::connect(database_url, &StoreOptions::default()).await
    }

    /// Connect with explicit options.
    ///
    /// # Errors
    ///
    /// Returns [`RaffleError::Transient`] if the database cannot be reached.
    pub async fn connect(database_url: &str, options: &StoreOptions) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(options.max_connections)
            .min_connections(options.min_connections)
            .acquire_timeout(options.acquire_timeout)
            .idle_timeout(options.idle_timeout)
            .connect(database_url)
            .await
            .map_err(map_sqlx_error)?;

        tracing::info!(
            max_connections = options.max_connections,
            "Connected to raffle database"
        );

        Ok(Self {
            pool,
            lock_timeout: options.lock_timeout,
        })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: StoreOptions::default().lock_timeout,
        }
    }

    /// Access the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`RaffleError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RaffleError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Create a new active lottery seeded with tickets `0..pool_size`.
    ///
    /// Any previously active lottery is deactivated in the same transaction,
    /// keeping the single-active invariant.
    ///
    /// # Errors
    ///
    /// Returns store failures; nothing is created on error.
    pub async fn open_lottery(&self, pool_size: u32) -> Result<LotteryId> {
        let lottery_id = LotteryId::new();
        let ids: Vec<Uuid> = (0..pool_size).map(|_| Uuid::new_v4()).collect();
        let numbers: Vec<i64> = (0..pool_size).map(i64::from).collect();

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        sqlx::query("UPDATE lotteries SET active = FALSE WHERE active")
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        sqlx::query("INSERT INTO lotteries (id, active) VALUES ($1, TRUE)")
            .bind(lottery_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        sqlx::query(
            r"
            INSERT INTO tickets (id, lottery_id, number, status)
            SELECT t.id, $1, t.number, 'available'
            FROM UNNEST($2::uuid[], $3::bigint[]) AS t(id, number)
            ",
        )
        .bind(lottery_id.as_uuid())
        .bind(&ids)
        .bind(&numbers)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;

        tracing::info!(lottery_id = %lottery_id, pool_size, "Lottery opened");
        Ok(lottery_id)
    }

    /// Bound row-lock waits for the current transaction.
    async fn set_lock_timeout(&self, conn: &mut sqlx::PgConnection) -> Result<()> {
        // SET does not take bind parameters; the value is an integer we own.
        let statement = format!("SET LOCAL lock_timeout = {}", self.lock_timeout.as_millis());
        sqlx::query(&statement)
            .execute(conn)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}
