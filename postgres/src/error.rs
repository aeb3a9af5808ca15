//! Mapping from sqlx failures to the raffle error taxonomy.

use raffle_core::error::RaffleError;

/// SQLSTATE codes that mean "try the whole transaction again".
const RETRYABLE_SQLSTATES: &[&str] = &[
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "55P03", // lock_not_available (lock_timeout)
    "57014", // query_canceled (statement_timeout)
];

/// Classify a sqlx error as transient or permanent.
///
/// Connection-level failures and lock/serialization conflicts become
/// [`RaffleError::Transient`]; everything else is [`RaffleError::Database`].
#[must_use]
#[allow(clippy::needless_pass_by_value)] // used as `map_err(map_sqlx_error)`
pub fn map_sqlx_error(err: sqlx::Error) -> RaffleError {
    match &err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code();
            if code.as_deref().is_some_and(|c| RETRYABLE_SQLSTATES.contains(&c)) {
                RaffleError::Transient(err.to_string())
            } else {
                RaffleError::Database(err.to_string())
            }
        }
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => RaffleError::Transient(err.to_string()),
        _ => RaffleError::Database(err.to_string()),
    }
}
