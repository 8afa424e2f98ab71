//! Per-voter advisory locking.
//!
//! Serializes all booking attempts of one voter identity on one poll
//! (double submits, client retries) without blocking other voters. Uses
//! `pg_advisory_xact_lock`, so the lock is shared by every server process on
//! the same database and released when the transaction ends.

use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseTransaction, Statement};
use sha2::{Digest, Sha256};
use slotvote_common::{AppError, AppResult};
use tracing::debug;

/// Derive the 64-bit advisory lock key for a voter on a poll.
///
/// The identity is compared case-insensitively, matching how emails are
/// deduplicated.
#[must_use]
pub fn voter_lock_key(poll_id: &str, identity: &str) -> i64 {
    let digest = Sha256::new()
        .chain_update(poll_id.as_bytes())
        .chain_update(b":")
        .chain_update(identity.trim().to_lowercase().as_bytes())
        .finalize();

    let mut key = [0u8; 8];
    key.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(key)
}

/// Bound how long this transaction waits on any lock.
///
/// Past the timeout Postgres aborts the statement and the whole booking
/// rolls back.
pub async fn set_lock_timeout(txn: &DatabaseTransaction, timeout_ms: u64) -> AppResult<()> {
    txn.execute(Statement::from_string(
        DatabaseBackend::Postgres,
        format!("SET LOCAL lock_timeout = '{timeout_ms}ms'"),
    ))
    .await
    .map_err(|e| AppError::Database(e.to_string()))?;
    Ok(())
}

/// Take the transaction-scoped advisory lock for `(poll_id, identity)`.
pub async fn acquire_voter_lock(
    txn: &DatabaseTransaction,
    poll_id: &str,
    identity: &str,
) -> AppResult<()> {
    acquire_voter_locks(txn, poll_id, &[identity]).await
}

/// Take the advisory locks for several identities of one voter.
///
/// Keys are deduplicated and taken in ascending order, so two transactions
/// locking overlapping identity sets cannot deadlock on each other.
pub async fn acquire_voter_locks(
    txn: &DatabaseTransaction,
    poll_id: &str,
    identities: &[&str],
) -> AppResult<()> {
    let mut keys: Vec<i64> = identities
        .iter()
        .map(|identity| voter_lock_key(poll_id, identity))
        .collect();
    keys.sort_unstable();
    keys.dedup();

    for key in keys {
        debug!(poll_id = %poll_id, key, "Acquiring voter advisory lock");
        lock_key(txn, key).await?;
    }
    Ok(())
}

async fn lock_key(txn: &DatabaseTransaction, key: i64) -> AppResult<()> {
    txn.execute(Statement::from_sql_and_values(
        DatabaseBackend::Postgres,
        "SELECT pg_advisory_xact_lock($1)",
        [key.into()],
    ))
    .await
    .map_err(|e| AppError::Database(e.to_string()))?;
    Ok(())
}
