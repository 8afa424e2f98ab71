//! Persistence for polls, options, votes and the accounts voters may log in
//! with.
//!
//! Writes that need locking live in `slotvote-core`; this crate owns the
//! schema, the entities and the plain read paths.

pub mod entities;
pub mod migrations;
pub mod repositories;
pub mod test_utils;

use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use slotvote_common::{AppError, config::DatabaseConfig};
use tracing::{info, log::LevelFilter};

use crate::migrations::Migrator;

/// Headroom on top of the lock timeout for a booking to get a pooled
/// connection.
const ACQUIRE_HEADROOM: Duration = Duration::from_secs(5);

/// Pool options for the booking workload.
///
/// A booking may hold its connection for up to `lock_timeout_ms` while it
/// waits on a lock, so waiting for a free connection is bounded by that plus
/// [`ACQUIRE_HEADROOM`].
#[must_use]
pub fn connect_options(config: &DatabaseConfig) -> ConnectOptions {
    let mut opt = ConnectOptions::new(&config.url);
    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(Duration::from_secs(10))
        .acquire_timeout(Duration::from_millis(config.lock_timeout_ms) + ACQUIRE_HEADROOM)
        .idle_timeout(Duration::from_secs(600))
        .sqlx_logging(true)
        .sqlx_logging_level(LevelFilter::Debug);
    opt
}

/// Open the connection pool.
pub async fn init(config: &DatabaseConfig) -> Result<DatabaseConnection, AppError> {
    let db = Database::connect(connect_options(config))
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
    info!(
        max_connections = config.max_connections,
        lock_timeout_ms = config.lock_timeout_ms,
        "Database pool ready"
    );
    Ok(db)
}

/// Apply pending schema migrations.
pub async fn migrate(db: &DatabaseConnection) -> Result<(), AppError> {
    let pending = Migrator::get_pending_migrations(db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?
        .len();
    if pending == 0 {
        return Ok(());
    }

    Migrator::up(db, None)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
    info!(applied = pending, "Schema migrations applied");
    Ok(())
}
