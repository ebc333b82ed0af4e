//! PostgreSQL connection pooling and schema.
//!
//! All durable state lives in three tables:
//!
//! - `un_assigned_numbers` - the transactional resource pool. A row is
//!   AVAILABLE, or INUSE under a `ref_id` while reserved. Assigned numbers are
//!   deleted from it.
//! - `phonebook` - user → number ownership. `phone_number` is unique, so a
//!   number can never be owned twice.
//! - `sms` - message records keyed by idempotency key.

use crate::{Error, Result};
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

pub use sqlx::PgPool;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS un_assigned_numbers (
    phone_number TEXT PRIMARY KEY,
    area_code    BIGINT NOT NULL,
    status       TEXT NOT NULL DEFAULT 'AVAILABLE',
    ref_id       TEXT NULL
);
CREATE INDEX IF NOT EXISTS un_assigned_numbers_area_status
    ON un_assigned_numbers (area_code, status);
CREATE INDEX IF NOT EXISTS un_assigned_numbers_ref_id
    ON un_assigned_numbers (ref_id);

CREATE TABLE IF NOT EXISTS phonebook (
    user_id      BIGINT PRIMARY KEY,
    phone_number TEXT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS sms (
    idempotency_key   TEXT PRIMARY KEY,
    from_phone_number TEXT NULL,
    to_phone_number   TEXT NULL,
    content           TEXT NULL,
    status            TEXT NOT NULL DEFAULT 'PENDING',
    created_at        TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at        TIMESTAMPTZ NOT NULL DEFAULT now()
);
"#;

/// Database pool settings.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Opens a connection pool, testing connections before handing them out.
pub async fn connect(database_url: &str, config: &DbConfig) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .test_before_acquire(true)
        .connect(database_url)
        .await
        .map_err(|e| Error::store("postgres connect", e))
}

/// Creates every table and index if missing. Safe to run on each start.
pub async fn ensure_schema(db: &PgPool) -> Result<()> {
    sqlx::raw_sql(SCHEMA)
        .execute(db)
        .await
        .map_err(|e| Error::store("ensure schema", e))?;
    Ok(())
}
