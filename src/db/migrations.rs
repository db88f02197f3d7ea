use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::debug;

/// Run all pending migrations.
pub async fn run(pool: &SqlitePool) -> Result<()> {
    create_migration_table(pool).await?;
    let current_version = get_schema_version(pool).await?;

    if current_version < 1 {
        debug!("Running migration v1");
        run_migration_v1(pool).await?;
        set_schema_version(pool, 1).await?;
    }

    if current_version < 2 {
        debug!("Running migration v2");
        run_migration_v2(pool).await?;
        set_schema_version(pool, 2).await?;
    }

    Ok(())
}

async fn create_migration_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS _schema_version (
            version INTEGER PRIMARY KEY
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create schema version table")?;

    Ok(())
}

async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let row: Option<(i32,)> = sqlx::query_as("SELECT version FROM _schema_version LIMIT 1")
        .fetch_optional(pool)
        .await
        .context("Failed to get schema version")?;

    Ok(row.map_or(0, |(v,)| v))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("DELETE FROM _schema_version")
        .execute(pool)
        .await?;
    sqlx::query("INSERT INTO _schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

async fn run_migration_v1(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v1: creating initial schema");

    // Forum accounts, credential- or cookie-based
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS accounts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            username TEXT,
            password TEXT,
            cookie_string TEXT,
            base_url TEXT,
            user_agent TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create accounts table")?;

    // Latest login/check-in outcome per account
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS account_state (
            account_id INTEGER PRIMARY KEY,
            last_login_ok INTEGER,
            last_login_at TEXT,
            last_checkin_ok INTEGER,
            last_checkin_msg TEXT,
            last_checkin_at TEXT,
            FOREIGN KEY(account_id) REFERENCES accounts(id) ON DELETE CASCADE
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create account_state table")?;

    // Append-only action log per account
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS account_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id INTEGER NOT NULL,
            action TEXT NOT NULL,
            ok INTEGER NOT NULL,
            msg TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY(account_id) REFERENCES accounts(id) ON DELETE CASCADE
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create account_history table")?;

    // Profile snapshot scraped from the member space page
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS account_profile (
            account_id INTEGER PRIMARY KEY,
            user_group TEXT,
            points INTEGER,
            money INTEGER,
            secoin INTEGER,
            score INTEGER,
            updated_at TEXT,
            FOREIGN KEY(account_id) REFERENCES accounts(id) ON DELETE CASCADE
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create account_profile table")?;

    // Threads already replied to. The UNIQUE(fid, tid) constraint is the
    // authoritative dedup: concurrent selections racing on the same thread
    // resolve here, not in application code.
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS used_threads (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            fid INTEGER NOT NULL,
            tid INTEGER NOT NULL,
            url TEXT,
            used_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(fid, tid)
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create used_threads table")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_history_account ON account_history(account_id)")
        .execute(pool)
        .await
        .context("Failed to create account_history index")?;

    Ok(())
}

async fn run_migration_v2(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v2: adding accounts.remark");

    sqlx::query("ALTER TABLE accounts ADD COLUMN remark TEXT")
        .execute(pool)
        .await
        .context("Failed to add remark column")?;

    Ok(())
}
