use anyhow::{Context, Result};
use sqlx::SqlitePool;

use super::models::{Account, AccountState, HistoryEntry, NewAccount, ProfileRow, UsedThread};

// ========== Accounts ==========

/// List all accounts in creation order.
pub async fn list_accounts(pool: &SqlitePool) -> Result<Vec<Account>> {
    sqlx::query_as("SELECT * FROM accounts ORDER BY id ASC")
        .fetch_all(pool)
        .await
        .context("Failed to list accounts")
}

/// Get an account by id.
pub async fn get_account(pool: &SqlitePool, id: i64) -> Result<Option<Account>> {
    sqlx::query_as("SELECT * FROM accounts WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch account")
}

/// Insert a new account, returning its id.
pub async fn insert_account(pool: &SqlitePool, account: &NewAccount) -> Result<i64> {
    let name = account
        .remark
        .as_deref()
        .or(account.name.as_deref())
        .or(account.username.as_deref())
        .unwrap_or("account")
        .to_string();

    let result = sqlx::query(
        r"
        INSERT INTO accounts (name, username, password, cookie_string, base_url, user_agent, remark)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(name)
    .bind(&account.username)
    .bind(&account.password)
    .bind(&account.cookie_string)
    .bind(&account.base_url)
    .bind(&account.user_agent)
    .bind(&account.remark)
    .execute(pool)
    .await
    .context("Failed to insert account")?;

    Ok(result.last_insert_rowid())
}

/// Update an account's editable fields.
pub async fn update_account(pool: &SqlitePool, id: i64, updates: &NewAccount) -> Result<()> {
    sqlx::query(
        r"
        UPDATE accounts
        SET username = ?, password = ?, cookie_string = ?, base_url = ?,
            user_agent = ?, remark = ?, updated_at = datetime('now')
        WHERE id = ?
        ",
    )
    .bind(&updates.username)
    .bind(&updates.password)
    .bind(&updates.cookie_string)
    .bind(&updates.base_url)
    .bind(&updates.user_agent)
    .bind(&updates.remark)
    .bind(id)
    .execute(pool)
    .await
    .context("Failed to update account")?;

    Ok(())
}

/// Delete an account and its cascaded state/history rows.
pub async fn delete_account(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM accounts WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to delete account")?;

    Ok(())
}

// ========== State & History ==========

/// Record a login attempt outcome: one history row plus the state upsert.
pub async fn record_account_login(pool: &SqlitePool, account_id: i64, ok: bool) -> Result<()> {
    sqlx::query("INSERT INTO account_history (account_id, action, ok, msg) VALUES (?, 'login', ?, '')")
        .bind(account_id)
        .bind(ok)
        .execute(pool)
        .await
        .context("Failed to insert login history")?;

    sqlx::query(
        r"
        INSERT INTO account_state (account_id, last_login_ok, last_login_at)
        VALUES (?, ?, datetime('now'))
        ON CONFLICT(account_id) DO UPDATE SET
            last_login_ok = excluded.last_login_ok,
            last_login_at = excluded.last_login_at
        ",
    )
    .bind(account_id)
    .bind(ok)
    .execute(pool)
    .await
    .context("Failed to upsert login state")?;

    Ok(())
}

/// Record a check-in attempt outcome.
pub async fn record_account_checkin(
    pool: &SqlitePool,
    account_id: i64,
    ok: bool,
    msg: &str,
) -> Result<()> {
    sqlx::query("INSERT INTO account_history (account_id, action, ok, msg) VALUES (?, 'checkin', ?, ?)")
        .bind(account_id)
        .bind(ok)
        .bind(msg)
        .execute(pool)
        .await
        .context("Failed to insert checkin history")?;

    sqlx::query(
        r"
        INSERT INTO account_state (account_id, last_checkin_ok, last_checkin_msg, last_checkin_at)
        VALUES (?, ?, ?, datetime('now'))
        ON CONFLICT(account_id) DO UPDATE SET
            last_checkin_ok = excluded.last_checkin_ok,
            last_checkin_msg = excluded.last_checkin_msg,
            last_checkin_at = excluded.last_checkin_at
        ",
    )
    .bind(account_id)
    .bind(ok)
    .bind(msg)
    .execute(pool)
    .await
    .context("Failed to upsert checkin state")?;

    Ok(())
}

/// Get the latest recorded state for an account.
pub async fn get_account_state(pool: &SqlitePool, account_id: i64) -> Result<Option<AccountState>> {
    sqlx::query_as("SELECT * FROM account_state WHERE account_id = ?")
        .bind(account_id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch account state")
}

/// Get the most recent history entries for an account.
pub async fn get_account_history(
    pool: &SqlitePool,
    account_id: i64,
    limit: i64,
) -> Result<Vec<HistoryEntry>> {
    sqlx::query_as(
        "SELECT * FROM account_history WHERE account_id = ? ORDER BY id DESC LIMIT ?",
    )
    .bind(account_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("Failed to fetch account history")
}

// ========== Profile ==========

/// Store the latest profile snapshot for an account.
pub async fn upsert_profile(
    pool: &SqlitePool,
    account_id: i64,
    user_group: Option<&str>,
    points: Option<i64>,
    money: Option<i64>,
    secoin: Option<i64>,
    score: Option<i64>,
) -> Result<()> {
    sqlx::query(
        r"
        INSERT INTO account_profile (account_id, user_group, points, money, secoin, score, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, datetime('now'))
        ON CONFLICT(account_id) DO UPDATE SET
            user_group = excluded.user_group,
            points = excluded.points,
            money = excluded.money,
            secoin = excluded.secoin,
            score = excluded.score,
            updated_at = excluded.updated_at
        ",
    )
    .bind(account_id)
    .bind(user_group)
    .bind(points)
    .bind(money)
    .bind(secoin)
    .bind(score)
    .execute(pool)
    .await
    .context("Failed to upsert profile")?;

    Ok(())
}

/// Get the stored profile snapshot for an account.
pub async fn get_profile(pool: &SqlitePool, account_id: i64) -> Result<Option<ProfileRow>> {
    sqlx::query_as("SELECT * FROM account_profile WHERE account_id = ?")
        .bind(account_id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch profile")
}

// ========== Used threads ==========

/// Membership test for the used-thread ledger.
pub async fn has_used_thread(pool: &SqlitePool, fid: u64, tid: u64) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM used_threads WHERE fid = ? AND tid = ?")
        .bind(fid as i64)
        .bind(tid as i64)
        .fetch_optional(pool)
        .await
        .context("Failed to query used thread")?;

    Ok(row.is_some())
}

/// Mark a thread as used.
///
/// Idempotent: re-marking an existing `(fid, tid)` pair is a no-op. Returns
/// whether this call inserted the row, so a caller that lost a concurrent
/// race can tell its pick was not actually novel.
pub async fn mark_thread_used(pool: &SqlitePool, fid: u64, tid: u64, url: &str) -> Result<bool> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO used_threads (fid, tid, url) VALUES (?, ?, ?)",
    )
    .bind(fid as i64)
    .bind(tid as i64)
    .bind(url)
    .execute(pool)
    .await
    .context("Failed to mark thread used")?;

    Ok(result.rows_affected() > 0)
}

/// Most recently used threads, newest first.
pub async fn list_recent_used_threads(pool: &SqlitePool, limit: i64) -> Result<Vec<UsedThread>> {
    sqlx::query_as(
        "SELECT fid, tid, url, used_at FROM used_threads ORDER BY id DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("Failed to list used threads")
}
