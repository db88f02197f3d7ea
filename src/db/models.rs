use serde::{Deserialize, Serialize};

/// A forum account managed by the bot.
///
/// Either `username`/`password` or `cookie_string` must be present; cookie
/// accounts skip the login form entirely.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    pub id: i64,
    pub name: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub cookie_string: Option<String>,
    pub base_url: Option<String>,
    pub user_agent: Option<String>,
    pub remark: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Latest login/check-in outcome for an account.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AccountState {
    pub account_id: i64,
    pub last_login_ok: Option<bool>,
    pub last_login_at: Option<String>,
    pub last_checkin_ok: Option<bool>,
    pub last_checkin_msg: Option<String>,
    pub last_checkin_at: Option<String>,
}

/// One entry in an account's action log.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct HistoryEntry {
    pub id: i64,
    pub account_id: i64,
    pub action: String,
    pub ok: bool,
    pub msg: Option<String>,
    pub created_at: String,
}

/// Profile snapshot scraped from the member space page.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProfileRow {
    pub account_id: i64,
    pub user_group: Option<String>,
    pub points: Option<i64>,
    pub money: Option<i64>,
    pub secoin: Option<i64>,
    pub score: Option<i64>,
    pub updated_at: Option<String>,
}

/// A thread the bot has already replied to.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UsedThread {
    pub fid: i64,
    pub tid: i64,
    pub url: Option<String>,
    pub used_at: String,
}

/// Data for inserting a new account.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewAccount {
    pub name: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub cookie_string: Option<String>,
    pub base_url: Option<String>,
    pub user_agent: Option<String>,
    pub remark: Option<String>,
}
