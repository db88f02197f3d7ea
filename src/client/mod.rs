//! The forum access port: everything the bot knows how to ask a Discuz site.
//!
//! Core logic is written against [`ForumClient`] only; whether the session
//! behind it is a plain HTTP cookie jar or a headless browser is an
//! implementation detail selected by configuration.

mod browser;
mod http;

pub use browser::BrowserForumClient;
pub use http::HttpForumClient;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;

use crate::config::Config;
use crate::db::Account;
use crate::extract::ThreadRef;

/// Outcome of a forum action (check-in, reply).
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub ok: bool,
    pub message: String,
}

impl ActionOutcome {
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

/// Profile fields scraped from the member space page.
#[derive(Debug, Clone, Default)]
pub struct Profile {
    pub user_group: Option<String>,
    pub points: Option<i64>,
    pub money: Option<i64>,
    pub secoin: Option<i64>,
    pub score: Option<i64>,
}

/// A site session capable of the full Discuz interaction surface.
///
/// The discovery methods (`forum_max_page`, `threads_on_page`,
/// `validate_thread`) never surface errors: a failed fetch degrades to the
/// documented empty sentinel (1 page / empty list / `None`) so the thread
/// selection engine can move on to the next candidate instead of aborting.
#[async_trait]
pub trait ForumClient: Send + Sync {
    /// Establish an authenticated session from credentials.
    async fn login(&self, username: &str, password: &str) -> bool;

    /// Cheap probe of the current session state without re-authenticating.
    /// This is what keeps cookie-only accounts usable.
    async fn check_logged_in(&self) -> bool;

    /// Attempt the daily check-in against the known plugin endpoints.
    async fn try_checkin(&self) -> ActionOutcome;

    /// Post a reply to a thread.
    async fn reply(&self, tid: u64, message: &str) -> ActionOutcome;

    /// Scrape the member profile page. `None` when the fetch fails.
    async fn fetch_profile(&self) -> Option<Profile>;

    /// Maximum listing page of a forum; 1 on any fetch or parse failure.
    async fn forum_max_page(&self, fid: u64) -> u32;

    /// Threads on one listing page; empty on any fetch failure.
    async fn threads_on_page(&self, fid: u64, page: u32) -> Vec<ThreadRef>;

    /// Check that a thread is still live. Returns the resolved final URL
    /// after redirects, or `None` for dead/inaccessible threads.
    async fn validate_thread(&self, tid: u64, href: Option<&str>) -> Option<String>;

    /// Resolve a site-relative path against the session's base URL.
    fn absolute_url(&self, path: &str) -> String;
}

/// Login endpoints in the order they are worth trying. Paths differ between
/// installations; the first two cover stock Discuz.
pub(crate) const LOGIN_ENDPOINTS: &[&str] = &[
    "/member.php?mod=logging&action=login&loginsubmit=yes&loginhash=xx",
    "/member.php?mod=logging&action=login&loginsubmit=yes",
    "/ucp.php?mod=login",
];

/// Check-in plugin endpoints seen in the wild.
pub(crate) const CHECKIN_ENDPOINTS: &[&str] = &[
    "/plugin.php?id=k_misign:sign",
    "/plugin.php?id=dsu_paulsign:sign",
    "/plugin.php?id=dc_signin:sign",
    "/plugin.php?id=fx_checkin:checkin",
];

/// Keywords a login response can contain when the site answered the form
/// directly rather than redirecting to the home page.
pub(crate) const LOGIN_PROBE_MARKERS: &[&str] = &["欢迎", "退出", "我的帖子", "控制面板", "登录失败"];

/// Keywords confirming a successful check-in submission.
pub(crate) const CHECKIN_SUCCESS_MARKERS: &[&str] = &["签到成功", "已签到", "累计签到", "恭喜"];

/// Keywords confirming a successful reply submission.
pub(crate) const REPLY_SUCCESS_MARKERS: &[&str] = &["发布成功", "回帖成功", "非常感谢", "查看自己的帖子"];

/// Parse a raw `k=v; k2=v2` cookie header string into pairs.
#[must_use]
pub fn parse_cookie_string(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter_map(|part| {
            let part = part.trim();
            let (k, v) = part.split_once('=')?;
            let k = k.trim();
            if k.is_empty() {
                return None;
            }
            Some((k.to_string(), v.trim().to_string()))
        })
        .collect()
}

/// Scrape profile fields out of the member space page.
pub(crate) fn parse_profile(html: &str) -> Profile {
    let user_group = Regex::new(r"用户组[^<]*?<a[^>]*>([^<]+)</a>")
        .ok()
        .and_then(|re| re.captures(html))
        .map(|caps| caps[1].trim().to_string());

    Profile {
        user_group,
        points: grab_stat(html, "积分"),
        money: grab_stat(html, "金钱"),
        secoin: grab_stat(html, "色币"),
        score: grab_stat(html, "评分"),
    }
}

fn grab_stat(html: &str, label: &str) -> Option<i64> {
    let re = Regex::new(&format!(r"<li><em>\s*{label}\s*</em>\s*([0-9]+)\s*</li>")).ok()?;
    re.captures(html).and_then(|caps| caps[1].parse().ok())
}

/// Build the forum client an account should use, honoring per-account
/// base URL / user agent overrides and staging any stored cookies.
///
/// # Errors
///
/// Returns an error if the underlying HTTP client cannot be constructed.
pub fn build_client(config: &Config, account: Option<&Account>) -> Result<Arc<dyn ForumClient>> {
    let base_url = account
        .and_then(|a| a.base_url.as_deref())
        .filter(|s| !s.is_empty())
        .unwrap_or(&config.site_base_url);
    let user_agent = account
        .and_then(|a| a.user_agent.as_deref())
        .filter(|s| !s.is_empty())
        .unwrap_or(&config.site_user_agent);

    let cookies = account
        .and_then(|a| a.cookie_string.as_deref())
        .map(parse_cookie_string)
        .unwrap_or_default();

    if config.browser_enabled {
        let client = BrowserForumClient::new(
            base_url,
            user_agent,
            config.browser_headless,
            config.chrome_path.clone(),
        );
        client.stage_cookies(cookies);
        Ok(Arc::new(client))
    } else {
        let client = HttpForumClient::new(base_url, user_agent, config.site_proxy.as_deref())?;
        client.set_cookies(&cookies);
        Ok(Arc::new(client))
    }
}
