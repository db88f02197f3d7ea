//! Browser-backed forum session.
//!
//! Some installations sit behind JS challenges that reject a plain HTTP
//! client; this implementation drives a headless Chrome instead. The browser
//! is lazily launched on first use and shared by all operations of one
//! client.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::Page;
use futures_util::StreamExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use super::{
    ActionOutcome, ForumClient, Profile, CHECKIN_ENDPOINTS, CHECKIN_SUCCESS_MARKERS,
    REPLY_SUCCESS_MARKERS,
};
use crate::extract::{
    extract_form_token, extract_max_page, extract_thread_listing, is_authenticated,
    is_dead_thread_page, ThreadRef,
};

const DEFAULT_VIEWPORT: (u32, u32) = (1280, 800);
const NAV_TIMEOUT: Duration = Duration::from_secs(20);
/// Settle time after a form submission before reading the page back.
const SUBMIT_SETTLE: Duration = Duration::from_millis(1500);

const USERNAME_SELECTORS: &[&str] = &[
    // Some templates use a login-mode dropdown named loginfield
    "input[name=loginfield]",
    "input[name=username]",
    "#ls_username",
    "input#username",
];
const PASSWORD_SELECTORS: &[&str] = &["input[name=password]", "#ls_password", "input#password"];
const SUBMIT_SELECTORS: &[&str] = &["input[name=loginsubmit]", "button[name=loginsubmit]"];

/// Headless-Chrome session against a Discuz site.
pub struct BrowserForumClient {
    base_url: String,
    user_agent: String,
    headless: bool,
    chrome_path: Option<String>,
    /// Cookies to install once the browser is up.
    staged_cookies: StdMutex<Vec<(String, String)>>,
    browser: Arc<Mutex<Option<Browser>>>,
}

impl BrowserForumClient {
    #[must_use]
    pub fn new(
        base_url: &str,
        user_agent: &str,
        headless: bool,
        chrome_path: Option<String>,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            user_agent: user_agent.to_string(),
            headless,
            chrome_path,
            staged_cookies: StdMutex::new(Vec::new()),
            browser: Arc::new(Mutex::new(None)),
        }
    }

    /// Stage cookies to be installed when the browser launches.
    pub fn stage_cookies(&self, cookies: Vec<(String, String)>) {
        if let Ok(mut staged) = self.staged_cookies.lock() {
            *staged = cookies;
        }
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    /// Launch the browser if not already running.
    async fn ensure_browser(&self) -> Result<()> {
        let mut browser_guard = self.browser.lock().await;
        if browser_guard.is_some() {
            return Ok(());
        }

        info!("Launching headless browser session");

        let mut config_builder = BrowserConfig::builder()
            .window_size(DEFAULT_VIEWPORT.0, DEFAULT_VIEWPORT.1)
            .request_timeout(NAV_TIMEOUT)
            .no_sandbox()
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-blink-features=AutomationControlled")
            .arg(format!("--user-agent={}", self.user_agent));

        if !self.headless {
            config_builder = config_builder.with_head();
        }
        if let Some(ref chrome_path) = self.chrome_path {
            config_builder = config_builder.chrome_executable(chrome_path);
        }

        let browser_config = config_builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .context("Failed to launch browser")?;

        // Spawn handler in background
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler error: {e}");
                }
            }
        });

        let staged = self
            .staged_cookies
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default();
        if !staged.is_empty() {
            if let Err(e) = install_cookies(&browser, &self.base_url, &staged).await {
                debug!("Failed to install session cookies: {e:#}");
            }
        }

        *browser_guard = Some(browser);
        Ok(())
    }

    /// Navigate to a path and return `(final_url, html)`.
    async fn open(&self, path: &str) -> Result<(String, String)> {
        self.ensure_browser().await?;
        let browser_guard = self.browser.lock().await;
        let browser = browser_guard.as_ref().context("Browser not initialized")?;

        let target = self.url(path);
        let page = browser
            .new_page(target.as_str())
            .await
            .context("Failed to open page")?;
        page.wait_for_navigation()
            .await
            .context("Navigation timeout")?;

        let html = page.content().await.context("Failed to read page")?;
        let final_url = page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| target.clone());

        if let Err(e) = page.close().await {
            debug!("Failed to close page: {e}");
        }
        Ok((final_url, html))
    }

    /// POST a form from inside the page context so the submission shares the
    /// browser's cookies. Returns the response body text.
    async fn post_in_page(&self, path: &str, form: &[(&str, String)]) -> Result<String> {
        self.ensure_browser().await?;
        let browser_guard = self.browser.lock().await;
        let browser = browser_guard.as_ref().context("Browser not initialized")?;

        // Land on the site origin first so fetch() is same-origin.
        let page = browser
            .new_page(self.url("/").as_str())
            .await
            .context("Failed to open origin page")?;
        if let Err(e) = page.wait_for_navigation().await {
            debug!("Origin navigation incomplete: {e}");
        }

        let mut appends = String::new();
        for (name, value) in form {
            appends.push_str(&format!(
                "fd.append({}, {});",
                serde_json::to_string(name)?,
                serde_json::to_string(value)?,
            ));
        }
        let script = format!(
            "(async () => {{ const fd = new FormData(); {appends} \
             const resp = await fetch({url}, {{ method: 'POST', body: fd, credentials: 'include' }}); \
             return await resp.text(); }})()",
            url = serde_json::to_string(&self.url(path))?,
        );

        let result = page
            .evaluate(script)
            .await
            .context("Form submission script failed")?;
        let text: String = result
            .into_value()
            .context("Form submission returned no text")?;

        if let Err(e) = page.close().await {
            debug!("Failed to close page: {e}");
        }
        Ok(text)
    }

    async fn login_inner(&self, username: &str, password: &str) -> Result<bool> {
        self.ensure_browser().await?;
        {
            let browser_guard = self.browser.lock().await;
            let browser = browser_guard.as_ref().context("Browser not initialized")?;

            let page = browser
                .new_page(self.url("/member.php?mod=logging&action=login").as_str())
                .await
                .context("Failed to open login page")?;
            if let Err(e) = page.wait_for_navigation().await {
                debug!("Login page navigation incomplete: {e}");
            }

            let filled = fill_login_form(&page, username, password).await;
            if filled {
                submit_login_form(&page).await;
            }

            tokio::time::sleep(SUBMIT_SETTLE).await;
            let html = page.content().await.unwrap_or_default();
            if let Err(e) = page.close().await {
                debug!("Failed to close page: {e}");
            }
            if is_authenticated(&html) {
                return Ok(true);
            }
        }

        // The login may have landed as a redirect; the home page settles it.
        let (_, home) = self.open("/").await?;
        Ok(is_authenticated(&home))
    }

    /// Shut the browser down gracefully.
    pub async fn shutdown(&self) {
        let mut browser_guard = self.browser.lock().await;
        if let Some(mut browser) = browser_guard.take() {
            if let Err(e) = browser.close().await {
                error!("Failed to close browser: {e}");
            } else {
                info!("Browser shutdown complete");
            }
        }
    }
}

/// Try the username/password selector cascade; true if both fields were filled.
async fn fill_login_form(page: &Page, username: &str, password: &str) -> bool {
    for user_sel in USERNAME_SELECTORS {
        let Ok(user_el) = page.find_element(*user_sel).await else {
            continue;
        };
        // The loginfield dropdown wants the literal mode name, not the user.
        let value = if *user_sel == "input[name=loginfield]" {
            "username"
        } else {
            username
        };
        if user_el.click().await.is_err() || user_el.type_str(value).await.is_err() {
            continue;
        }
        for pass_sel in PASSWORD_SELECTORS {
            let Ok(pass_el) = page.find_element(*pass_sel).await else {
                continue;
            };
            if pass_el.click().await.is_ok() && pass_el.type_str(password).await.is_ok() {
                return true;
            }
        }
    }
    false
}

/// Click a submit control, falling back to Enter in the password field.
async fn submit_login_form(page: &Page) {
    for submit_sel in SUBMIT_SELECTORS {
        if let Ok(el) = page.find_element(*submit_sel).await {
            if el.click().await.is_ok() {
                return;
            }
        }
    }
    for pass_sel in PASSWORD_SELECTORS {
        if let Ok(el) = page.find_element(*pass_sel).await {
            if el.press_key("Enter").await.is_ok() {
                return;
            }
        }
    }
}

/// Install cookies into the browser for the site's domain.
async fn install_cookies(
    browser: &Browser,
    base_url: &str,
    cookies: &[(String, String)],
) -> Result<()> {
    let domain = url::Url::parse(base_url)
        .ok()
        .and_then(|u| u.host_str().map(ToString::to_string))
        .context("Invalid base URL for cookie domain")?;

    let params: Vec<CookieParam> = cookies
        .iter()
        .filter_map(|(name, value)| {
            CookieParam::builder()
                .name(name)
                .value(value)
                .domain(domain.clone())
                .path("/")
                .build()
                .ok()
        })
        .collect();

    if params.is_empty() {
        return Ok(());
    }

    let page = browser
        .new_page("about:blank")
        .await
        .context("Failed to open cookie page")?;
    page.set_cookies(params)
        .await
        .context("Failed to set cookies")?;
    if let Err(e) = page.close().await {
        debug!("Failed to close cookie page: {e}");
    }
    Ok(())
}

#[async_trait]
impl ForumClient for BrowserForumClient {
    async fn login(&self, username: &str, password: &str) -> bool {
        match self.login_inner(username, password).await {
            Ok(ok) => ok,
            Err(e) => {
                debug!("Browser login failed: {e:#}");
                false
            }
        }
    }

    async fn check_logged_in(&self) -> bool {
        match self.open("/").await {
            Ok((_, html)) => is_authenticated(&html),
            Err(e) => {
                debug!("Login probe failed: {e:#}");
                false
            }
        }
    }

    async fn try_checkin(&self) -> ActionOutcome {
        for endpoint in CHECKIN_ENDPOINTS {
            let Ok((_, html)) = self.open(endpoint).await else {
                continue;
            };
            let token = extract_form_token(&html).unwrap_or_default();
            let form: Vec<(&str, String)> = vec![
                ("formhash", token),
                ("qdmode", "3".to_string()),
                ("todaysay", String::new()),
                ("qdxq", "kx".to_string()),
            ];
            match self.post_in_page(endpoint, &form).await {
                Ok(text) if CHECKIN_SUCCESS_MARKERS.iter().any(|m| text.contains(m)) => {
                    return ActionOutcome::success("签到成功");
                }
                Ok(_) => {}
                Err(e) => debug!("Check-in submission failed: {e:#}"),
            }
        }
        ActionOutcome::failure("未找到可用签到端点或失败")
    }

    async fn reply(&self, tid: u64, message: &str) -> ActionOutcome {
        let Ok((_, html)) = self.open(&format!("/thread-{tid}-1-1.html")).await else {
            return ActionOutcome::failure("获取帖子失败");
        };
        let Some(token) = extract_form_token(&html) else {
            return ActionOutcome::failure("未找到 formhash");
        };

        let form: Vec<(&str, String)> = vec![
            ("formhash", token),
            ("message", message.to_string()),
            ("posttime", String::new()),
            ("usesig", "1".to_string()),
            ("subject", String::new()),
            ("replysubmit", "yes".to_string()),
        ];
        let endpoint = format!(
            "/forum.php?mod=post&action=reply&fid=0&tid={tid}&extra=&replysubmit=yes&infloat=yes&handlekey=fastpost&inajax=1"
        );
        match self.post_in_page(&endpoint, &form).await {
            Ok(text) if REPLY_SUCCESS_MARKERS.iter().any(|m| text.contains(m)) => {
                ActionOutcome::success("回帖成功")
            }
            Ok(_) => ActionOutcome::failure("回帖失败或触发限制"),
            Err(e) => ActionOutcome::failure(format!("回帖异常：{e}")),
        }
    }

    async fn fetch_profile(&self) -> Option<Profile> {
        match self.open("/home.php?mod=space").await {
            Ok((_, html)) => Some(super::parse_profile(&html)),
            Err(e) => {
                debug!("Profile fetch failed: {e:#}");
                None
            }
        }
    }

    async fn forum_max_page(&self, fid: u64) -> u32 {
        match self.open(&format!("/forum.php?mod=forumdisplay&fid={fid}")).await {
            Ok((_, html)) => extract_max_page(&html),
            Err(_) => 1,
        }
    }

    async fn threads_on_page(&self, fid: u64, page_no: u32) -> Vec<ThreadRef> {
        match self
            .open(&format!("/forum.php?mod=forumdisplay&fid={fid}&page={page_no}"))
            .await
        {
            Ok((_, html)) => extract_thread_listing(&html),
            Err(_) => Vec::new(),
        }
    }

    async fn validate_thread(&self, tid: u64, href: Option<&str>) -> Option<String> {
        let path = href.map_or_else(
            || format!("/forum.php?mod=viewthread&tid={tid}"),
            |h| h.replace("&amp;", "&"),
        );
        match self.open(&path).await {
            Ok((final_url, html)) if !is_dead_thread_page(&html) => Some(final_url),
            _ => None,
        }
    }

    fn absolute_url(&self, path: &str) -> String {
        self.url(path)
    }
}
