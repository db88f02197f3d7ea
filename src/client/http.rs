use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::StatusCode;
use tracing::debug;

use super::{
    ActionOutcome, ForumClient, Profile, CHECKIN_ENDPOINTS, CHECKIN_SUCCESS_MARKERS,
    LOGIN_ENDPOINTS, LOGIN_PROBE_MARKERS, REPLY_SUCCESS_MARKERS,
};
use crate::extract::{
    extract_form_token, extract_max_page, extract_thread_listing, is_authenticated,
    is_dead_thread_page, ThreadRef,
};

const FETCH_TIMEOUT: Duration = Duration::from_secs(20);
const FETCH_RETRIES: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// A fetched page: status, resolved final URL, body.
struct FetchedPage {
    status: StatusCode,
    final_url: String,
    body: String,
}

/// Direct HTTP session against a Discuz site, with a persistent cookie jar.
pub struct HttpForumClient {
    client: reqwest::Client,
    jar: Arc<Jar>,
    base_url: String,
}

impl HttpForumClient {
    /// Build a session client for the given site.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed (bad proxy
    /// URL, TLS backend failure).
    pub fn new(base_url: &str, user_agent: &str, proxy: Option<&str>) -> Result<Self> {
        let jar = Arc::new(Jar::default());

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"),
        );

        let mut builder = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .default_headers(headers)
            .user_agent(user_agent)
            .timeout(FETCH_TIMEOUT);

        if let Some(proxy) = proxy.filter(|p| !p.is_empty()) {
            builder = builder.proxy(reqwest::Proxy::all(proxy).context("Invalid proxy URL")?);
        }

        let client = builder.build().context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            jar,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Seed the cookie jar, e.g. from a stored account cookie string.
    pub fn set_cookies(&self, cookies: &[(String, String)]) {
        let Ok(base) = url::Url::parse(&self.base_url) else {
            return;
        };
        for (name, value) in cookies {
            self.jar.add_cookie_str(&format!("{name}={value}"), &base);
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

    /// GET a page, retrying transient failures (connect/timeout/5xx/429).
    async fn get_page(&self, path: &str) -> Result<FetchedPage> {
        let url = self.url(path);
        let mut last_err = None;

        for attempt in 1..=FETCH_RETRIES {
            match self.client.get(&url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                        debug!(url = %url, %status, attempt, "Retrying after status");
                        last_err = Some(anyhow::anyhow!("fetch failed with status {status}"));
                    } else {
                        let final_url = response.url().to_string();
                        let body = response.text().await.context("Failed to read body")?;
                        return Ok(FetchedPage {
                            status,
                            final_url,
                            body,
                        });
                    }
                }
                Err(e) => {
                    debug!(url = %url, attempt, "Fetch error: {e}");
                    last_err = Some(e.into());
                }
            }
            if attempt < FETCH_RETRIES {
                tokio::time::sleep(RETRY_BACKOFF * attempt).await;
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("fetch failed: {url}")))
    }

    /// POST a form, without retries: form submissions are not idempotent.
    async fn post_form(&self, path: &str, form: &[(&str, &str)]) -> Result<FetchedPage> {
        let url = self.url(path);
        let response = self
            .client
            .post(&url)
            .form(form)
            .send()
            .await
            .with_context(|| format!("Failed to POST {url}"))?;

        let status = response.status();
        let final_url = response.url().to_string();
        let body = response.text().await.context("Failed to read body")?;
        Ok(FetchedPage {
            status,
            final_url,
            body,
        })
    }
}

fn submitted(status: StatusCode) -> bool {
    status == StatusCode::OK || status == StatusCode::FOUND
}

#[async_trait]
impl ForumClient for HttpForumClient {
    async fn login(&self, username: &str, password: &str) -> bool {
        let token = match self.get_page("/").await {
            Ok(page) => extract_form_token(&page.body).unwrap_or_default(),
            Err(e) => {
                debug!("Login home fetch failed: {e:#}");
                String::new()
            }
        };

        let referer = self.url("/");
        let form: Vec<(&str, &str)> = vec![
            ("username", username),
            ("password", password),
            ("formhash", &token),
            ("referer", &referer),
            ("cookietime", "2592000"),
        ];

        for endpoint in LOGIN_ENDPOINTS {
            let Ok(page) = self.post_form(endpoint, &form).await else {
                continue;
            };
            if !submitted(page.status) {
                continue;
            }
            if LOGIN_PROBE_MARKERS.iter().any(|m| page.body.contains(m)) {
                if is_authenticated(&page.body) {
                    return true;
                }
            } else {
                // Some installations answer the form with a bare redirect
                // page; the home page is what tells us whether it stuck.
                if let Ok(home) = self.get_page("/").await {
                    if is_authenticated(&home.body) {
                        return true;
                    }
                }
            }
        }
        false
    }

    async fn check_logged_in(&self) -> bool {
        match self.get_page("/").await {
            Ok(page) if page.status.is_success() => is_authenticated(&page.body),
            _ => false,
        }
    }

    async fn try_checkin(&self) -> ActionOutcome {
        for endpoint in CHECKIN_ENDPOINTS {
            let Ok(page) = self.get_page(endpoint).await else {
                continue;
            };
            if page.status != StatusCode::OK {
                continue;
            }
            let token = extract_form_token(&page.body).unwrap_or_default();
            let form: Vec<(&str, &str)> = vec![
                ("formhash", &token),
                ("qdmode", "3"),
                ("todaysay", ""),
                ("qdxq", "kx"),
            ];
            let Ok(submitted_page) = self.post_form(endpoint, &form).await else {
                continue;
            };
            if submitted(submitted_page.status)
                && CHECKIN_SUCCESS_MARKERS
                    .iter()
                    .any(|m| submitted_page.body.contains(m))
            {
                return ActionOutcome::success("签到成功");
            }
        }
        ActionOutcome::failure("未找到可用签到端点或失败")
    }

    async fn reply(&self, tid: u64, message: &str) -> ActionOutcome {
        let page = match self.get_page(&format!("/thread-{tid}-1-1.html")).await {
            Ok(page) if page.status == StatusCode::OK => page,
            Ok(page) => return ActionOutcome::failure(format!("获取帖子失败：{}", page.status)),
            Err(e) => return ActionOutcome::failure(format!("获取帖子失败：{e}")),
        };
        let Some(token) = extract_form_token(&page.body) else {
            return ActionOutcome::failure("未找到 formhash");
        };

        let form: Vec<(&str, &str)> = vec![
            ("formhash", &token),
            ("message", message),
            ("posttime", ""),
            ("usesig", "1"),
            ("subject", ""),
            ("replysubmit", "yes"),
        ];
        let endpoint = format!(
            "/forum.php?mod=post&action=reply&fid=0&tid={tid}&extra=&replysubmit=yes&infloat=yes&handlekey=fastpost&inajax=1"
        );
        match self.post_form(&endpoint, &form).await {
            Ok(page)
                if submitted(page.status)
                    && REPLY_SUCCESS_MARKERS.iter().any(|m| page.body.contains(m)) =>
            {
                ActionOutcome::success("回帖成功")
            }
            Ok(_) => ActionOutcome::failure("回帖失败或触发限制"),
            Err(e) => ActionOutcome::failure(format!("回帖异常：{e}")),
        }
    }

    async fn fetch_profile(&self) -> Option<Profile> {
        match self.get_page("/home.php?mod=space").await {
            Ok(page) if page.status == StatusCode::OK => Some(super::parse_profile(&page.body)),
            _ => None,
        }
    }

    async fn forum_max_page(&self, fid: u64) -> u32 {
        match self
            .get_page(&format!("/forum.php?mod=forumdisplay&fid={fid}"))
            .await
        {
            Ok(page) if page.status == StatusCode::OK => extract_max_page(&page.body),
            _ => 1,
        }
    }

    async fn threads_on_page(&self, fid: u64, page_no: u32) -> Vec<ThreadRef> {
        match self
            .get_page(&format!("/forum.php?mod=forumdisplay&fid={fid}&page={page_no}"))
            .await
        {
            Ok(page) if page.status == StatusCode::OK => extract_thread_listing(&page.body),
            _ => Vec::new(),
        }
    }

    async fn validate_thread(&self, tid: u64, href: Option<&str>) -> Option<String> {
        let path = href.map_or_else(
            || format!("/forum.php?mod=viewthread&tid={tid}"),
            |h| h.replace("&amp;", "&"),
        );
        match self.get_page(&path).await {
            Ok(page) if page.status == StatusCode::OK && !is_dead_thread_page(&page.body) => {
                Some(page.final_url)
            }
            _ => None,
        }
    }

    fn absolute_url(&self, path: &str) -> String {
        self.url(path)
    }
}
