//! Pattern-based extraction of typed facts from Discuz page markup.
//!
//! Forum installations drift across templates, so every extractor here is a
//! cascade of patterns tried in order; the first strategy that matches wins
//! and the rest are skipped.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

/// A thread discovered on a forum listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadRef {
    /// Thread id, unique within the forum.
    pub tid: u64,
    /// Listing href, normalized to start with `/` and with `&amp;` decoded.
    /// May still be relative and percent-encoded.
    pub href: String,
}

static FORMHASH_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"name="formhash"\s+value="([a-zA-Z0-9]{8})""#).unwrap()
});

static FORMHASH_INLINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"formhash=([a-zA-Z0-9]{8})").unwrap());

static FORUM_PAGE_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/forum\.php\?mod=forumdisplay&fid=\d+&amp;page=(\d+)").unwrap()
});

static LAST_PAGE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"class="last">\.\.\.\s*(\d+)<"#).unwrap());

static NORMALTHREAD_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<tbody\s+id="normalthread_(\d+)">([\s\S]*?)</tbody>"#).unwrap()
});

static VIEWTHREAD_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"href="((?:/)?forum\.php\?mod=viewthread(?:&|&amp;)tid=(\d+)[^"]*)""#).unwrap()
});

static TITLE_CLASS_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"<a[^>]+class="[^"]*\bxst\b[^"]*"[^>]+href="((?:/)?forum\.php\?mod=viewthread(?:&|&amp;)tid=(\d+)[^"]*)""#,
    )
    .unwrap()
});

static PRETTY_THREAD_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"href="(/thread-(\d+)-\d+-\d+\.html)""#).unwrap());

/// Keywords that only appear in the chrome of an authenticated session.
const AUTH_MARKERS: &[&str] = &["退出", "我的", "用户组", "控制面板"];

/// Keywords shown on unavailable threads: not-found, no-permission, deleted,
/// error, penalty box, apology page.
const DEAD_MARKERS: &[&str] = &["不存在", "无权", "删除", "错误", "小黑屋", "抱歉"];

/// Extract the Discuz anti-forgery form token.
///
/// Prefers the hidden `<input name="formhash">` field, falling back to an
/// inline `formhash=` occurrence anywhere in the document (cookies, scripts).
#[must_use]
pub fn extract_form_token(html: &str) -> Option<String> {
    if html.is_empty() {
        return None;
    }
    FORMHASH_FIELD
        .captures(html)
        .or_else(|| FORMHASH_INLINE.captures(html))
        .map(|caps| caps[1].to_string())
}

/// Heuristic login-state probe: true iff the page carries any authenticated
/// session marker. Keyword-based, so template text on unusual installations
/// can produce false results.
#[must_use]
pub fn is_authenticated(html: &str) -> bool {
    !html.is_empty() && AUTH_MARKERS.iter().any(|m| html.contains(m))
}

/// Parse the maximum page number from a forum listing page.
///
/// Checks the explicit `page=N` pagination link and the trailing
/// `class="last"` marker independently and returns the larger of the two.
/// Never returns less than 1.
#[must_use]
pub fn extract_max_page(html: &str) -> u32 {
    let mut last = 1u32;
    if let Some(caps) = FORUM_PAGE_LINK.captures(html) {
        if let Ok(n) = caps[1].parse() {
            last = n;
        }
    }
    if let Some(caps) = LAST_PAGE_MARKER.captures(html) {
        if let Ok(n) = caps[1].parse::<u32>() {
            last = last.max(n);
        }
    }
    last.max(1)
}

/// Parse `(tid, href)` pairs from a forum listing page.
///
/// Exactly one strategy produces the result; later strategies run only when
/// every earlier one yielded nothing:
///
/// 1. `<tbody id="normalthread_<tid>">` blocks, taking the first `viewthread`
///    link inside each block;
/// 2. anchors carrying the `xst` thread-title class;
/// 3. any `viewthread&tid=` anchor in the document;
/// 4. pretty URLs of the form `/thread-<tid>-<page>-<order>.html`.
///
/// Hrefs are entity-decoded and normalized to a leading `/`; the result is
/// deduplicated by `(tid, href)` keeping first-seen order.
#[must_use]
pub fn extract_thread_listing(html: &str) -> Vec<ThreadRef> {
    if html.is_empty() {
        return Vec::new();
    }

    let mut found: Vec<(u64, String)> = Vec::new();

    for block in NORMALTHREAD_BLOCK.captures_iter(html) {
        let Ok(tid) = block[1].parse::<u64>() else {
            continue;
        };
        if let Some(link) = VIEWTHREAD_LINK.captures(&block[2]) {
            found.push((tid, link[1].replace("&amp;", "&")));
        }
    }

    if found.is_empty() {
        for caps in TITLE_CLASS_LINK.captures_iter(html) {
            let Ok(tid) = caps[2].parse::<u64>() else {
                continue;
            };
            found.push((tid, caps[1].replace("&amp;", "&")));
        }
    }

    if found.is_empty() {
        for caps in VIEWTHREAD_LINK.captures_iter(html) {
            let Ok(tid) = caps[2].parse::<u64>() else {
                continue;
            };
            found.push((tid, caps[1].replace("&amp;", "&")));
        }
    }

    if found.is_empty() {
        for caps in PRETTY_THREAD_LINK.captures_iter(html) {
            let Ok(tid) = caps[2].parse::<u64>() else {
                continue;
            };
            found.push((tid, caps[1].to_string()));
        }
    }

    let mut seen = HashSet::new();
    let mut listing = Vec::new();
    for (tid, href) in found {
        let href = if href.starts_with('/') {
            href
        } else {
            format!("/{href}")
        };
        if seen.insert((tid, href.clone())) {
            listing.push(ThreadRef { tid, href });
        }
    }
    listing
}

/// True iff the page reports the thread as unavailable (deleted, hidden,
/// permission-gated, errored). An empty document counts as dead.
#[must_use]
pub fn is_dead_thread_page(html: &str) -> bool {
    html.is_empty() || DEAD_MARKERS.iter().any(|m| html.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_token_from_hidden_input() {
        let html = r#"<input type="hidden" name="formhash" value="abc12345" />"#;
        assert_eq!(extract_form_token(html).as_deref(), Some("abc12345"));
    }

    #[test]
    fn test_form_token_from_inline_url() {
        let html = r#"<a href="/member.php?mod=logging&action=login&formhash=1a2b3c4d">Login</a>"#;
        assert_eq!(extract_form_token(html).as_deref(), Some("1a2b3c4d"));
    }

    #[test]
    fn test_form_token_prefers_hidden_field() {
        let html = concat!(
            r#"<a href="/x.php?formhash=ffffffff">x</a>"#,
            r#"<input name="formhash" value="abc12345" />"#,
        );
        assert_eq!(extract_form_token(html).as_deref(), Some("abc12345"));
    }

    #[test]
    fn test_form_token_absent() {
        assert_eq!(extract_form_token("<p>no token here</p>"), None);
        assert_eq!(extract_form_token(""), None);
        // Wrong length is not a token.
        assert_eq!(extract_form_token("formhash=abc"), None);
    }

    #[test]
    fn test_is_authenticated() {
        assert!(is_authenticated("<div>退出</div>"));
        assert!(is_authenticated("<a>控制面板</a>"));
        assert!(!is_authenticated("<div>欢迎游客</div>"));
        assert!(!is_authenticated(""));
    }

    #[test]
    fn test_max_page_from_pagination_link() {
        let html = r#"<a href="/forum.php?mod=forumdisplay&fid=64&amp;page=12">12</a>"#;
        assert_eq!(extract_max_page(html), 12);
    }

    #[test]
    fn test_max_page_from_last_marker() {
        let html = r#"<span class="last">... 8</span>"#;
        assert_eq!(extract_max_page(html), 8);
    }

    #[test]
    fn test_max_page_takes_larger_signal() {
        let html = concat!(
            r#"<a href="/forum.php?mod=forumdisplay&fid=64&amp;page=12">12</a>"#,
            r#"<span class="last">... 40</span>"#,
        );
        assert_eq!(extract_max_page(html), 40);
    }

    #[test]
    fn test_max_page_never_below_one() {
        assert_eq!(extract_max_page(""), 1);
        assert_eq!(extract_max_page("<html>no pagination</html>"), 1);
        assert_eq!(extract_max_page("page=0"), 1);
    }

    #[test]
    fn test_listing_normalthread_block() {
        let html = concat!(
            r#"<tbody id="normalthread_123">"#,
            r#"<tr><td><a class="xst" href="/forum.php?mod=viewthread&amp;tid=123&amp;extra=page%3D1">Title</a></td></tr>"#,
            r#"</tbody>"#,
        );
        let listing = extract_thread_listing(html);
        assert_eq!(
            listing,
            vec![ThreadRef {
                tid: 123,
                href: "/forum.php?mod=viewthread&tid=123&extra=page%3D1".to_string(),
            }]
        );
    }

    #[test]
    fn test_listing_title_class_fallback() {
        let html = r#"<a class="s xst" href="forum.php?mod=viewthread&tid=77">T</a>"#;
        let listing = extract_thread_listing(html);
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].tid, 77);
        // Missing leading slash gets normalized.
        assert_eq!(listing[0].href, "/forum.php?mod=viewthread&tid=77");
    }

    #[test]
    fn test_listing_bare_viewthread_fallback() {
        let html = r#"<a href="/forum.php?mod=viewthread&tid=9&page=2">last post</a>"#;
        let listing = extract_thread_listing(html);
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].tid, 9);
    }

    #[test]
    fn test_listing_pretty_url_fallback() {
        let html = r#"<a href="/thread-456-1-1.html">Title</a>"#;
        let listing = extract_thread_listing(html);
        assert_eq!(
            listing,
            vec![ThreadRef {
                tid: 456,
                href: "/thread-456-1-1.html".to_string(),
            }]
        );
    }

    #[test]
    fn test_listing_first_strategy_wins() {
        // A normalthread block is present, so the pretty URL below must be
        // ignored rather than merged in.
        let html = concat!(
            r#"<tbody id="normalthread_1"><a href="/forum.php?mod=viewthread&tid=1">a</a></tbody>"#,
            r#"<a href="/thread-2-1-1.html">b</a>"#,
        );
        let listing = extract_thread_listing(html);
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].tid, 1);
    }

    #[test]
    fn test_listing_dedupes_by_tid_and_href() {
        let html = concat!(
            r#"<a href="/forum.php?mod=viewthread&tid=5">x</a>"#,
            r#"<a href="/forum.php?mod=viewthread&tid=5">y</a>"#,
            r#"<a href="/forum.php?mod=viewthread&tid=5&page=2">z</a>"#,
        );
        let listing = extract_thread_listing(html);
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].href, "/forum.php?mod=viewthread&tid=5");
        assert_eq!(listing[1].href, "/forum.php?mod=viewthread&tid=5&page=2");
    }

    #[test]
    fn test_listing_empty_input() {
        assert!(extract_thread_listing("").is_empty());
        assert!(extract_thread_listing("<html><body>nothing</body></html>").is_empty());
    }

    #[test]
    fn test_dead_thread_page() {
        assert!(is_dead_thread_page("抱歉，您无权访问该版块"));
        assert!(is_dead_thread_page("该主题不存在"));
        assert!(is_dead_thread_page(""));
        assert!(!is_dead_thread_page("正常内容"));
    }
}
