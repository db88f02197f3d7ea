//! Integration tests for the HTTP forum client against a mock Discuz site.

use discuz_bot::client::{ForumClient, HttpForumClient};
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> HttpForumClient {
    HttpForumClient::new(&server.uri(), "test-agent/1.0", None).expect("Failed to build client")
}

fn html_response(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/html; charset=utf-8")
}

#[tokio::test]
async fn test_check_logged_in_true_and_false() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_response("<div>欢迎回来 <a>退出</a></div>"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(client.check_logged_in().await);

    let guest_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_response("<div>欢迎游客，请登录</div>"))
        .mount(&guest_server)
        .await;

    let client = client_for(&guest_server);
    assert!(!client.check_logged_in().await);
}

#[tokio::test]
async fn test_stored_cookies_are_sent() {
    let server = MockServer::start().await;
    // Only a request carrying the seeded cookie gets the authenticated body.
    Mock::given(method("GET"))
        .and(path("/"))
        .and(header("cookie", "abc_auth=tok123"))
        .respond_with(html_response("<a>退出</a>"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    client.set_cookies(&[("abc_auth".to_string(), "tok123".to_string())]);
    assert!(client.check_logged_in().await);
}

#[tokio::test]
async fn test_login_posts_form_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_response(
            r#"<input type="hidden" name="formhash" value="abc12345" /> 游客"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/member.php"))
        .and(body_string_contains("formhash=abc12345"))
        .and(body_string_contains("username=alice"))
        .respond_with(html_response("欢迎回来 <a>退出</a>"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(client.login("alice", "secret").await);
}

#[tokio::test]
async fn test_login_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html_response("游客"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/member.php"))
        .respond_with(html_response("登录失败，密码错误"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/ucp.php"))
        .respond_with(html_response("登录失败"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(!client.login("alice", "wrong").await);
}

#[tokio::test]
async fn test_try_checkin_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/plugin.php"))
        .and(query_param("id", "k_misign:sign"))
        .respond_with(html_response(
            r#"<input name="formhash" value="feedbee1" />"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/plugin.php"))
        .and(body_string_contains("formhash=feedbee1"))
        .and(body_string_contains("qdxq=kx"))
        .respond_with(html_response("签到成功，获得奖励"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let outcome = client.try_checkin().await;
    assert!(outcome.ok);
    assert_eq!(outcome.message, "签到成功");
}

#[tokio::test]
async fn test_try_checkin_no_endpoint_available() {
    let server = MockServer::start().await;
    // No mounted endpoints: every plugin probe 404s.
    let client = client_for(&server);
    let outcome = client.try_checkin().await;
    assert!(!outcome.ok);
    assert_eq!(outcome.message, "未找到可用签到端点或失败");
}

#[tokio::test]
async fn test_reply_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/thread-5-1-1.html"))
        .respond_with(html_response(
            r#"<input name="formhash" value="cafe0001" />"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/forum.php"))
        .and(query_param("mod", "post"))
        .and(query_param("tid", "5"))
        .and(body_string_contains("formhash=cafe0001"))
        .respond_with(html_response("回帖成功，返回主题"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let outcome = client.reply(5, "很有帮助，感谢分享").await;
    assert!(outcome.ok);
}

#[tokio::test]
async fn test_reply_without_form_token_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/thread-5-1-1.html"))
        .respond_with(html_response("<html>no token anywhere</html>"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let outcome = client.reply(5, "hello").await;
    assert!(!outcome.ok);
    assert_eq!(outcome.message, "未找到 formhash");
}

#[tokio::test]
async fn test_fetch_profile() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/home.php"))
        .and(query_param("mod", "space"))
        .respond_with(html_response(concat!(
            r#"用户组: <a href="/g">中级会员</a>"#,
            r"<li><em>积分</em>1024</li>",
            r"<li><em>金钱</em>55</li>",
        )))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let profile = client.fetch_profile().await.expect("Profile expected");
    assert_eq!(profile.user_group.as_deref(), Some("中级会员"));
    assert_eq!(profile.points, Some(1024));
    assert_eq!(profile.money, Some(55));
}

#[tokio::test]
async fn test_forum_max_page_combines_signals() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/forum.php"))
        .and(query_param("mod", "forumdisplay"))
        .and(query_param("fid", "2"))
        .respond_with(html_response(concat!(
            r#"<a href="/forum.php?mod=forumdisplay&fid=2&amp;page=12">12</a>"#,
            r#"<span class="last">... 40</span>"#,
        )))
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert_eq!(client.forum_max_page(2).await, 40);
}

#[tokio::test]
async fn test_forum_max_page_degrades_to_one() {
    // Nothing mounted: the listing fetch 404s.
    let server = MockServer::start().await;
    let client = client_for(&server);
    assert_eq!(client.forum_max_page(2).await, 1);
}

#[tokio::test]
async fn test_forum_max_page_degrades_after_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/forum.php"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = client_for(&server);
    // Retries are exhausted, then the sentinel applies.
    assert_eq!(client.forum_max_page(2).await, 1);
}

#[tokio::test]
async fn test_threads_on_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/forum.php"))
        .and(query_param("fid", "2"))
        .and(query_param("page", "3"))
        .respond_with(html_response(concat!(
            r#"<tbody id="normalthread_123">"#,
            r#"<a class="xst" href="/forum.php?mod=viewthread&amp;tid=123">T1</a>"#,
            r#"</tbody>"#,
            r#"<tbody id="normalthread_124">"#,
            r#"<a class="xst" href="/forum.php?mod=viewthread&amp;tid=124">T2</a>"#,
            r#"</tbody>"#,
        )))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let listing = client.threads_on_page(2, 3).await;
    assert_eq!(listing.len(), 2);
    assert_eq!(listing[0].tid, 123);
    assert_eq!(listing[0].href, "/forum.php?mod=viewthread&tid=123");
    assert_eq!(listing[1].tid, 124);
}

#[tokio::test]
async fn test_threads_on_page_degrades_to_empty() {
    let server = MockServer::start().await;
    let client = client_for(&server);
    assert!(client.threads_on_page(2, 1).await.is_empty());
}

#[tokio::test]
async fn test_validate_thread_decodes_entities_and_resolves() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/forum.php"))
        .and(query_param("mod", "viewthread"))
        .and(query_param("tid", "9"))
        .respond_with(html_response("正常内容"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let url = client
        .validate_thread(9, Some("/forum.php?mod=viewthread&amp;tid=9"))
        .await
        .expect("Thread must validate");
    assert_eq!(url, format!("{}/forum.php?mod=viewthread&tid=9", server.uri()));
}

#[tokio::test]
async fn test_validate_thread_follows_redirect_to_final_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/forum.php"))
        .and(query_param("mod", "viewthread"))
        .and(query_param("tid", "9"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("Location", "/thread-9-1-1.html"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/thread-9-1-1.html"))
        .respond_with(html_response("正常内容"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let url = client.validate_thread(9, None).await.expect("Must validate");
    assert_eq!(url, format!("{}/thread-9-1-1.html", server.uri()));
}

#[tokio::test]
async fn test_validate_thread_dead_page_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/thread-9-1-1.html"))
        .respond_with(html_response("抱歉，您无权访问该主题"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(client
        .validate_thread(9, Some("/thread-9-1-1.html"))
        .await
        .is_none());
}

#[tokio::test]
async fn test_validate_thread_fetch_failure_is_none() {
    let server = MockServer::start().await;
    let client = client_for(&server);
    assert!(client.validate_thread(9, None).await.is_none());
}

#[tokio::test]
async fn test_absolute_url() {
    let server = MockServer::start().await;
    let client = client_for(&server);
    assert_eq!(
        client.absolute_url("/thread-1-1-1.html"),
        format!("{}/thread-1-1-1.html", server.uri())
    );
    assert_eq!(
        client.absolute_url("thread-1-1-1.html"),
        format!("{}/thread-1-1-1.html", server.uri())
    );
    assert_eq!(
        client.absolute_url("https://other.test/x"),
        "https://other.test/x"
    );
}
