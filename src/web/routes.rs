use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rand::seq::SliceRandom;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use super::AppState;
use crate::db::{self, NewAccount};
use crate::runner::Runner;

/// Assemble the API router. Mutating routes sit behind the admin guard;
/// the status endpoint stays open.
pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/api/run/checkin", post(run_checkin))
        .route("/api/random-thread", post(random_thread))
        .route("/api/accounts", get(list_accounts).post(create_account))
        .route(
            "/api/accounts/:id",
            get(account_detail).put(update_account).delete(remove_account),
        )
        .route("/api/accounts/:id/run/checkin", post(account_checkin))
        .route("/api/accounts/:id/run/profile", post(account_profile))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .route("/api/tasks", get(tasks))
        .merge(admin)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Reject requests without the configured admin password. When no password
/// is configured the deployment is assumed local-only and everything passes.
async fn require_admin(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(expected) = state.config.admin_password.as_deref() {
        let provided = request
            .headers()
            .get("x-admin-password")
            .and_then(|v| v.to_str().ok());
        if provided != Some(expected) {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"ok": false, "message": "unauthorized"})),
            )
                .into_response();
        }
    }
    next.run(request).await
}

fn internal_error(e: &anyhow::Error) -> Response {
    error!("Request failed: {e:#}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"ok": false, "message": "internal error"})),
    )
        .into_response()
}

/// GET /api/tasks - account status overview plus recent thread picks.
async fn tasks(State(state): State<AppState>) -> Response {
    let pool = state.db.pool();

    let accounts = match db::list_accounts(pool).await {
        Ok(accounts) => accounts,
        Err(e) => return internal_error(&e),
    };

    let mut summaries = Vec::with_capacity(accounts.len());
    for account in &accounts {
        let account_state = match db::get_account_state(pool, account.id).await {
            Ok(s) => s,
            Err(e) => return internal_error(&e),
        };
        summaries.push(json!({
            "id": account.id,
            "name": account.name,
            "remark": account.remark,
            "username": account.username,
            "has_cookies": account.cookie_string.as_deref().is_some_and(|c| !c.is_empty()),
            "last_login_ok": account_state.as_ref().and_then(|s| s.last_login_ok),
            "last_login_at": account_state.as_ref().and_then(|s| s.last_login_at.clone()),
            "last_checkin_ok": account_state.as_ref().and_then(|s| s.last_checkin_ok),
            "last_checkin_msg": account_state.as_ref().and_then(|s| s.last_checkin_msg.clone()),
            "last_checkin_at": account_state.and_then(|s| s.last_checkin_at),
        }));
    }

    let recent = match db::list_recent_used_threads(pool, 20).await {
        Ok(recent) => recent,
        Err(e) => return internal_error(&e),
    };

    Json(json!({
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "accounts": summaries,
        "recent_threads": recent,
    }))
    .into_response()
}

/// POST /api/run/checkin - login + check-in with the global site credentials.
async fn run_checkin(State(state): State<AppState>) -> Response {
    let config = &state.config;
    if config.site_base_url.is_empty() || config.site_username.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"ok": false, "message": "site base_url/username/password not configured"})),
        )
            .into_response();
    }

    let runner = match Runner::new(config, state.db.clone()) {
        Ok(runner) => runner,
        Err(e) => return internal_error(&e),
    };
    match runner.run_all().await {
        Ok(summary) if summary.login_ok => {
            Json(json!({"ok": summary.checkin.ok, "message": summary.checkin.message}))
                .into_response()
        }
        Ok(_) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"ok": false, "message": "登录失败"})),
        )
            .into_response(),
        Err(e) => internal_error(&e),
    }
}

#[derive(Debug, Default, Deserialize)]
struct RandomThreadRequest {
    fid: Option<u64>,
    fids: Option<Vec<u64>>,
    max_trials_per_forum: Option<usize>,
    max_pages_scan: Option<u32>,
}

/// POST /api/random-thread - pick an unused live thread at random.
///
/// Forum ids come from the request when given, otherwise from the configured
/// reply-forum whitelist. A random stored account runs the pick; with no
/// accounts the global credentials are used.
async fn random_thread(
    State(state): State<AppState>,
    body: Option<Json<RandomThreadRequest>>,
) -> Response {
    let request = body.map(|Json(r)| r).unwrap_or_default();

    let forum_ids: Vec<u64> = request.fid.map_or_else(
        || {
            request
                .fids
                .clone()
                .unwrap_or_else(|| state.config.bot_reply_forums.clone())
        },
        |fid| vec![fid],
    );
    if forum_ids.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "ok": false,
                "message": "no forum ids: provide fid/fids or set BOT_REPLY_FORUMS",
            })),
        )
            .into_response();
    }

    let max_trials = request
        .max_trials_per_forum
        .unwrap_or(state.config.picker_max_trials);
    let max_pages = request
        .max_pages_scan
        .unwrap_or(state.config.picker_max_pages);

    let accounts = match db::list_accounts(state.db.pool()).await {
        Ok(accounts) => accounts,
        Err(e) => return internal_error(&e),
    };
    let account = accounts.choose(&mut rand::thread_rng()).cloned();

    let runner = match account {
        Some(account) => Runner::for_account(&state.config, state.db.clone(), account),
        None => Runner::new(&state.config, state.db.clone()),
    };
    let runner = match runner {
        Ok(runner) => runner,
        Err(e) => return internal_error(&e),
    };

    match runner.login().await {
        Ok(true) => {}
        Ok(false) => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"ok": false, "message": "登录失败"})),
            )
                .into_response();
        }
        Err(e) => return internal_error(&e),
    }

    match runner.pick_random_thread(&forum_ids, max_trials, max_pages).await {
        Ok(Some(picked)) => {
            let account_info = runner.account().map(|a| {
                json!({
                    "id": a.id,
                    "username": a.username,
                    "remark": a.remark.as_deref().unwrap_or(&a.name),
                })
            });
            Json(json!({
                "ok": true,
                "fid": picked.fid,
                "tid": picked.tid,
                "url": runner.absolute_url(&picked.url),
                "account": account_info,
            }))
            .into_response()
        }
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "ok": false,
                "message": "未找到可用的新帖子（可能都被使用或需要更大页范围）",
            })),
        )
            .into_response(),
        Err(e) => internal_error(&e),
    }
}

/// GET /api/accounts - all stored accounts.
async fn list_accounts(State(state): State<AppState>) -> Response {
    match db::list_accounts(state.db.pool()).await {
        Ok(accounts) => Json(accounts).into_response(),
        Err(e) => internal_error(&e),
    }
}

/// POST /api/accounts - add an account.
async fn create_account(
    State(state): State<AppState>,
    Json(new_account): Json<NewAccount>,
) -> Response {
    match db::insert_account(state.db.pool(), &new_account).await {
        Ok(id) => Json(json!({"ok": true, "id": id})).into_response(),
        Err(e) => internal_error(&e),
    }
}

/// GET /api/accounts/:id - account with state, history, and profile.
async fn account_detail(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let pool = state.db.pool();
    let account = match db::get_account(pool, id).await {
        Ok(Some(account)) => account,
        Ok(None) => return account_not_found(),
        Err(e) => return internal_error(&e),
    };

    let account_state = match db::get_account_state(pool, id).await {
        Ok(s) => s,
        Err(e) => return internal_error(&e),
    };
    let history = match db::get_account_history(pool, id, 100).await {
        Ok(h) => h,
        Err(e) => return internal_error(&e),
    };
    let profile = match db::get_profile(pool, id).await {
        Ok(p) => p,
        Err(e) => return internal_error(&e),
    };

    Json(json!({
        "account": account,
        "state": account_state,
        "history": history,
        "profile": profile,
    }))
    .into_response()
}

/// PUT /api/accounts/:id - update an account's editable fields.
async fn update_account(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(updates): Json<NewAccount>,
) -> Response {
    match db::get_account(state.db.pool(), id).await {
        Ok(Some(_)) => {}
        Ok(None) => return account_not_found(),
        Err(e) => return internal_error(&e),
    }
    match db::update_account(state.db.pool(), id, &updates).await {
        Ok(()) => Json(json!({"ok": true})).into_response(),
        Err(e) => internal_error(&e),
    }
}

/// DELETE /api/accounts/:id
async fn remove_account(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    match db::delete_account(state.db.pool(), id).await {
        Ok(()) => Json(json!({"ok": true})).into_response(),
        Err(e) => internal_error(&e),
    }
}

/// POST /api/accounts/:id/run/checkin - login + check-in for one account.
async fn account_checkin(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let account = match db::get_account(state.db.pool(), id).await {
        Ok(Some(account)) => account,
        Ok(None) => return account_not_found(),
        Err(e) => return internal_error(&e),
    };

    let runner = match Runner::for_account(&state.config, state.db.clone(), account) {
        Ok(runner) => runner,
        Err(e) => return internal_error(&e),
    };
    match runner.run_all().await {
        Ok(summary) => Json(json!({
            "ok": summary.login_ok && summary.checkin.ok,
            "login_ok": summary.login_ok,
            "checkin_ok": summary.checkin.ok,
            "message": summary.checkin.message,
        }))
        .into_response(),
        Err(e) => internal_error(&e),
    }
}

/// POST /api/accounts/:id/run/profile - refresh the profile snapshot.
async fn account_profile(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let account = match db::get_account(state.db.pool(), id).await {
        Ok(Some(account)) => account,
        Ok(None) => return account_not_found(),
        Err(e) => return internal_error(&e),
    };

    let runner = match Runner::for_account(&state.config, state.db.clone(), account) {
        Ok(runner) => runner,
        Err(e) => return internal_error(&e),
    };

    match runner.login().await {
        Ok(true) => {}
        Ok(false) => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"ok": false, "message": "登录失败"})),
            )
                .into_response();
        }
        Err(e) => return internal_error(&e),
    }

    match runner.refresh_profile().await {
        Ok(Some(profile)) => Json(json!({
            "ok": true,
            "user_group": profile.user_group,
            "points": profile.points,
            "money": profile.money,
            "secoin": profile.secoin,
            "score": profile.score,
        }))
        .into_response(),
        Ok(None) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({"ok": false, "message": "获取资料失败"})),
        )
            .into_response(),
        Err(e) => internal_error(&e),
    }
}

fn account_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"ok": false, "message": "账号不存在"})),
    )
        .into_response()
}
