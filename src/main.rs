use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use discuz_bot::config::Config;
use discuz_bot::db::{self, Database};
use discuz_bot::runner::Runner;
use discuz_bot::web;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    info!("Starting discuz-bot");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(site = %config.site_base_url, "Configuration loaded");

    if let Some(parent) = config.database_path.parent() {
        tokio::fs::create_dir_all(parent).await.with_context(|| {
            format!("Failed to create database directory: {}", parent.display())
        })?;
    }

    let db = Database::new(&config.database_path)
        .await
        .context("Failed to initialize database")?;

    info!("Database initialized");

    let command = std::env::args().nth(1).unwrap_or_else(|| "serve".to_string());
    match command.as_str() {
        "serve" => serve(config, db).await,
        "checkin" => checkin_all(&config, db).await,
        "pick" => pick_one(&config, db).await,
        other => anyhow::bail!("unknown command: {other} (expected serve, checkin, or pick)"),
    }
}

/// Run the admin API server until interrupted.
async fn serve(config: Config, db: Database) -> Result<()> {
    let web_handle = tokio::spawn(async move {
        if let Err(e) = web::serve(config, db).await {
            error!("Web server error: {e:#}");
        }
    });

    shutdown_signal().await;

    info!("Shutting down...");
    web_handle.abort();
    info!("Shutdown complete");

    Ok(())
}

/// Run login + check-in for every stored account, or for the global site
/// credentials when no accounts exist.
async fn checkin_all(config: &Config, db: Database) -> Result<()> {
    let accounts = db::list_accounts(db.pool()).await?;

    if accounts.is_empty() {
        let runner = Runner::new(config, db)?;
        let summary = runner.run_all().await?;
        info!(
            login_ok = summary.login_ok,
            checkin_ok = summary.checkin.ok,
            message = %summary.checkin.message,
            "Global check-in finished"
        );
        if !(summary.login_ok && summary.checkin.ok) {
            anyhow::bail!("check-in failed");
        }
        return Ok(());
    }

    let total = accounts.len();
    let mut failures = 0usize;
    for account in accounts {
        let name = account.name.clone();
        let runner = Runner::for_account(config, db.clone(), account)?;
        let summary = runner.run_all().await?;
        if summary.login_ok {
            // Best effort; the check-in result stands either way.
            if let Err(e) = runner.refresh_profile().await {
                warn!(account = %name, "Profile refresh failed: {e:#}");
            }
        }
        if !(summary.login_ok && summary.checkin.ok) {
            failures += 1;
        }
        info!(
            account = %name,
            login_ok = summary.login_ok,
            checkin_ok = summary.checkin.ok,
            message = %summary.checkin.message,
            "Account check-in finished"
        );
    }

    if failures == total {
        anyhow::bail!("all {total} account check-ins failed");
    }
    Ok(())
}

/// Pick one random unused thread from the configured reply forums and print
/// it as JSON.
async fn pick_one(config: &Config, db: Database) -> Result<()> {
    if config.bot_reply_forums.is_empty() {
        anyhow::bail!("BOT_REPLY_FORUMS is empty; nothing to pick from");
    }

    let accounts = db::list_accounts(db.pool()).await?;
    let runner = match accounts.into_iter().next() {
        Some(account) => Runner::for_account(config, db, account)?,
        None => Runner::new(config, db)?,
    };

    if !runner.login().await? {
        anyhow::bail!("login failed");
    }

    let picked = runner
        .pick_random_thread(
            &config.bot_reply_forums,
            config.picker_max_trials,
            config.picker_max_pages,
        )
        .await?;

    match picked {
        Some(picked) => {
            println!(
                "{}",
                serde_json::json!({
                    "fid": picked.fid,
                    "tid": picked.tid,
                    "url": runner.absolute_url(&picked.url),
                })
            );
            Ok(())
        }
        None => anyhow::bail!("no unused live thread found in the configured forums"),
    }
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,discuz_bot=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
