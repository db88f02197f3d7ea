//! Per-account orchestration: session, check-in, profile, replies.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::ai::ReplyGenerator;
use crate::client::{build_client, ActionOutcome, ForumClient, Profile};
use crate::config::Config;
use crate::db::{self, Account, Database};
use crate::picker::{self, PickedThread};

/// Outcome of a full login + check-in pass.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub login_ok: bool,
    pub checkin: ActionOutcome,
}

/// Drives one forum session, recording outcomes against the owning account.
pub struct Runner {
    config: Config,
    db: Database,
    client: Arc<dyn ForumClient>,
    account: Option<Account>,
}

impl Runner {
    /// Runner for the globally configured site credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if the forum client cannot be constructed.
    pub fn new(config: &Config, db: Database) -> Result<Self> {
        let client = build_client(config, None)?;
        Ok(Self {
            config: config.clone(),
            db,
            client,
            account: None,
        })
    }

    /// Runner bound to a stored account, honoring its overrides and cookies.
    ///
    /// # Errors
    ///
    /// Returns an error if the forum client cannot be constructed.
    pub fn for_account(config: &Config, db: Database, account: Account) -> Result<Self> {
        let client = build_client(config, Some(&account))?;
        Ok(Self {
            config: config.clone(),
            db,
            client,
            account: Some(account),
        })
    }

    #[must_use]
    pub fn account(&self) -> Option<&Account> {
        self.account.as_ref()
    }

    fn account_id(&self) -> Option<i64> {
        self.account.as_ref().map(|a| a.id)
    }

    fn credentials(&self) -> (String, String) {
        let username = self
            .account
            .as_ref()
            .and_then(|a| a.username.clone())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.config.site_username.clone());
        let password = self
            .account
            .as_ref()
            .and_then(|a| a.password.clone())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.config.site_password.clone());
        (username, password)
    }

    /// Establish a session. Cookie-bearing accounts are probed first so a
    /// still-valid cookie session never goes through the login form.
    ///
    /// # Errors
    ///
    /// Returns an error only when recording the outcome fails.
    pub async fn login(&self) -> Result<bool> {
        let has_cookies = self.account.as_ref().is_some_and(|a| {
            a.cookie_string
                .as_deref()
                .is_some_and(|c| !c.trim().is_empty())
        });

        let mut ok = false;
        if has_cookies {
            ok = self.client.check_logged_in().await;
        }
        if !ok {
            let (username, password) = self.credentials();
            if !username.is_empty() {
                ok = self.client.login(&username, &password).await;
            }
        }

        if let Some(id) = self.account_id() {
            db::record_account_login(self.db.pool(), id, ok).await?;
        }
        Ok(ok)
    }

    /// Run the daily check-in.
    ///
    /// # Errors
    ///
    /// Returns an error only when recording the outcome fails.
    pub async fn daily_checkin(&self) -> Result<ActionOutcome> {
        let outcome = self.client.try_checkin().await;
        if let Some(id) = self.account_id() {
            db::record_account_checkin(self.db.pool(), id, outcome.ok, &outcome.message).await?;
        }
        Ok(outcome)
    }

    /// Fetch and store the current profile snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error only when storing the snapshot fails.
    pub async fn refresh_profile(&self) -> Result<Option<Profile>> {
        let profile = self.client.fetch_profile().await;
        if let (Some(id), Some(p)) = (self.account_id(), profile.as_ref()) {
            db::upsert_profile(
                self.db.pool(),
                id,
                p.user_group.as_deref(),
                p.points,
                p.money,
                p.secoin,
                p.score,
            )
            .await?;
        }
        Ok(profile)
    }

    /// Generate an AI reply for the given context and post it to a thread.
    /// In dry-run mode the reply is generated but not posted.
    ///
    /// # Errors
    ///
    /// Returns an error if reply generation fails.
    pub async fn reply_topic(&self, tid: u64, context: &str) -> Result<ActionOutcome> {
        let generator = ReplyGenerator::new(&self.config)?;
        let message = generator
            .generate_reply(context, &self.config.bot_signature)
            .await?;

        if self.config.bot_dry_run {
            let preview: String = message.chars().take(60).collect();
            return Ok(ActionOutcome::success(format!(
                "[DRY-RUN] 将回复 tid={tid}: {preview}..."
            )));
        }
        Ok(self.client.reply(tid, &message).await)
    }

    /// Pick one random unused live thread from the given forums, marking it
    /// used in the shared ledger.
    ///
    /// # Errors
    ///
    /// Returns an error on ledger storage failures.
    pub async fn pick_random_thread(
        &self,
        forum_ids: &[u64],
        max_trials_per_forum: usize,
        max_pages_scan: u32,
    ) -> Result<Option<PickedThread>> {
        picker::pick_random_thread(
            self.client.as_ref(),
            &self.db,
            forum_ids,
            max_trials_per_forum,
            max_pages_scan,
        )
        .await
    }

    /// Resolve a picked URL to an absolute one for display.
    #[must_use]
    pub fn absolute_url(&self, path: &str) -> String {
        self.client.absolute_url(path)
    }

    /// Login followed by the daily check-in when enabled.
    ///
    /// # Errors
    ///
    /// Returns an error only when recording outcomes fails.
    pub async fn run_all(&self) -> Result<RunSummary> {
        let login_ok = self.login().await?;
        if !login_ok {
            if let Some(id) = self.account_id() {
                db::record_account_checkin(self.db.pool(), id, false, "登录失败").await?;
            }
            return Ok(RunSummary {
                login_ok,
                checkin: ActionOutcome::failure("登录失败"),
            });
        }

        let checkin = if self.config.bot_daily_checkin_enabled {
            self.daily_checkin().await?
        } else {
            ActionOutcome::failure("未启用")
        };

        info!(
            account = self.account.as_ref().map_or("<global>", |a| a.name.as_str()),
            login_ok,
            checkin_ok = checkin.ok,
            "Run complete"
        );
        Ok(RunSummary { login_ok, checkin })
    }
}
