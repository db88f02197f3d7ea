use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as number: {source}")]
    ParseFloat {
        name: String,
        #[source]
        source: std::num::ParseFloatError,
    },
    #[error("failed to parse {name} as boolean: {value}")]
    ParseBool { name: String, value: String },
}

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/127.0 Safari/537.36";

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Site
    pub site_base_url: String,
    pub site_username: String,
    pub site_password: String,
    pub site_user_agent: String,
    pub site_proxy: Option<String>,

    // Database
    pub database_path: PathBuf,

    // Web server
    pub web_host: String,
    pub web_port: u16,
    pub admin_password: Option<String>,

    // AI reply gateway (OpenAI-compatible)
    pub ai_api_key: Option<String>,
    pub ai_base_url: String,
    pub ai_model: String,
    pub ai_temperature: f32,
    pub ai_max_tokens: u32,

    // Bot policy
    pub bot_dry_run: bool,
    pub bot_signature: String,
    pub bot_daily_checkin_enabled: bool,
    /// Forums eligible for random reply targeting.
    pub bot_reply_forums: Vec<u64>,
    pub picker_max_trials: usize,
    pub picker_max_pages: u32,

    // Browser automation
    pub browser_enabled: bool,
    pub browser_headless: bool,
    pub chrome_path: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or
    /// invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Site
            site_base_url: required_env("SITE_BASE_URL")?
                .trim_end_matches('/')
                .to_string(),
            site_username: env_or_default("SITE_USERNAME", ""),
            site_password: env_or_default("SITE_PASSWORD", ""),
            site_user_agent: env_or_default("SITE_USER_AGENT", DEFAULT_USER_AGENT),
            site_proxy: optional_env("SITE_PROXY"),

            // Database
            database_path: PathBuf::from(env_or_default("DATABASE_PATH", "./data/bot.sqlite")),

            // Web server
            web_host: env_or_default("WEB_HOST", "0.0.0.0"),
            web_port: parse_env_u16("WEB_PORT", 8080)?,
            admin_password: optional_env("ADMIN_PASSWORD"),

            // AI
            ai_api_key: optional_env("AI_API_KEY"),
            ai_base_url: env_or_default("AI_BASE_URL", "https://api.openai.com/v1"),
            ai_model: env_or_default("AI_MODEL", "gpt-4o-mini"),
            ai_temperature: parse_env_f32("AI_TEMPERATURE", 0.5)?,
            ai_max_tokens: parse_env_u32("AI_MAX_TOKENS", 200)?,

            // Bot policy
            bot_dry_run: parse_env_bool("BOT_DRY_RUN", true)?,
            bot_signature: env_or_default("BOT_SIGNATURE", ""),
            bot_daily_checkin_enabled: parse_env_bool("BOT_DAILY_CHECKIN_ENABLED", true)?,
            bot_reply_forums: parse_forum_list(&env_or_default("BOT_REPLY_FORUMS", ""))?,
            picker_max_trials: parse_env_usize("PICKER_MAX_TRIALS", 12)?,
            picker_max_pages: parse_env_u32("PICKER_MAX_PAGES", 30)?,

            // Browser automation
            browser_enabled: parse_env_bool("BROWSER_ENABLED", false)?,
            browser_headless: parse_env_bool("BROWSER_HEADLESS", true)?,
            chrome_path: optional_env("CHROME_PATH"),
        })
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.site_base_url.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "SITE_BASE_URL".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if !self.site_base_url.starts_with("http://") && !self.site_base_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidValue {
                name: "SITE_BASE_URL".to_string(),
                message: "must start with http:// or https://".to_string(),
            });
        }
        if self.picker_max_trials == 0 {
            return Err(ConfigError::InvalidValue {
                name: "PICKER_MAX_TRIALS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.picker_max_pages == 0 {
            return Err(ConfigError::InvalidValue {
                name: "PICKER_MAX_PAGES".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// A minimal configuration for tests; no environment access.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            site_base_url: "http://forum.test".to_string(),
            site_username: "tester".to_string(),
            site_password: "secret".to_string(),
            site_user_agent: DEFAULT_USER_AGENT.to_string(),
            site_proxy: None,
            database_path: PathBuf::from(":memory:"),
            web_host: "127.0.0.1".to_string(),
            web_port: 0,
            admin_password: None,
            ai_api_key: None,
            ai_base_url: "http://ai.test/v1".to_string(),
            ai_model: "gpt-4o-mini".to_string(),
            ai_temperature: 0.5,
            ai_max_tokens: 200,
            bot_dry_run: true,
            bot_signature: String::new(),
            bot_daily_checkin_enabled: true,
            bot_reply_forums: Vec::new(),
            picker_max_trials: 12,
            picker_max_pages: 30,
            browser_enabled: false,
            browser_headless: true,
            chrome_path: None,
        }
    }
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u16(name: &str, default: u16) -> Result<u16, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_f32(name: &str, default: f32) -> Result<f32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseFloat {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::ParseBool {
                name: name.to_string(),
                value: val,
            }),
        },
        _ => Ok(default),
    }
}

/// Parse a comma-separated list of forum ids.
fn parse_forum_list(value: &str) -> Result<Vec<u64>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse().map_err(|e| ConfigError::ParseInt {
                name: "BOT_REPLY_FORUMS".to_string(),
                source: e,
            })
        })
        .collect()
}
