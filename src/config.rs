use std::env;
use std::time::Duration;

use log::{debug, error, info};
use url::Url;

use crate::error::{BotError, Result};

const DEFAULT_DIFY_API_URL: &str = "https://api.dify.ai/v1";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct Config {
    pub slack_bot_token: String,
    pub slack_app_token: String,
    pub dify_api_key: String,
    pub dify_api_url: String,
    pub dify_timeout: Duration,
    pub database_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        debug!("Loading configuration from environment");
        dotenvy::dotenv().ok();

        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |name: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| {
                    error!("Failed to load {name} from environment");
                    BotError::Config(format!("Required environment variable {name} is not set"))
                })
        };

        let slack_bot_token = required("SLACK_BOT_TOKEN")?;
        let slack_app_token = required("SLACK_APP_TOKEN")?;
        let dify_api_key = required("DIFY_API_KEY")?;
        let database_url = required("DATABASE_URL")?;

        let dify_api_url = lookup("DIFY_API_URL")
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DIFY_API_URL.to_string());
        Url::parse(&dify_api_url)
            .map_err(|e| BotError::Config(format!("DIFY_API_URL is not a valid URL: {e}")))?;

        let dify_timeout = match lookup("DIFY_TIMEOUT_SECS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(BotError::Config(format!(
                        "DIFY_TIMEOUT_SECS must be a positive integer, got '{raw}'"
                    )));
                }
            },
            None => Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        };

        info!("Configuration loaded successfully");
        debug!("Slack bot token length: {} characters", slack_bot_token.len());
        debug!("Slack app token length: {} characters", slack_app_token.len());
        debug!("Dify API key length: {} characters", dify_api_key.len());
        debug!("Dify API URL: {dify_api_url}");
        debug!("Dify timeout: {}s", dify_timeout.as_secs());

        Ok(Self {
            slack_bot_token,
            slack_app_token,
            dify_api_key,
            dify_api_url,
            dify_timeout,
            database_url,
        })
    }
}
