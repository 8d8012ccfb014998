//! Minimal Slack Web API client.

use log::debug;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::error::{BotError, Result};
use crate::types::Reply;

const SLACK_API_URL: &str = "https://slack.com/api";

#[derive(Debug, Deserialize)]
struct AuthTest {
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct ConnectionsOpen {
    url: String,
}

pub struct SlackApi {
    client: reqwest::Client,
    bot_token: String,
    app_token: String,
    base_url: String,
}

impl SlackApi {
    pub fn new(bot_token: String, app_token: String) -> Result<Self> {
        Self::with_base_url(bot_token, app_token, SLACK_API_URL)
    }

    pub fn with_base_url(bot_token: String, app_token: String, base_url: &str) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            bot_token,
            app_token,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Resolve the user id the bot token belongs to.
    pub async fn auth_test(&self) -> Result<String> {
        let auth: AuthTest = self.call("auth.test", &self.bot_token, None).await?;
        Ok(auth.user_id)
    }

    /// Request a fresh Socket Mode WebSocket URL.
    pub async fn open_connection(&self) -> Result<String> {
        let open: ConnectionsOpen = self
            .call("apps.connections.open", &self.app_token, None)
            .await?;
        Ok(open.url)
    }

    pub async fn post_message(&self, channel: &str, reply: &Reply) -> Result<()> {
        let mut body = json!({
            "channel": channel,
            "text": reply.text,
        });
        if let Some(thread_ts) = &reply.thread_ts {
            body["thread_ts"] = json!(thread_ts);
        }

        let _: Value = self
            .call("chat.postMessage", &self.bot_token, Some(&body))
            .await?;
        Ok(())
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        token: &str,
        body: Option<&Value>,
    ) -> Result<T> {
        debug!("Calling Slack API method {method}");
        let mut request = self
            .client
            .post(format!("{}/{method}", self.base_url))
            .bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let payload: Value = request.send().await?.error_for_status()?.json().await?;
        if payload.get("ok").and_then(Value::as_bool) != Some(true) {
            let message = payload
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(BotError::SlackApi {
                method: method.to_string(),
                message,
            });
        }

        Ok(serde_json::from_value(payload)?)
    }
}
