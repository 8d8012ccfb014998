//! Service wiring and process lifetime.

use std::sync::Arc;

use log::{debug, info};

use crate::config::Config;
use crate::dify::DifyClient;
use crate::error::Result;
use crate::relay::RelayController;
use crate::slack::{SlackApi, socket};
use crate::store::ConversationStore;

/// Run the relay bot until interrupted.
pub async fn run() -> Result<()> {
    info!("Initializing bot");
    let config = Config::from_env()?;

    debug!("Opening conversation store");
    let store = ConversationStore::connect(&config.database_url).await?;

    debug!("Initializing Dify client");
    let dify = DifyClient::new(
        config.dify_api_key.clone(),
        &config.dify_api_url,
        config.dify_timeout,
    )?;

    debug!("Verifying Slack credentials");
    let slack = Arc::new(SlackApi::new(
        config.slack_bot_token.clone(),
        config.slack_app_token.clone(),
    )?);
    let bot_user_id = slack.auth_test().await?;
    info!("Slack connection successful: bot user id = {bot_user_id}");

    let controller = Arc::new(RelayController::new(dify, store, bot_user_id));

    info!("Starting Slack Socket Mode client");
    tokio::select! {
        () = socket::run(slack, controller) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, shutting down...");
        }
    }

    Ok(())
}
