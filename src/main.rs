#[tokio::main]
async fn main() -> dify_slack_relay::error::Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("dify_slack_relay=info"),
    )
    .init();

    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        log::warn!("A TLS crypto provider was already installed");
    }

    log::info!("Starting Slack bot application");

    match dify_slack_relay::run().await {
        Ok(()) => {
            log::info!("Bot shut down successfully");
            Ok(())
        }
        Err(e) => {
            log::error!("Failed to start Slack app: {e}");
            Err(e)
        }
    }
}
