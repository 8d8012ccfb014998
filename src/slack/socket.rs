//! Socket Mode event loop.
//!
//! Every envelope is acknowledged as soon as it arrives. Mentions are relayed
//! on their own task and answered with `chat.postMessage`; `/stats` is
//! answered inside the acknowledgement itself.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::dify::AnswerSource;
use crate::error::Result;
use crate::relay::RelayController;
use crate::types::{MentionEvent, StatsCommand};

use super::SlackApi;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const STATS_COMMAND: &str = "/stats";

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, PartialEq)]
enum Inbound {
    Hello,
    Disconnect(String),
    Mention(MentionEvent),
    Stats(StatsCommand),
    Ignored(String),
}

fn classify(envelope: &Envelope) -> Inbound {
    match envelope.kind.as_str() {
        "hello" => Inbound::Hello,
        "disconnect" => Inbound::Disconnect(envelope.reason.clone().unwrap_or_default()),
        "events_api" => {
            let event = &envelope.payload["event"];
            if event["type"] != "app_mention" {
                return Inbound::Ignored(format!("event {}", event["type"]));
            }
            match serde_json::from_value(event.clone()) {
                Ok(mention) => Inbound::Mention(mention),
                Err(e) => Inbound::Ignored(format!("unreadable app_mention: {e}")),
            }
        }
        "slash_commands" => {
            let payload = &envelope.payload;
            if payload["command"] != STATS_COMMAND {
                return Inbound::Ignored(format!("command {}", payload["command"]));
            }
            match serde_json::from_value(payload.clone()) {
                Ok(command) => Inbound::Stats(command),
                Err(e) => Inbound::Ignored(format!("unreadable {STATS_COMMAND}: {e}")),
            }
        }
        other => Inbound::Ignored(other.to_string()),
    }
}

fn acknowledgement(envelope_id: &str, text: Option<&str>) -> String {
    match text {
        Some(text) => json!({"envelope_id": envelope_id, "payload": {"text": text}}),
        None => json!({"envelope_id": envelope_id}),
    }
    .to_string()
}

/// Serve Socket Mode forever, reconnecting after every dropped session.
pub async fn run<C>(api: Arc<SlackApi>, controller: Arc<RelayController<C>>)
where
    C: AnswerSource + Send + Sync + 'static,
{
    loop {
        match session(&api, &controller).await {
            Ok(()) => info!("Socket Mode session ended"),
            Err(e) => error!("Socket Mode session failed: {e}"),
        }
        debug!("Reconnecting in {}s", RECONNECT_DELAY.as_secs());
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

async fn session<C>(api: &Arc<SlackApi>, controller: &Arc<RelayController<C>>) -> Result<()>
where
    C: AnswerSource + Send + Sync + 'static,
{
    let url = api.open_connection().await?;
    let (socket, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
    info!("Connected to Slack Socket Mode");
    let (mut sink, mut stream) = socket.split();

    while let Some(message) = stream.next().await {
        let text = match message? {
            WsMessage::Text(text) => text,
            WsMessage::Close(frame) => {
                info!("Socket closed by Slack: {frame:?}");
                break;
            }
            _ => continue,
        };

        let envelope: Envelope = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping unreadable Socket Mode frame: {e}");
                continue;
            }
        };

        let inbound = classify(&envelope);
        let ack_text = match &inbound {
            Inbound::Stats(command) => Some(controller.handle_stats(command).await),
            _ => None,
        };
        if let Some(envelope_id) = &envelope.envelope_id {
            sink.send(WsMessage::Text(acknowledgement(
                envelope_id,
                ack_text.as_deref(),
            )))
            .await?;
        }

        match inbound {
            Inbound::Hello => info!("Socket Mode handshake complete"),
            Inbound::Disconnect(reason) => {
                info!("Slack requested disconnect ({reason})");
                break;
            }
            Inbound::Mention(event) => dispatch_mention(api, controller, event),
            Inbound::Stats(command) => info!("Answered stats command for {}", command.user_id),
            Inbound::Ignored(what) => debug!("Ignoring {what}"),
        }
    }

    Ok(())
}

fn dispatch_mention<C>(api: &Arc<SlackApi>, controller: &Arc<RelayController<C>>, event: MentionEvent)
where
    C: AnswerSource + Send + Sync + 'static,
{
    let api = Arc::clone(api);
    let controller = Arc::clone(controller);
    tokio::spawn(async move {
        let reply = controller.relay_mention(&event).await;
        let Some(channel) = event.channel.as_deref() else {
            warn!("Mention without channel, reply dropped: {event:?}");
            return;
        };
        match api.post_message(channel, &reply).await {
            Ok(()) => info!("Replied in channel {channel}"),
            Err(e) => error!("Failed to send reply to channel {channel}: {e}"),
        }
    });
}
