//! Inbound events and outbound replies exchanged with the chat platform.

use serde::Deserialize;
use strum::EnumString;

/// An `app_mention` event as delivered by Slack.
///
/// Every field is optional so that incomplete events still deserialize and
/// can be answered with an apology instead of being dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MentionEvent {
    pub text: Option<String>,
    pub user: Option<String>,
    pub channel: Option<String>,
    pub ts: Option<String>,
    pub thread_ts: Option<String>,
}

impl MentionEvent {
    /// Thread the reply belongs to: the thread root if the mention was posted
    /// inside a thread, otherwise the mention itself.
    pub fn conversation_key(&self) -> Option<&str> {
        self.thread_ts.as_deref().or(self.ts.as_deref())
    }
}

/// A `/stats` slash command invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StatsCommand {
    pub user_id: String,
    #[serde(default)]
    pub text: Option<String>,
}

impl StatsCommand {
    pub fn scope(&self) -> StatsScope {
        self.text
            .as_deref()
            .map(str::trim)
            .and_then(|arg| arg.parse().ok())
            .unwrap_or(StatsScope::User)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum StatsScope {
    /// Statistics of the invoking user only
    #[strum(disabled)]
    User,
    /// Statistics across every user
    #[strum(serialize = "all")]
    Global,
}

/// Text to post back, bound to a thread when one is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub thread_ts: Option<String>,
}

impl Reply {
    pub fn new(text: impl Into<String>, thread_ts: Option<&str>) -> Self {
        Self {
            text: text.into(),
            thread_ts: thread_ts.map(str::to_string),
        }
    }
}
