//! Relay pipeline - turns platform events into replies and persisted exchanges.

mod mention;
mod stats;

use crate::store::ConversationStore;

/// Reply to an event that carries no usable text or author.
pub const MALFORMED_EVENT_MESSAGE: &str = "申し訳ありません。メッセージを処理できませんでした。";

/// Reply when the pipeline fails outside the classified relay errors.
pub const SYSTEM_ERROR_MESSAGE: &str =
    "申し訳ありません。リクエストの処理中にエラーが発生しました。";

pub const STATS_FAILURE_MESSAGE: &str = "申し訳ありません。統計情報の取得に失敗しました。";

/// Handles mentions and stats commands.
///
/// Holds no per-event state, so a single instance can serve concurrent
/// events from different users.
pub struct RelayController<C> {
    client: C,
    store: ConversationStore,
    bot_user_id: String,
}

impl<C> RelayController<C> {
    pub fn new(client: C, store: ConversationStore, bot_user_id: impl Into<String>) -> Self {
        Self {
            client,
            store,
            bot_user_id: bot_user_id.into(),
        }
    }

    /// Strip the bot's own mention token and surrounding whitespace.
    fn extract_query(&self, text: &str) -> String {
        text.replace(&format!("<@{}>", self.bot_user_id), "")
            .trim()
            .to_string()
    }
}
