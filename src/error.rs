use thiserror::Error;

#[derive(Error, Debug)]
pub enum BotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    #[error("Slack API error ({method}): {message}")]
    SlackApi { method: String, message: String },
}

impl From<tokio_tungstenite::tungstenite::Error> for BotError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        BotError::WebSocket(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, BotError>;

/// Failure of a single relay call to the Dify API.
///
/// Every variant except `InvalidInput` is a classified outcome of a call that
/// was actually attempted. The wrapped cause is for logs only; users see
/// [`RelayError::user_message`].
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Query is empty")]
    InvalidInput,

    #[error("Dify API request timed out")]
    Timeout,

    #[error("Dify API connection failed: {0}")]
    Connection(#[source] reqwest::Error),

    #[error("Unexpected Dify API response format: {0}")]
    MalformedResponse(serde_json::Value),

    #[error("Unexpected error while calling Dify API: {0}")]
    Unexpected(String),
}

impl RelayError {
    /// Returns the fixed user-facing message for this failure
    pub fn user_message(&self) -> &'static str {
        match self {
            RelayError::InvalidInput => {
                "質問内容が空です。メンションに続けてメッセージを入力してください。"
            }
            RelayError::Timeout => {
                "応答がタイムアウトしました。しばらく待ってから再度お試しください。"
            }
            RelayError::Connection(_) => "APIサーバーとの接続に失敗しました。",
            RelayError::MalformedResponse(_) => "予期しない応答形式を受信しました。",
            RelayError::Unexpected(_) => "予期しないエラーが発生しました。",
        }
    }

    /// Short label used in log lines
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::InvalidInput => "invalid_input",
            RelayError::Timeout => "timeout",
            RelayError::Connection(_) => "connection",
            RelayError::MalformedResponse(_) => "malformed_response",
            RelayError::Unexpected(_) => "unexpected",
        }
    }

    /// Map a transport error, keeping timeouts apart from every other failure.
    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RelayError::Timeout
        } else {
            RelayError::Connection(err)
        }
    }
}
