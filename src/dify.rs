//! Client for the Dify chat-messages API.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{BotError, RelayError};

/// Share of the timeout after which a call is reported as slow.
const SLOW_CALL_RATIO: f64 = 0.8;

/// Something that can turn a user query into an answer.
pub trait AnswerSource {
    fn answer(
        &self,
        query: &str,
        user_id: &str,
        conversation_key: Option<&str>,
    ) -> impl Future<Output = Result<String, RelayError>> + Send;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    inputs: Map<String, Value>,
    query: &'a str,
    user: &'a str,
    response_mode: &'static str,
    conversation_id: &'a str,
}

/// One message of a Dify conversation as returned by `GET /messages`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HistoryMessage {
    pub id: String,
    pub conversation_id: String,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
struct HistoryPage {
    #[serde(default)]
    data: Vec<HistoryMessage>,
}

/// Logs the duration of an API call when dropped, whatever the outcome.
struct CallTimer<'a> {
    endpoint: &'static str,
    started: Instant,
    slow_after: Duration,
    slow_calls: &'a AtomicUsize,
}

impl<'a> CallTimer<'a> {
    fn start(endpoint: &'static str, timeout: Duration, slow_calls: &'a AtomicUsize) -> Self {
        Self {
            endpoint,
            started: Instant::now(),
            slow_after: timeout.mul_f64(SLOW_CALL_RATIO),
            slow_calls,
        }
    }

    fn is_slow(&self, elapsed: Duration) -> bool {
        elapsed > self.slow_after
    }

    /// Log the elapsed time; returns whether the call counted as slow.
    fn report(&self) -> bool {
        let elapsed = self.started.elapsed();
        debug!(
            "Dify {} call finished in {:.2}s",
            self.endpoint,
            elapsed.as_secs_f64()
        );
        if !self.is_slow(elapsed) {
            return false;
        }
        warn!(
            "Slow Dify {} response: {:.2}s",
            self.endpoint,
            elapsed.as_secs_f64()
        );
        self.slow_calls.fetch_add(1, Ordering::Relaxed);
        true
    }
}

impl Drop for CallTimer<'_> {
    fn drop(&mut self) {
        self.report();
    }
}

#[derive(Debug, Clone)]
pub struct DifyClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
    slow_calls: Arc<AtomicUsize>,
}

impl DifyClient {
    pub fn new(api_key: String, base_url: &str, timeout: Duration) -> Result<Self, BotError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.trim_end_matches('/').to_string();
        info!("Dify API URL: {base_url}");

        Ok(Self {
            client,
            api_key,
            base_url,
            timeout,
            slow_calls: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Number of calls that took longer than 80% of the timeout.
    pub fn slow_call_count(&self) -> usize {
        self.slow_calls.load(Ordering::Relaxed)
    }

    /// Send one blocking chat request and return the answer text.
    ///
    /// Makes a single attempt. An empty query fails with
    /// [`RelayError::InvalidInput`] without touching the network.
    pub async fn call(
        &self,
        query: &str,
        user_id: &str,
        conversation_key: Option<&str>,
    ) -> Result<String, RelayError> {
        if query.trim().is_empty() {
            error!("Received empty query from user {user_id}");
            return Err(RelayError::InvalidInput);
        }

        let request = ChatRequest {
            inputs: Map::new(),
            query,
            user: user_id,
            response_mode: "blocking",
            conversation_id: conversation_key.unwrap_or_default(),
        };
        let url = format!("{}/chat-messages", self.base_url);

        let _timer = CallTimer::start("chat-messages", self.timeout, &self.slow_calls);
        info!("Dify API request started for user {user_id}");
        debug!("POST {url} (conversation_id='{}')", request.conversation_id);

        let payload = self
            .fetch_json(self.client.post(&url).json(&request))
            .await?;
        debug!("Dify API response: {payload}");

        extract_answer(payload)
    }

    /// Fetch the messages Dify holds for a conversation, oldest first.
    pub async fn conversation_messages(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<Vec<HistoryMessage>, RelayError> {
        let url = format!("{}/messages", self.base_url);

        let _timer = CallTimer::start("messages", self.timeout, &self.slow_calls);
        debug!("GET {url} for conversation {conversation_id}");

        let payload = self
            .fetch_json(
                self.client
                    .get(&url)
                    .query(&[("user", user_id), ("conversation_id", conversation_id)]),
            )
            .await?;

        match serde_json::from_value::<HistoryPage>(payload.clone()) {
            Ok(page) => Ok(page.data),
            Err(e) => {
                warn!("Unexpected conversation history format: {e}");
                Err(RelayError::MalformedResponse(payload))
            }
        }
    }

    /// A 2xx body that is not JSON at all is reported as
    /// [`RelayError::Unexpected`]; JSON without an answer is left to the caller.
    async fn fetch_json(&self, request: reqwest::RequestBuilder) -> Result<Value, RelayError> {
        let response = request
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(classify_transport)?;

        debug!("Dify API response status: {}", response.status());
        let response = response.error_for_status().map_err(classify_transport)?;

        let body = response.text().await.map_err(classify_transport)?;
        serde_json::from_str(&body).map_err(|e| {
            error!("Dify API returned a non-JSON body: {e}");
            RelayError::Unexpected(format!("invalid JSON body: {e}"))
        })
    }
}

impl AnswerSource for DifyClient {
    async fn answer(
        &self,
        query: &str,
        user_id: &str,
        conversation_key: Option<&str>,
    ) -> Result<String, RelayError> {
        self.call(query, user_id, conversation_key).await
    }
}

fn classify_transport(err: reqwest::Error) -> RelayError {
    if err.is_builder() {
        error!("Failed to build Dify API request: {err}");
        return RelayError::Unexpected(err.to_string());
    }
    let classified = RelayError::from_transport(err);
    match &classified {
        RelayError::Timeout => error!("Dify API request timed out"),
        other => error!("Dify API request error: {other}"),
    }
    classified
}

/// Pull the answer text out of a chat response, accepting the legacy
/// `message` field as well.
fn extract_answer(payload: Value) -> Result<String, RelayError> {
    for field in ["answer", "message"] {
        if let Some(Value::String(text)) = payload.get(field) {
            return Ok(text.clone());
        }
    }
    warn!("Unexpected response format: {payload}");
    Err(RelayError::MalformedResponse(payload))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::net::TcpListener;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    fn client_for(server: &MockServer, timeout: Duration) -> DifyClient {
        DifyClient::new("test-key".to_string(), &format!("{}/v1/", server.uri()), timeout)
            .expect("client")
    }

    async fn mount_chat(server: &MockServer, response: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path("/v1/chat-messages"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(response)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn returns_answer_verbatim() -> TestResult {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat-messages"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_json(json!({
                "inputs": {},
                "query": "what is 2+2",
                "user": "U1",
                "response_mode": "blocking",
                "conversation_id": "100.1",
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"answer": "  4\n", "conversation_id": "c1"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let answer = client_for(&server, Duration::from_secs(5))
            .call("what is 2+2", "U1", Some("100.1"))
            .await?;
        assert_eq!(answer, "  4\n");
        Ok(())
    }

    #[tokio::test]
    async fn missing_conversation_key_is_sent_as_empty_string() -> TestResult {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat-messages"))
            .and(body_json(json!({
                "inputs": {},
                "query": "hello",
                "user": "U1",
                "response_mode": "blocking",
                "conversation_id": "",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"answer": "ok"})))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server, Duration::from_secs(5))
            .call("hello", "U1", None)
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn accepts_legacy_message_field() -> TestResult {
        let server = MockServer::start().await;
        mount_chat(
            &server,
            ResponseTemplate::new(200).set_body_json(json!({"message": "legacy"})),
        )
        .await;

        let answer = client_for(&server, Duration::from_secs(5))
            .call("hi", "U1", None)
            .await?;
        assert_eq!(answer, "legacy");
        Ok(())
    }

    #[tokio::test]
    async fn payload_without_answer_is_malformed() -> TestResult {
        let payload = json!({"event": "message", "data": [1, 2]});
        let server = MockServer::start().await;
        mount_chat(&server, ResponseTemplate::new(200).set_body_json(payload.clone())).await;

        let result = client_for(&server, Duration::from_secs(5))
            .call("hi", "U1", None)
            .await;
        match result {
            Err(RelayError::MalformedResponse(raw)) => assert_eq!(raw, payload),
            other => panic!("expected malformed response, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn empty_query_never_reaches_network() -> TestResult {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"answer": "x"})))
            .expect(0)
            .mount(&server)
            .await;

        let result = client_for(&server, Duration::from_secs(5))
            .call("", "U1", Some("1.0"))
            .await;
        assert!(matches!(result, Err(RelayError::InvalidInput)));
        Ok(())
    }

    #[tokio::test]
    async fn slow_server_times_out_and_is_reported_slow() -> TestResult {
        let server = MockServer::start().await;
        mount_chat(
            &server,
            ResponseTemplate::new(200)
                .set_body_json(json!({"answer": "late"}))
                .set_delay(Duration::from_secs(5)),
        )
        .await;
        let client = client_for(&server, Duration::from_millis(200));

        let result = client.call("hi", "U1", None).await;
        assert!(matches!(result, Err(RelayError::Timeout)));
        assert_eq!(client.slow_call_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn fast_success_is_not_reported_slow() -> TestResult {
        let server = MockServer::start().await;
        mount_chat(
            &server,
            ResponseTemplate::new(200).set_body_json(json!({"answer": "quick"})),
        )
        .await;
        let client = client_for(&server, Duration::from_secs(5));

        client.call("hi", "U1", None).await?;
        assert_eq!(client.slow_call_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn refused_connection_is_connection_failure() -> TestResult {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let base_url = format!("http://{}/v1", listener.local_addr()?);
        drop(listener);

        let client = DifyClient::new("k".to_string(), &base_url, Duration::from_secs(5))?;
        let result = client.call("hi", "U1", None).await;
        assert!(matches!(result, Err(RelayError::Connection(_))));
        Ok(())
    }

    #[tokio::test]
    async fn error_status_is_connection_failure() -> TestResult {
        let server = MockServer::start().await;
        mount_chat(
            &server,
            ResponseTemplate::new(500)
                .set_body_json(json!({"code": "internal_error", "message": "boom"})),
        )
        .await;

        let result = client_for(&server, Duration::from_secs(5))
            .call("hi", "U1", None)
            .await;
        assert!(matches!(result, Err(RelayError::Connection(_))));
        Ok(())
    }

    #[tokio::test]
    async fn non_json_body_is_unexpected() -> TestResult {
        let server = MockServer::start().await;
        mount_chat(
            &server,
            ResponseTemplate::new(200).set_body_string("<html>oops</html>"),
        )
        .await;

        let result = client_for(&server, Duration::from_secs(5))
            .call("hi", "U1", None)
            .await;
        assert!(matches!(result, Err(RelayError::Unexpected(_))));
        Ok(())
    }

    #[tokio::test]
    async fn fetches_conversation_messages() -> TestResult {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/messages"))
            .and(query_param("user", "U1"))
            .and(query_param("conversation_id", "c1"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "limit": 20,
                "has_more": false,
                "data": [
                    {"id": "m1", "conversation_id": "c1", "query": "hi", "answer": "hello", "created_at": 1_700_000_000},
                ],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let messages = client_for(&server, Duration::from_secs(5))
            .conversation_messages("U1", "c1")
            .await?;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].answer, "hello");
        Ok(())
    }

    #[test]
    fn slow_threshold_is_eighty_percent_of_timeout() {
        let slow_calls = AtomicUsize::new(0);
        let timer = CallTimer::start("test", Duration::from_secs(30), &slow_calls);
        assert!(!timer.is_slow(Duration::from_secs(24)));
        assert!(timer.is_slow(Duration::from_millis(24_001)));
    }

    #[test]
    fn dropped_timer_counts_only_slow_calls() {
        let slow_calls = AtomicUsize::new(0);
        drop(CallTimer::start("test", Duration::from_secs(30), &slow_calls));
        assert_eq!(slow_calls.load(Ordering::Relaxed), 0);

        let timer = CallTimer::start("test", Duration::from_millis(10), &slow_calls);
        std::thread::sleep(Duration::from_millis(20));
        drop(timer);
        assert_eq!(slow_calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn answer_field_wins_over_message() {
        let answer = extract_answer(json!({"answer": "a", "message": "m"}));
        assert_eq!(answer.ok().as_deref(), Some("a"));
    }
}
