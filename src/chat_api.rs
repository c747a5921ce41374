use std::time::Duration;

use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

const ERROR_BODY_SNIPPET_LEN: usize = 220;
pub const SEND_MESSAGE_PATH: &str = "/api/v1/chat.sendMessage";
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";
pub const USER_ID_HEADER: &str = "X-User-Id";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChatApiDefaults;

impl ChatApiDefaults {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
}

#[derive(Clone, Debug)]
pub struct ChatApiClientOptions {
    pub connect_timeout: Duration,
    /// Whole-request bound; `None` leaves requests unbounded.
    pub request_timeout: Option<Duration>,
}

impl Default for ChatApiClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: ChatApiDefaults::CONNECT_TIMEOUT,
            request_timeout: None,
        }
    }
}

/// Credentials returned by a successful login, sent as headers on every
/// side-channel request.
#[derive(Clone, Debug)]
pub struct AuthSession {
    pub token: SecretString,
    pub user_id: String,
}

/// Chat message posted through the REST side-channel.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutgoingMessage {
    #[serde(rename = "_id")]
    pub id: String,
    pub rid: String,
    pub msg: String,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    message: &'a OutgoingMessage,
}

/// HTTPS client for the one write operation that bypasses the realtime
/// connection.
#[derive(Clone, Debug)]
pub struct ChatApiClient {
    http: Client,
    base_url: String,
    request_timeout: Option<Duration>,
}

impl ChatApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ChatApiError> {
        Self::with_options(base_url, ChatApiClientOptions::default())
    }

    pub fn with_options(
        base_url: impl Into<String>,
        options: ChatApiClientOptions,
    ) -> Result<Self, ChatApiError> {
        let http = Client::builder()
            .connect_timeout(options.connect_timeout)
            .build()
            .map_err(ChatApiError::Transport)?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            request_timeout: options.request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Posts `message` and returns the server's JSON response verbatim.
    pub async fn send_message(
        &self,
        auth: &AuthSession,
        message: &OutgoingMessage,
    ) -> Result<Value, ChatApiError> {
        let endpoint = format!("{}{}", self.base_url, SEND_MESSAGE_PATH);
        let mut builder = self
            .http
            .post(&endpoint)
            .header(AUTH_TOKEN_HEADER, auth.token.expose_secret())
            .header(USER_ID_HEADER, &auth.user_id)
            .json(&SendMessageRequest { message });

        if let Some(timeout) = self.request_timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(ChatApiError::Transport)?;
        let status = response.status();
        let body = response.text().await.map_err(ChatApiError::Transport)?;
        debug!(event = "chat_message_posted", message_id = %message.id, status = status.as_u16());

        if !status.is_success() {
            return Err(ChatApiError::HttpStatus {
                status,
                body: summarize_error_body(&body),
            });
        }

        serde_json::from_str(&body).map_err(|err| ChatApiError::Parse(err.to_string()))
    }
}

/// REST base URL for a server host; TLS on the default port.
pub fn rest_base_url(host: &str) -> String {
    format!("https://{host}")
}

#[derive(Debug, Error)]
pub enum ChatApiError {
    #[error("request failed: {0}")]
    Transport(reqwest::Error),

    #[error("http status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },

    #[error("failed to parse response: {0}")]
    Parse(String),
}

fn summarize_error_body(body: &str) -> String {
    #[derive(Debug, Deserialize)]
    struct ErrorBody {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        reason: Option<String>,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = parsed.error.or(parsed.message).or(parsed.reason) {
            return message;
        }
    }

    body.chars().take(ERROR_BODY_SNIPPET_LEN).collect()
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{
        rest_base_url, summarize_error_body, AuthSession, ChatApiClient, ChatApiError,
        OutgoingMessage, SEND_MESSAGE_PATH,
    };

    fn auth() -> AuthSession {
        AuthSession {
            token: SecretString::new("auth-token".to_string()),
            user_id: "user-1".to_string(),
        }
    }

    fn message() -> OutgoingMessage {
        OutgoingMessage {
            id: "m1".to_string(),
            rid: "GENERAL".to_string(),
            msg: "hello".to_string(),
        }
    }

    #[test]
    fn outgoing_message_uses_wire_field_names() {
        let value = serde_json::to_value(message()).expect("serialize");
        assert_eq!(value, json!({"_id": "m1", "rid": "GENERAL", "msg": "hello"}));
    }

    #[test]
    fn rest_base_url_uses_https() {
        assert_eq!(rest_base_url("chat.example.com"), "https://chat.example.com");
    }

    #[test]
    fn base_url_drops_trailing_slash() {
        let client = ChatApiClient::new("http://localhost:3000/").expect("build client");
        assert_eq!(client.base_url(), "http://localhost:3000");
    }

    #[test]
    fn error_body_prefers_error_field() {
        assert_eq!(
            summarize_error_body(r#"{"success":false,"error":"You must be logged in"}"#),
            "You must be logged in"
        );
        assert_eq!(summarize_error_body("plain failure"), "plain failure");
    }

    #[tokio::test]
    async fn send_message_posts_authenticated_body_and_returns_response() {
        let server = MockServer::start().await;
        let response = json!({"success": true, "message": {"_id": "m1", "rid": "GENERAL"}});
        Mock::given(method("POST"))
            .and(path(SEND_MESSAGE_PATH))
            .and(header("X-Auth-Token", "auth-token"))
            .and(header("X-User-Id", "user-1"))
            .and(body_json(
                json!({"message": {"_id": "m1", "rid": "GENERAL", "msg": "hello"}}),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(response.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let client = ChatApiClient::new(server.uri()).expect("build client");
        let result = client
            .send_message(&auth(), &message())
            .await
            .expect("send message");

        assert_eq!(result, response);
    }

    #[tokio::test]
    async fn send_message_surfaces_http_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SEND_MESSAGE_PATH))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"status": "error", "message": "You must be logged in to do this."})),
            )
            .mount(&server)
            .await;

        let client = ChatApiClient::new(server.uri()).expect("build client");
        let error = client
            .send_message(&auth(), &message())
            .await
            .expect_err("401 should fail");

        match error {
            ChatApiError::HttpStatus { status, body } => {
                assert_eq!(status.as_u16(), 401);
                assert_eq!(body, "You must be logged in to do this.");
            }
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_message_rejects_non_json_success_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(SEND_MESSAGE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = ChatApiClient::new(server.uri()).expect("build client");
        let error = client
            .send_message(&auth(), &message())
            .await
            .expect_err("non-json should fail");

        assert!(matches!(error, ChatApiError::Parse(_)));
    }
}
