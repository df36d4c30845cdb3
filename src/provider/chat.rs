//! OpenAI-compatible chat-completions client.

use std::fmt;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ProviderError, Role, post_json};
use crate::config::Config;

#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatMessage<'a>>,
    pub temperature: f64,
}

#[derive(Debug, Serialize)]
pub struct ChatMessage<'a> {
    pub role: Role,
    pub content: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ChatResponse {
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatReply,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ChatReply {
    pub content: Option<String>,
}

impl ChatResponse {
    /// Text of the first choice. Any other choices are ignored.
    pub fn into_first_content(self) -> Result<String, ProviderError> {
        self.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.unwrap_or_default())
            .ok_or(ProviderError::EmptyChoices)
    }
}

/// Sends one user message plus a system prompt and returns the reply text.
#[derive(Clone)]
pub struct ChatClient {
    http: Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f64,
}

impl fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .finish_non_exhaustive()
    }
}

impl ChatClient {
    pub fn new(http: Client, config: &Config) -> Self {
        Self {
            http,
            endpoint: config.api_endpoint.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
        }
    }

    /// Builds the request body. The user message goes first, the system
    /// prompt second; deployed prompts were tuned against that order.
    pub fn request<'a>(&'a self, user: &'a str, system: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: Role::User,
                    content: user,
                },
                ChatMessage {
                    role: Role::System,
                    content: system,
                },
            ],
            temperature: self.temperature,
        }
    }

    /// Runs one completion.
    ///
    /// # Errors
    ///
    /// Transport, status, and decode failures from [`post_json`], plus
    /// [`ProviderError::EmptyChoices`] when the provider returns no choices.
    pub async fn complete(&self, user: &str, system: &str) -> Result<String, ProviderError> {
        info!(model = %self.model, endpoint = %self.endpoint, "calling chat provider");
        let response: ChatResponse =
            post_json(&self.http, &self.endpoint, &self.api_key, &self.request(user, system))
                .await?;
        response.into_first_content()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{Value, json};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::provider::build_http_client;

    fn client_for(endpoint: String) -> ChatClient {
        let config = Config {
            api_key: "sk-test".to_owned(),
            model: "deepseek-chat".to_owned(),
            temperature: 0.3,
            api_endpoint: endpoint,
            ..Config::default()
        };
        ChatClient::new(build_http_client(Duration::from_secs(5)).unwrap(), &config)
    }

    #[test]
    fn request_shape() {
        let client = client_for("http://unused".to_owned());
        let body = serde_json::to_value(client.request("hello", "be brief")).unwrap();
        assert_eq!(
            body,
            json!({
                "model": "deepseek-chat",
                "messages": [
                    {"role": "user", "content": "hello"},
                    {"role": "system", "content": "be brief"}
                ],
                "temperature": 0.3
            })
        );
    }

    #[test]
    fn first_choice_wins() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [
                {"message": {"role": "assistant", "content": "first"}},
                {"message": {"role": "assistant", "content": "second"}}
            ]
        }))
        .unwrap();
        assert_eq!(response.into_first_content().unwrap(), "first");
    }

    #[test]
    fn missing_or_empty_choices() {
        let response: ChatResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(matches!(
            response.into_first_content(),
            Err(ProviderError::EmptyChoices)
        ));

        let response: ChatResponse =
            serde_json::from_value(json!({"error": {"message": "quota"}})).unwrap();
        assert!(matches!(
            response.into_first_content(),
            Err(ProviderError::EmptyChoices)
        ));
    }

    #[test]
    fn null_content_is_empty_text() {
        let response: ChatResponse =
            serde_json::from_value(json!({"choices": [{"message": {"content": null}}]})).unwrap();
        assert_eq!(response.into_first_content().unwrap(), "");
    }

    #[tokio::test]
    async fn complete_returns_first_choice_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "chatcmpl-1",
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "你好！"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(format!("{}/v1/chat/completions", server.uri()));
        let reply = client.complete("你好", "system").await.unwrap();
        assert_eq!(reply, "你好！");

        let requests = server.received_requests().await.unwrap();
        let sent: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(sent["messages"][0]["content"], "你好");
        assert_eq!(sent["messages"][1]["role"], "system");
    }

    #[tokio::test]
    async fn complete_fails_on_empty_choices() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let client = client_for(server.uri());
        let err = client.complete("hi", "").await.unwrap_err();
        assert!(matches!(err, ProviderError::EmptyChoices));
    }
}
