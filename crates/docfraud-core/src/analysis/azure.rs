use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use super::{AnalysisError, ChatCompletion, ChatMessage, ChatRequest};
use crate::retry::Backoff;
use crate::settings::Settings;

#[derive(Debug, Clone)]
pub struct AzureChatClient {
    http: Client,
    url: String,
    api_key: String,
    max_retries: u32,
}

impl AzureChatClient {
    pub fn new(settings: &Settings) -> Result<Self, AnalysisError> {
        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            settings.openai_endpoint.trim_end_matches('/'),
            settings.openai_deployment,
            settings.openai_api_version
        );

        let http = Client::builder()
            .user_agent(concat!("docfraud/", env!("CARGO_PKG_VERSION")))
            .timeout(settings.timeout())
            .build()?;

        Ok(Self {
            http,
            url,
            api_key: settings.openai_key.clone(),
            max_retries: settings.max_retry_attempts,
        })
    }
}

#[async_trait]
impl ChatCompletion for AzureChatClient {
    #[instrument(skip_all)]
    async fn complete(&self, request: &ChatRequest) -> Result<String, AnalysisError> {
        let payload = ChatCompletionRequest {
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request
                .json_response
                .then_some(ResponseFormat { kind: "json_object" }),
        };

        let mut backoff = Backoff::new(self.max_retries);
        loop {
            let response = self
                .http
                .post(&self.url)
                .header("api-key", &self.api_key)
                .json(&payload)
                .send()
                .await;

            let response = match response {
                Ok(resp) => resp,
                Err(err) => {
                    warn!(attempt = backoff.attempt(), error = %err, "chat completion request failed");
                    if backoff.wait().await {
                        continue;
                    }
                    return Err(err.into());
                }
            };

            let status = response.status();
            if (status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS)
                && backoff.wait().await
            {
                warn!(%status, "completion service busy, retrying");
                continue;
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
                    return Err(AnalysisError::Authentication {
                        status: status.as_u16(),
                        body,
                    });
                }
                return Err(AnalysisError::Service {
                    status: status.as_u16(),
                    body,
                });
            }

            let chat: ChatCompletionResponse = response
                .json()
                .await
                .map_err(|err| AnalysisError::MalformedResponse(err.to_string()))?;
            return chat
                .choices
                .into_iter()
                .find_map(|choice| choice.message.content)
                .ok_or(AnalysisError::EmptyResponse);
        }
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Role;
    use httpmock::prelude::*;
    use std::collections::HashMap;

    const COMPLETIONS_PATH: &str = "/openai/deployments/deployment-name/chat/completions";

    fn base_settings(url: String, max_retries: u32) -> Settings {
        let vars: HashMap<String, String> = [
            ("AZURE_DOCUMENT_INTELLIGENCE_ENDPOINT", "http://unused"),
            ("AZURE_DOCUMENT_INTELLIGENCE_KEY", "unused"),
            ("AZURE_OPENAI_ENDPOINT", url.as_str()),
            ("AZURE_OPENAI_KEY", "test-key"),
            ("AZURE_OPENAI_DEPLOYMENT_NAME", "deployment-name"),
            ("TIMEOUT_SECONDS", "5"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let mut settings = Settings::from_map(vars).unwrap();
        settings.max_retry_attempts = max_retries;
        settings
    }

    fn request() -> ChatRequest {
        ChatRequest {
            messages: vec![
                ChatMessage {
                    role: Role::System,
                    content: "system".into(),
                },
                ChatMessage {
                    role: Role::User,
                    content: "user".into(),
                },
            ],
            temperature: 0.2,
            max_tokens: 1000,
            json_response: true,
        }
    }

    #[tokio::test]
    #[ignore = "requires loopback networking"]
    async fn complete_returns_message_content() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path(COMPLETIONS_PATH)
                .query_param("api-version", "2024-02-15-preview")
                .header("api-key", "test-key")
                .json_body(serde_json::json!({
                    "messages": [
                        {"role": "system", "content": "system"},
                        {"role": "user", "content": "user"}
                    ],
                    "temperature": 0.2,
                    "max_tokens": 1000,
                    "response_format": {"type": "json_object"}
                }));
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"choices":[{"message":{"content":"{\"risk_score\":0.1}"}}]}"#);
        });

        let client = AzureChatClient::new(&base_settings(server.base_url(), 0)).unwrap();
        let content = client.complete(&request()).await.unwrap();
        assert_eq!(content, r#"{"risk_score":0.1}"#);
        mock.assert();
    }

    #[tokio::test]
    #[ignore = "requires loopback networking"]
    async fn retries_on_failure() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path(COMPLETIONS_PATH);
            then.status(500);
        });

        let client = AzureChatClient::new(&base_settings(server.base_url(), 1)).unwrap();
        let err = client.complete(&request()).await.unwrap_err();
        assert_eq!(err.kind(), "service");
        mock.assert_hits(2);
    }

    #[tokio::test]
    #[ignore = "requires loopback networking"]
    async fn rejected_key_is_authentication_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path(COMPLETIONS_PATH);
            then.status(401).body("Access denied");
        });

        let client = AzureChatClient::new(&base_settings(server.base_url(), 2)).unwrap();
        let err = client.complete(&request()).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Authentication { status: 401, .. }));
    }

    #[tokio::test]
    #[ignore = "requires loopback networking"]
    async fn missing_content_is_empty_response() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path(COMPLETIONS_PATH);
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"choices":[{"message":{"content":null}}]}"#);
        });

        let client = AzureChatClient::new(&base_settings(server.base_url(), 0)).unwrap();
        let err = client.complete(&request()).await.unwrap_err();
        assert_eq!(err.kind(), "empty_response");
    }
}
