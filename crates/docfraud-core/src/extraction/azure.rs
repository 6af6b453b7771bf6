use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};
use tracing::{debug, instrument, warn};

use super::{AnalyzedLayout, DocumentInput, ExtractionError, LayoutAnalyzer};
use crate::retry::Backoff;
use crate::settings::Settings;

const KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const OPERATION_LOCATION: &str = "operation-location";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Azure Document Intelligence client using the async analyze/poll REST flow.
#[derive(Debug, Clone)]
pub struct AzureDocumentClient {
    http: Client,
    analyze_url: String,
    api_key: String,
    max_retries: u32,
    timeout: Duration,
    poll_interval: Duration,
}

impl AzureDocumentClient {
    pub fn new(settings: &Settings) -> Result<Self, ExtractionError> {
        let analyze_url = format!(
            "{}/formrecognizer/documentModels/{}:analyze?api-version={}",
            settings.document_endpoint.trim_end_matches('/'),
            settings.document_model,
            settings.document_api_version
        );
        let http = Client::builder()
            .user_agent(concat!("docfraud/", env!("CARGO_PKG_VERSION")))
            .timeout(settings.timeout())
            .build()?;
        Ok(Self {
            http,
            analyze_url,
            api_key: settings.document_key.clone(),
            max_retries: settings.max_retry_attempts,
            timeout: settings.timeout(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Fallback wait between status polls when the service sends no `Retry-After`.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn submit_request(&self, input: &DocumentInput) -> RequestBuilder {
        let request = self.http.post(&self.analyze_url).header(KEY_HEADER, &self.api_key);
        match input {
            DocumentInput::Bytes(bytes) => request
                .header(CONTENT_TYPE, "application/octet-stream")
                .body(bytes.clone()),
            DocumentInput::Url(url) => request.json(&UrlSource {
                url_source: url.as_str(),
            }),
        }
    }

    async fn submit(&self, input: &DocumentInput) -> Result<String, ExtractionError> {
        let mut backoff = Backoff::new(self.max_retries);
        loop {
            let response = match self.submit_request(input).send().await {
                Ok(resp) => resp,
                Err(err) => {
                    warn!(attempt = backoff.attempt(), error = %err, "document submission failed");
                    if backoff.wait().await {
                        continue;
                    }
                    return Err(err.into());
                }
            };

            if response.status().is_server_error() && backoff.wait().await {
                warn!(status = %response.status(), "document service unavailable, retrying");
                continue;
            }
            let response = check_status(response).await?;

            return response
                .headers()
                .get(OPERATION_LOCATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| {
                    ExtractionError::MalformedResponse(
                        "missing Operation-Location header on analyze response".into(),
                    )
                });
        }
    }

    async fn poll(&self, operation_url: &str) -> Result<AnalyzedLayout, ExtractionError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let response = self
                .http
                .get(operation_url)
                .header(KEY_HEADER, &self.api_key)
                .send()
                .await?;
            let response = check_status(response).await?;
            let wait = retry_after(&response).unwrap_or(self.poll_interval);

            let operation: AnalyzeOperation = response
                .json()
                .await
                .map_err(|err| ExtractionError::MalformedResponse(err.to_string()))?;
            debug!(status = %operation.status, "polled analyze operation");

            match operation.status.as_str() {
                "succeeded" => {
                    return operation.analyze_result.ok_or_else(|| {
                        ExtractionError::MalformedResponse(
                            "succeeded operation carried no analyzeResult".into(),
                        )
                    })
                }
                "failed" | "canceled" => {
                    let message = operation
                        .error
                        .map(|err| format!("{}: {}", err.code, err.message))
                        .unwrap_or_else(|| format!("operation {}", operation.status));
                    return Err(ExtractionError::Failed(message));
                }
                _ => {}
            }

            if Instant::now() + wait > deadline {
                return Err(ExtractionError::Timeout(self.timeout.into()));
            }
            sleep(wait).await;
        }
    }
}

#[async_trait]
impl LayoutAnalyzer for AzureDocumentClient {
    #[instrument(skip_all)]
    async fn analyze(&self, input: DocumentInput) -> Result<AnalyzedLayout, ExtractionError> {
        let operation_url = self.submit(&input).await?;
        debug!(operation = %operation_url, "analyze operation accepted");
        self.poll(&operation_url).await
    }
}

async fn check_status(response: Response) -> Result<Response, ExtractionError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return Err(ExtractionError::Authentication {
            status: status.as_u16(),
            body,
        });
    }
    Err(ExtractionError::Service {
        status: status.as_u16(),
        body,
    })
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UrlSource<'a> {
    url_source: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeOperation {
    status: String,
    #[serde(default)]
    analyze_result: Option<AnalyzedLayout>,
    #[serde(default)]
    error: Option<ServiceError>,
}

#[derive(Deserialize)]
struct ServiceError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}
