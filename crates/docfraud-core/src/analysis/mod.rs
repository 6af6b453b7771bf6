pub mod azure;
mod prompts;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::extraction::ExtractionMetadata;
use crate::preprocess::PreparedText;
use crate::risk::{RiskLevel, RiskThresholds};

pub use azure::AzureChatClient;

const TEMPERATURE: f32 = 0.2;
const MAX_OUTPUT_TOKENS: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Provider-neutral chat-completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the service to constrain its output to a JSON object.
    pub json_response: bool,
}

/// Remote chat-completion service returning the content of one generated message.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<String, AnalysisError>;
}

#[async_trait]
impl<T: ChatCompletion + ?Sized> ChatCompletion for Arc<T> {
    async fn complete(&self, request: &ChatRequest) -> Result<String, AnalysisError> {
        (**self).complete(request).await
    }
}

/// Failure kinds surfaced by the analysis stage.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("completion service request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("completion service rejected credentials ({status}): {body}")]
    Authentication { status: u16, body: String },
    #[error("completion service error ({status}): {body}")]
    Service { status: u16, body: String },
    #[error("malformed analysis response: {0}")]
    MalformedResponse(String),
    #[error("completion service returned no message content")]
    EmptyResponse,
}

impl AnalysisError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Authentication { .. } => "authentication",
            Self::Service { .. } => "service",
            Self::MalformedResponse(_) => "malformed_response",
            Self::EmptyResponse => "empty_response",
        }
    }
}

/// Structured fraud assessment, with `risk_level` derived locally from `risk_score`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudAnalysis {
    pub risk_score: f64,
    pub justification: String,
    pub suspicious_elements: Vec<String>,
    pub recommendations: Vec<String>,
    pub confidence: f64,
    pub risk_level: RiskLevel,
}

/// Payload shape the model is instructed to produce.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ModelAssessment {
    risk_score: f64,
    justification: String,
    suspicious_elements: Vec<String>,
    recommendations: Vec<String>,
    confidence: f64,
}

impl FraudAnalysis {
    fn from_assessment(assessment: ModelAssessment, thresholds: &RiskThresholds) -> Self {
        Self {
            risk_level: thresholds.classify(assessment.risk_score),
            risk_score: assessment.risk_score,
            justification: assessment.justification,
            suspicious_elements: assessment.suspicious_elements,
            recommendations: assessment.recommendations,
            confidence: assessment.confidence,
        }
    }
}

/// Tagged outcome of the analysis stage. Failures never escape as errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub analysis: Option<FraudAnalysis>,
}

impl From<Result<FraudAnalysis, AnalysisError>> for AnalysisResult {
    fn from(outcome: Result<FraudAnalysis, AnalysisError>) -> Self {
        match outcome {
            Ok(analysis) => Self {
                success: true,
                error: None,
                analysis: Some(analysis),
            },
            Err(err) => Self {
                success: false,
                error: Some(err.to_string()),
                analysis: None,
            },
        }
    }
}

/// Structural problems found in a model payload.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationFailure {
    #[error("analysis payload is not a JSON object")]
    NotAnObject,
    #[error("analysis payload is missing `{0}`")]
    MissingField(&'static str),
    #[error("`risk_score` is not a number")]
    ScoreNotNumeric,
    #[error("`risk_score` {0} is outside 0.0..=1.0")]
    ScoreOutOfRange(f64),
    #[error("`{0}` is not a list")]
    NotAList(&'static str),
}

const REQUIRED_FIELDS: [&str; 4] = [
    "risk_score",
    "justification",
    "suspicious_elements",
    "recommendations",
];

/// Check a raw analysis payload against the required output schema.
pub fn check_analysis_format(analysis: &Value) -> Result<(), ValidationFailure> {
    let object = analysis.as_object().ok_or(ValidationFailure::NotAnObject)?;
    if let Some(missing) = REQUIRED_FIELDS.iter().find(|f| !object.contains_key(**f)) {
        return Err(ValidationFailure::MissingField(*missing));
    }
    let score = object["risk_score"]
        .as_f64()
        .ok_or(ValidationFailure::ScoreNotNumeric)?;
    if !(0.0..=1.0).contains(&score) {
        return Err(ValidationFailure::ScoreOutOfRange(score));
    }
    for field in ["suspicious_elements", "recommendations"] {
        if !object[field].is_array() {
            return Err(ValidationFailure::NotAList(field));
        }
    }
    Ok(())
}

/// Advisory form of [`check_analysis_format`].
pub fn validate_analysis_format(analysis: &Value) -> bool {
    check_analysis_format(analysis).is_ok()
}

/// Analysis stage: builds prompts, calls the completion service, and scores the reply.
pub struct FraudAnalyzer<C: ChatCompletion> {
    client: C,
    thresholds: RiskThresholds,
}

impl<C: ChatCompletion> FraudAnalyzer<C> {
    pub fn new(client: C) -> Self {
        Self::with_thresholds(client, RiskThresholds::default())
    }

    pub fn with_thresholds(client: C, thresholds: RiskThresholds) -> Self {
        Self { client, thresholds }
    }

    pub async fn analyze_fraud_risk(
        &self,
        document_text: &str,
        metadata: Option<&ExtractionMetadata>,
    ) -> AnalysisResult {
        self.analyze_prepared(&PreparedText::whole(document_text), metadata)
            .await
    }

    #[instrument(skip_all, fields(chars = document.text.len()))]
    pub async fn analyze_prepared(
        &self,
        document: &PreparedText<'_>,
        metadata: Option<&ExtractionMetadata>,
    ) -> AnalysisResult {
        info!("starting fraud analysis");
        let outcome = self.run(document, metadata).await;
        match &outcome {
            Ok(analysis) => info!(
                score = analysis.risk_score,
                level = %analysis.risk_level,
                "fraud analysis complete"
            ),
            Err(err) => error!(kind = err.kind(), error = %err, "fraud analysis failed"),
        }
        outcome.into()
    }

    async fn run(
        &self,
        document: &PreparedText<'_>,
        metadata: Option<&ExtractionMetadata>,
    ) -> Result<FraudAnalysis, AnalysisError> {
        let request = ChatRequest {
            messages: vec![
                ChatMessage {
                    role: Role::System,
                    content: prompts::SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: Role::User,
                    content: prompts::user_prompt(document, metadata),
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_OUTPUT_TOKENS,
            json_response: true,
        };

        let content = self.client.complete(&request).await?;
        let payload: Value = serde_json::from_str(&content).map_err(|err| {
            AnalysisError::MalformedResponse(format!("response is not valid JSON: {err}"))
        })?;

        if let Err(failure) = check_analysis_format(&payload) {
            warn!(reason = %failure, "analysis payload failed format validation; continuing");
        }

        let assessment: ModelAssessment = serde_json::from_value(payload).map_err(|err| {
            AnalysisError::MalformedResponse(format!("unexpected analysis shape: {err}"))
        })?;
        Ok(FraudAnalysis::from_assessment(assessment, &self.thresholds))
    }
}
