pub mod azure;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, instrument};

pub use azure::AzureDocumentClient;

/// Document handed to the layout service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentInput {
    Bytes(Vec<u8>),
    Url(Url),
}

/// Subset of a layout-analysis response the extraction stage depends on.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AnalyzedLayout {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub pages: Vec<LayoutPage>,
    #[serde(default)]
    pub languages: Vec<DetectedLanguage>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LayoutPage {
    #[serde(default)]
    pub lines: Vec<LayoutLine>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LayoutLine {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DetectedLanguage {
    pub locale: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Remote document-understanding service: submit a document, await a terminal result.
#[async_trait]
pub trait LayoutAnalyzer: Send + Sync {
    async fn analyze(&self, input: DocumentInput) -> Result<AnalyzedLayout, ExtractionError>;
}

#[async_trait]
impl<T: LayoutAnalyzer + ?Sized> LayoutAnalyzer for Arc<T> {
    async fn analyze(&self, input: DocumentInput) -> Result<AnalyzedLayout, ExtractionError> {
        (**self).analyze(input).await
    }
}

/// Failure kinds surfaced by the extraction stage.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("failed to read document {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported document input: {0}")]
    UnsupportedInput(String),
    #[error("document service request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("document service rejected credentials ({status}): {body}")]
    Authentication { status: u16, body: String },
    #[error("document service error ({status}): {body}")]
    Service { status: u16, body: String },
    #[error("unexpected document service response: {0}")]
    MalformedResponse(String),
    #[error("document analysis failed: {0}")]
    Failed(String),
    #[error("document analysis did not finish within {0}")]
    Timeout(humantime::Duration),
}

impl ExtractionError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io { .. } => "io",
            Self::UnsupportedInput(_) => "unsupported_input",
            Self::Transport(_) => "transport",
            Self::Authentication { .. } => "authentication",
            Self::Service { .. } => "service",
            Self::MalformedResponse(_) => "malformed_response",
            Self::Failed(_) => "failed",
            Self::Timeout(_) => "timeout",
        }
    }
}

/// Derived facts about an extracted document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionMetadata {
    pub page_count: u32,
    pub language: String,
    pub confidence: f64,
}

impl ExtractionMetadata {
    pub fn from_layout(layout: &AnalyzedLayout) -> Self {
        Self {
            page_count: layout.pages.len() as u32,
            language: layout
                .languages
                .first()
                .map(|lang| lang.locale.clone())
                .unwrap_or_else(|| "unknown".to_string()),
            confidence: mean_line_confidence(&layout.pages),
        }
    }
}

/// Mean of every line-level confidence across all pages; `0.0` when none are present.
///
/// Only lines without a score are skipped. A line the service scored at exactly
/// `0.0` still counts toward the mean, so it is not treated as "missing".
pub fn mean_line_confidence(pages: &[LayoutPage]) -> f64 {
    let (total, count) = pages
        .iter()
        .flat_map(|page| page.lines.iter())
        .filter_map(|line| line.confidence)
        .fold((0.0, 0usize), |(total, count), value| (total + value, count + 1));
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}

/// Tagged outcome of the extraction stage. Failures never escape as errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub text: String,
    #[serde(with = "empty_object")]
    pub metadata: Option<ExtractionMetadata>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExtractionResult {
    pub fn succeeded(layout: AnalyzedLayout) -> Self {
        let metadata = ExtractionMetadata::from_layout(&layout);
        Self {
            text: layout.content,
            metadata: Some(metadata),
            success: true,
            error: None,
        }
    }

    pub fn failed(err: &ExtractionError) -> Self {
        Self {
            text: String::new(),
            metadata: None,
            success: false,
            error: Some(err.to_string()),
        }
    }
}

/// Serializes a missing metadata block as `{}`, matching the failure envelope.
pub(crate) mod empty_object {
    use serde::de::IgnoredAny;
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::ExtractionMetadata;

    pub fn serialize<S>(value: &Option<ExtractionMetadata>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(metadata) => metadata.serialize(serializer),
            None => serializer.serialize_map(Some(0))?.end(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<ExtractionMetadata>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Full(ExtractionMetadata),
            Empty(IgnoredAny),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Full(metadata) => Some(metadata),
            Repr::Empty(_) => None,
        })
    }
}

/// Extraction stage: reads or validates the input, calls the layout service,
/// and folds every failure into an [`ExtractionResult`].
pub struct DocumentService<L: LayoutAnalyzer> {
    analyzer: L,
}

impl<L: LayoutAnalyzer> DocumentService<L> {
    pub fn new(analyzer: L) -> Self {
        Self { analyzer }
    }

    #[instrument(skip(self, path), fields(path = %path.display()))]
    pub async fn extract_text_from_file(&self, path: &Path) -> ExtractionResult {
        info!("starting text extraction");
        let outcome = match tokio::fs::read(path).await {
            Ok(bytes) => self.analyzer.analyze(DocumentInput::Bytes(bytes)).await,
            Err(source) => Err(ExtractionError::Io {
                path: path.display().to_string(),
                source,
            }),
        };
        Self::finish(outcome)
    }

    #[instrument(skip(self))]
    pub async fn extract_text_from_url(&self, url: &str) -> ExtractionResult {
        info!("starting text extraction from url");
        let outcome = match parse_document_url(url) {
            Ok(url) => self.analyzer.analyze(DocumentInput::Url(url)).await,
            Err(err) => Err(err),
        };
        Self::finish(outcome)
    }

    fn finish(outcome: Result<AnalyzedLayout, ExtractionError>) -> ExtractionResult {
        match outcome {
            Ok(layout) => {
                let result = ExtractionResult::succeeded(layout);
                if let Some(metadata) = &result.metadata {
                    info!(
                        pages = metadata.page_count,
                        language = %metadata.language,
                        confidence = metadata.confidence,
                        "extraction complete"
                    );
                }
                result
            }
            Err(err) => {
                error!(kind = err.kind(), error = %err, "text extraction failed");
                ExtractionResult::failed(&err)
            }
        }
    }
}

fn parse_document_url(raw: &str) -> Result<Url, ExtractionError> {
    let url = Url::parse(raw)
        .map_err(|err| ExtractionError::UnsupportedInput(format!("invalid url `{raw}`: {err}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ExtractionError::UnsupportedInput(format!(
            "url scheme `{other}` is not supported"
        ))),
    }
}
