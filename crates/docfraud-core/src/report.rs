use std::fmt::{self, Write};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::analysis::FraudAnalysis;
use crate::extraction::{empty_object, ExtractionMetadata, ExtractionResult};

/// Where the processed document came from. Serialized as a `file` or `url` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentSource {
    File(PathBuf),
    Url(String),
}

impl fmt::Display for DocumentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Url(url) => f.write_str(url),
        }
    }
}

/// Pipeline phase at which processing stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Extraction,
    Analysis,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Extraction => "extraction",
            Self::Analysis => "analysis",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSummary {
    pub text_length: usize,
    #[serde(with = "empty_object")]
    pub metadata: Option<ExtractionMetadata>,
}

/// Extraction block of the envelope: the full result after an analysis failure,
/// a summary after success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtractionReport {
    Full(ExtractionResult),
    Summary(ExtractionSummary),
}

/// Uniform result of processing one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub source: DocumentSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraction: Option<ExtractionReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fraud_analysis: Option<FraudAnalysis>,
}

impl ProcessingResult {
    pub fn extraction_failed(source: DocumentSource, error: String) -> Self {
        Self {
            success: false,
            stage: Some(Stage::Extraction),
            error: Some(error),
            source,
            extraction: None,
            fraud_analysis: None,
        }
    }

    pub fn analysis_failed(
        source: DocumentSource,
        error: String,
        extraction: ExtractionResult,
    ) -> Self {
        Self {
            success: false,
            stage: Some(Stage::Analysis),
            error: Some(error),
            source,
            extraction: Some(ExtractionReport::Full(extraction)),
            fraud_analysis: None,
        }
    }

    pub fn succeeded(
        source: DocumentSource,
        extraction: ExtractionSummary,
        analysis: FraudAnalysis,
    ) -> Self {
        Self {
            success: true,
            stage: None,
            error: None,
            source,
            extraction: Some(ExtractionReport::Summary(extraction)),
            fraud_analysis: Some(analysis),
        }
    }
}

/// Format styles supported when printing a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

/// Render a `ProcessingResult` in the desired format.
pub fn render_report(result: &ProcessingResult, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Human => render_human(result),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(result)?),
    }
}

fn render_human(result: &ProcessingResult) -> anyhow::Result<String> {
    let mut out = String::new();
    writeln!(out, "Document: {}", result.source)?;

    if !result.success {
        let stage = result
            .stage
            .map(|stage| stage.to_string())
            .unwrap_or_else(|| "unknown".into());
        writeln!(out, "Failed during {stage}: {}", result.error.as_deref().unwrap_or(""))?;
        return Ok(out);
    }

    if let Some(ExtractionReport::Summary(summary)) = &result.extraction {
        write!(out, "Extracted: {} chars", summary.text_length)?;
        if let Some(metadata) = &summary.metadata {
            write!(
                out,
                ", {} page(s), language {}, confidence {:.2}",
                metadata.page_count, metadata.language, metadata.confidence
            )?;
        }
        writeln!(out)?;
    }

    if let Some(analysis) = &result.fraud_analysis {
        writeln!(
            out,
            "Risk: {} (score {:.2}, confidence {:.2})",
            analysis.risk_level, analysis.risk_score, analysis.confidence
        )?;
        writeln!(out, "Justification: {}", analysis.justification)?;
        if !analysis.suspicious_elements.is_empty() {
            writeln!(out, "Suspicious elements:")?;
            for element in &analysis.suspicious_elements {
                writeln!(out, "  - {element}")?;
            }
        }
        if !analysis.recommendations.is_empty() {
            writeln!(out, "Recommendations:")?;
            for recommendation in &analysis.recommendations {
                writeln!(out, "  - {recommendation}")?;
            }
        }
    }

    Ok(out)
}

/// Persist a result as pretty-printed UTF-8 JSON, replacing any existing file.
pub fn save_result(result: &ProcessingResult, path: &Path) -> anyhow::Result<()> {
    let rendered = render_report(result, OutputFormat::Json)?;
    fs::write(path, rendered)
        .with_context(|| format!("failed to write result to {}", path.display()))?;
    tracing::info!(path = %path.display(), "result saved");
    Ok(())
}

pub fn load_result(path: &Path) -> anyhow::Result<ProcessingResult> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read result from {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("invalid result JSON in {}", path.display()))
}
