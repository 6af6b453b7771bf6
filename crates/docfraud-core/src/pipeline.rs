use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::analysis::{AzureChatClient, ChatCompletion, FraudAnalyzer};
use crate::extraction::{AzureDocumentClient, DocumentService, ExtractionResult, LayoutAnalyzer};
use crate::preprocess::prepare_text;
use crate::report::{DocumentSource, ExtractionSummary, ProcessingResult};
use crate::settings::Settings;

/// Two-stage orchestrator: extraction, then fraud analysis, stopping at the first failure.
pub struct AntiFraudPipeline<L: LayoutAnalyzer, C: ChatCompletion> {
    documents: DocumentService<L>,
    analyzer: FraudAnalyzer<C>,
    max_input_chars: usize,
}

impl AntiFraudPipeline<AzureDocumentClient, AzureChatClient> {
    /// Wire both Azure clients from loaded settings.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let documents = AzureDocumentClient::new(settings)
            .context("failed to build document intelligence client")?;
        let chat =
            AzureChatClient::new(settings).context("failed to build Azure OpenAI client")?;
        info!(
            document_endpoint = %settings.document_endpoint,
            deployment = %settings.openai_deployment,
            "pipeline initialized"
        );
        Ok(Self::new(
            DocumentService::new(documents),
            FraudAnalyzer::with_thresholds(chat, settings.thresholds),
        )
        .with_max_input_chars(settings.max_input_chars))
    }
}

impl<L: LayoutAnalyzer, C: ChatCompletion> AntiFraudPipeline<L, C> {
    pub fn new(documents: DocumentService<L>, analyzer: FraudAnalyzer<C>) -> Self {
        Self {
            documents,
            analyzer,
            max_input_chars: usize::MAX,
        }
    }

    pub fn with_max_input_chars(mut self, max_input_chars: usize) -> Self {
        self.max_input_chars = max_input_chars;
        self
    }

    #[instrument(skip(self, path), fields(file = %path.display()))]
    pub async fn process_document(&self, path: &Path) -> ProcessingResult {
        info!("processing document");
        let extraction = self.documents.extract_text_from_file(path).await;
        self.analyze(DocumentSource::File(path.to_path_buf()), extraction)
            .await
    }

    #[instrument(skip(self))]
    pub async fn process_document_url(&self, url: &str) -> ProcessingResult {
        info!("processing document url");
        let extraction = self.documents.extract_text_from_url(url).await;
        self.analyze(DocumentSource::Url(url.to_string()), extraction)
            .await
    }

    async fn analyze(&self, source: DocumentSource, extraction: ExtractionResult) -> ProcessingResult {
        let started = Instant::now();
        if !extraction.success {
            let error = extraction
                .error
                .unwrap_or_else(|| "unknown extraction error".to_string());
            return ProcessingResult::extraction_failed(source, error);
        }

        let text_length = extraction.text.chars().count();
        info!(chars = text_length, "text extracted");

        let prepared = prepare_text(&extraction.text, self.max_input_chars);
        let outcome = self
            .analyzer
            .analyze_prepared(&prepared, extraction.metadata.as_ref())
            .await;

        let analysis = match outcome.analysis {
            Some(analysis) if outcome.success => analysis,
            _ => {
                let error = outcome
                    .error
                    .unwrap_or_else(|| "unknown analysis error".to_string());
                warn!(error = %error, "analysis stage failed");
                return ProcessingResult::analysis_failed(source, error, extraction);
            }
        };

        info!(
            level = %analysis.risk_level,
            score = analysis.risk_score,
            elapsed = %humantime::format_duration(started.elapsed()),
            "processing complete"
        );
        ProcessingResult::succeeded(
            source,
            ExtractionSummary {
                text_length,
                metadata: extraction.metadata,
            },
            analysis,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::tests::{FakeChat, HIGH_RISK_REPLY};
    use crate::analysis::AnalysisError;
    use crate::extraction::tests::{layout, FakeAnalyzer};
    use crate::extraction::ExtractionError;
    use crate::report::{ExtractionReport, Stage};
    use crate::risk::RiskLevel;
    use std::sync::Arc;

    const INVOICE: &str = "Invoice #123, total R$500, date 2024-02-30";

    fn pipeline(
        extraction: Result<crate::extraction::AnalyzedLayout, ExtractionError>,
        chat: Arc<FakeChat>,
    ) -> AntiFraudPipeline<FakeAnalyzer, Arc<FakeChat>> {
        AntiFraudPipeline::new(
            DocumentService::new(FakeAnalyzer::returning(extraction)),
            FraudAnalyzer::new(chat),
        )
    }

    fn temp_document() -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"%PDF-1.4").unwrap();
        file
    }

    #[tokio::test]
    async fn successful_run_reports_high_risk() {
        let chat = Arc::new(FakeChat::replying(HIGH_RISK_REPLY));
        let pipeline = pipeline(Ok(layout(INVOICE)), Arc::clone(&chat));
        let file = temp_document();

        let result = pipeline.process_document(file.path()).await;

        assert!(result.success);
        assert_eq!(result.source, DocumentSource::File(file.path().to_path_buf()));
        let analysis = result.fraud_analysis.expect("analysis on success");
        assert_eq!(analysis.risk_level, RiskLevel::High);
        match result.extraction {
            Some(ExtractionReport::Summary(summary)) => {
                assert_eq!(summary.text_length, INVOICE.chars().count());
                assert_eq!(summary.metadata.unwrap().page_count, 2);
            }
            other => panic!("unexpected extraction block: {other:?}"),
        }
        assert_eq!(chat.call_count(), 1);
    }

    #[tokio::test]
    async fn missing_file_stops_before_analysis() {
        let chat = Arc::new(FakeChat::replying(HIGH_RISK_REPLY));
        let pipeline = pipeline(Ok(layout(INVOICE)), Arc::clone(&chat));
        let path = Path::new("/no/such/document.pdf");

        let result = pipeline.process_document(path).await;

        assert!(!result.success);
        assert_eq!(result.stage, Some(Stage::Extraction));
        assert!(result.error.is_some());
        assert_eq!(result.source, DocumentSource::File(path.to_path_buf()));
        assert!(result.extraction.is_none());
        assert_eq!(chat.call_count(), 0);
    }

    #[tokio::test]
    async fn analysis_failure_carries_full_extraction() {
        let chat = Arc::new(FakeChat::failing(|| {
            AnalysisError::MalformedResponse("not json".into())
        }));
        let pipeline = pipeline(Ok(layout(INVOICE)), chat);
        let file = temp_document();

        let result = pipeline.process_document(file.path()).await;

        assert!(!result.success);
        assert_eq!(result.stage, Some(Stage::Analysis));
        match result.extraction {
            Some(ExtractionReport::Full(extraction)) => {
                assert!(extraction.success);
                assert_eq!(extraction.text, INVOICE);
            }
            other => panic!("unexpected extraction block: {other:?}"),
        }
    }

    #[tokio::test]
    async fn url_processing_tags_source_as_url() {
        let chat = Arc::new(FakeChat::replying(HIGH_RISK_REPLY));
        let pipeline = pipeline(
            Err(ExtractionError::Service {
                status: 400,
                body: "unsupported format".into(),
            }),
            Arc::clone(&chat),
        );

        let result = pipeline
            .process_document_url("https://example.com/doc.pdf")
            .await;

        assert_eq!(
            result.source,
            DocumentSource::Url("https://example.com/doc.pdf".into())
        );
        assert_eq!(result.stage, Some(Stage::Extraction));
        assert!(result.error.unwrap().contains("unsupported format"));
        assert_eq!(chat.call_count(), 0);
    }

    #[tokio::test]
    async fn oversized_text_is_truncated_before_analysis() {
        let chat = Arc::new(FakeChat::replying(HIGH_RISK_REPLY));
        let pipeline = pipeline(Ok(layout(INVOICE)), Arc::clone(&chat)).with_max_input_chars(7);
        let file = temp_document();

        let result = pipeline.process_document(file.path()).await;

        assert!(result.success);
        let requests = chat.requests.lock().unwrap();
        let user_message = &requests[0].messages[1].content;
        assert!(user_message.contains("Invoice\n\n[Document truncated"));
        assert!(!user_message.contains("2024-02-30"));
        match &result.extraction {
            Some(ExtractionReport::Summary(summary)) => {
                assert_eq!(summary.text_length, INVOICE.chars().count())
            }
            other => panic!("unexpected extraction block: {other:?}"),
        }
    }
}
