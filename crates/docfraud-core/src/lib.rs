pub mod analysis;
pub mod extraction;
pub mod pipeline;
pub mod preprocess;
pub mod report;
pub mod risk;
pub mod settings;

mod retry;

pub use analysis::{
    check_analysis_format, validate_analysis_format, AnalysisError, AnalysisResult,
    AzureChatClient, ChatCompletion, ChatMessage, ChatRequest, FraudAnalysis, FraudAnalyzer, Role,
    ValidationFailure,
};
pub use extraction::{
    mean_line_confidence, AnalyzedLayout, AzureDocumentClient, DocumentInput, DocumentService,
    ExtractionError, ExtractionMetadata, ExtractionResult, LayoutAnalyzer,
};
pub use pipeline::AntiFraudPipeline;
pub use report::{
    load_result, render_report, save_result, DocumentSource, ExtractionReport, ExtractionSummary,
    OutputFormat, ProcessingResult, Stage,
};
pub use risk::{RiskLevel, RiskThresholds};
pub use settings::{ConfigurationError, Settings};
