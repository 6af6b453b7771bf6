use crate::extraction::ExtractionMetadata;
use crate::preprocess::PreparedText;

pub(crate) const SYSTEM_PROMPT: &str = r#"You are an expert in detecting fraud in documents.

Your task is to analyze documents and identify potential signs of fraud.

Respond ONLY with a valid JSON object using exactly this structure:

{
    "risk_score": float between 0.0 and 1.0,
    "justification": "Detailed explanation of the analysis",
    "suspicious_elements": [
        "List of suspicious elements found"
    ],
    "recommendations": [
        "List of recommendations"
    ],
    "confidence": float between 0.0 and 1.0
}

Analysis criteria:
- Inconsistent or impossible dates
- Contradictory information
- Unusual formatting patterns
- Problems with tax identifiers (CNPJ/CPF)
- Suspicious amounts or quantities
- Irregular signatures or stamps
- Scan quality

Do not include any text outside the JSON."#;

pub(crate) fn user_prompt(document: &PreparedText<'_>, metadata: Option<&ExtractionMetadata>) -> String {
    let mut prompt = format!(
        "Analyze the following document for signs of fraud:\n\n{}",
        document.text
    );

    if let Some(original) = document.truncated_from {
        prompt.push_str(&format!(
            "\n\n[Document truncated: showing the first {} of {} characters]",
            document.text.chars().count(),
            original
        ));
    }

    if let Some(metadata) = metadata {
        if let Ok(rendered) = serde_json::to_string_pretty(metadata) {
            prompt.push_str("\n\nDocument metadata:\n");
            prompt.push_str(&rendered);
        }
    }

    prompt
}
