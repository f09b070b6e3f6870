//! Prompt templates for evaluation and arbitration calls.
//!
//! Provider-agnostic: renders messages, attachments are added by the caller.

use crate::gateway::{Attachment, Message};

// =============================================================================
// Templates
// =============================================================================

const VERDICT_SCHEMA: &str = "```json
{
    \"value\": \"<value>\",
    \"why\": \"<explanation>\",
    \"evidence\": \"<page, section, supporting quote>\"
}
```";

const EVALUATOR_SYSTEM: &str = "\
You are an expert in evaluating research papers. You are given:
1. A codebook for a specific evaluation metric (definition, possible values, and criteria).
2. The full text of a research paper.

Your task is to evaluate the method proposed in the paper against the specified metric:
- Base your reasoning strictly on the paper content.
- Focus on technical and methodological sections.
- Assign one of the allowed values from the codebook.
- Justify your choice with an explanation.
- Support it with direct evidence from the paper.

Output format: return a JSON object using this schema:
";

const ARBITER_SYSTEM: &str = "\
You are an expert resolving a disagreement between two assessments. You are given:
1. A codebook for a specific evaluation metric (definition, possible values, and fulfillment criteria).
2. The full text of a research paper.
3. Two assessments with conflicting verdicts.

Instructions:
- Review both assessments using the codebook and the paper.
- Assign one of the allowed values from the codebook.
- Justify your conclusion with an explanation.
- Support it with direct evidence from the paper.

Output format: return a JSON object using this schema:
";

/// Appended to the system prompt when the previous answer could not be parsed.
pub const CORRECTION_HINT: &str = "\n\nFailed to extract the JSON object from your previous \
response. Please ensure the response is a single JSON object in the correct format.";

// =============================================================================
// Rendering
// =============================================================================

/// Messages for one evaluator call.
pub fn evaluation_messages(
    metric_text: &str,
    document: Attachment,
    correction: Option<&str>,
) -> Vec<Message> {
    vec![
        Message::system(system_prompt(EVALUATOR_SYSTEM, correction)),
        Message::user(codebook_block(metric_text)).attach(document),
    ]
}

/// Messages for one arbitration call; both evaluator outputs are quoted raw.
pub fn arbitration_messages(
    metric_text: &str,
    document: Attachment,
    evaluator_a_raw: &str,
    evaluator_b_raw: &str,
    correction: Option<&str>,
) -> Vec<Message> {
    vec![
        Message::system(system_prompt(ARBITER_SYSTEM, correction)),
        Message::user(codebook_block(metric_text))
            .attach(document)
            .attach(Attachment::Text(format!(
                "Evaluator A:\n{}",
                evaluator_a_raw.trim()
            )))
            .attach(Attachment::Text(format!(
                "Evaluator B:\n{}",
                evaluator_b_raw.trim()
            ))),
    ]
}

fn system_prompt(base: &str, correction: Option<&str>) -> String {
    let mut prompt = format!("{base}{VERDICT_SCHEMA}");
    if let Some(hint) = correction {
        prompt.push_str(hint);
    }
    prompt
}

fn codebook_block(metric_text: &str) -> String {
    format!("Codebook:\n{}", metric_text.trim())
}
