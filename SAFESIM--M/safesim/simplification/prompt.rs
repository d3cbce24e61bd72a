use crate::simplification::adapter::SimplificationRequest;

/// System prompt shared by the hosted backends.
pub const SYSTEM_PROMPT: &str = "You rewrite medical discharge summaries and clinical notes \
into plain language a patient can follow.

Rules:
1. Never drop or alter numbers: dosages, vital signs and measurements stay exactly as written.
2. Never drop medication names.
3. Never change the meaning of an instruction.
4. Replace jargon with everyday words (hypertension becomes high blood pressure).
5. Spell out abbreviations (PO becomes by mouth, q.d. becomes once a day).
6. Keep every safety-critical detail.

Reply with the simplified text only.";

fn quoted(values: &[String]) -> String {
    values
        .iter()
        .map(|value| format!("'{value}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// User prompt for a request, including the must-include list and any corrections.
#[must_use]
pub fn user_prompt(request: &SimplificationRequest) -> String {
    let mut prompt = format!("Simplify this medical text:\n\n{}", request.source_text.trim());
    if !request.must_include.is_empty() {
        prompt.push_str(&format!(
            "\n\nIMPORTANT: You MUST include these exact values in your simplified text: {}",
            quoted(&request.must_include)
        ));
    }
    let hints = request.hints();
    if !hints.is_empty() {
        prompt.push_str(
            "\n\nYour previous answer was rejected because required facts were missing. Fix it:",
        );
        for hint in hints {
            prompt.push_str("\n- ");
            prompt.push_str(hint);
        }
    }
    prompt
}

/// Single-string prompt for completion endpoints without a system role.
#[must_use]
pub fn completion_prompt(request: &SimplificationRequest) -> String {
    format!("{SYSTEM_PROMPT}\n\n{}\n\nSimplified text:", user_prompt(request))
}

/// Strips wrapping whitespace, code fences and a leading `Simplified text:` label.
#[must_use]
pub fn clean_completion(raw: &str) -> String {
    let mut text = raw.trim();
    if let Some(inner) = text.strip_prefix("```") {
        let inner = inner.split_once('\n').map_or("", |(_, rest)| rest);
        text = inner.strip_suffix("```").unwrap_or(inner).trim();
    }
    for label in ["Simplified text:", "Simplified:"] {
        if let Some(rest) = text.strip_prefix(label) {
            text = rest.trim_start();
        }
    }
    text.trim().to_string()
}
