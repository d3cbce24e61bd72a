use std::collections::HashMap;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::{
    simplification::adapter::{AdapterError, SimplificationAdapter, SimplificationRequest},
    verification::matcher::contains_term,
};

const REPLACEMENTS: &[(&str, &str)] = &[
    ("hypertension", "high blood pressure"),
    ("hypotension", "low blood pressure"),
    ("orthostatic hypotension", "low blood pressure when standing"),
    ("bradycardia", "slow heart rate"),
    ("tachycardia", "fast heart rate"),
    ("atrial fibrillation", "irregular heartbeat"),
    ("myocardial infarction", "heart attack"),
    ("congestive heart failure", "heart failure"),
    ("hyperlipidemia", "high cholesterol"),
    ("q.d.", "once a day"),
    ("q.d", "once a day"),
    ("qd", "once a day"),
    ("b.i.d.", "twice a day"),
    ("b.i.d", "twice a day"),
    ("bid", "twice a day"),
    ("t.i.d.", "three times a day"),
    ("t.i.d", "three times a day"),
    ("tid", "three times a day"),
    ("q.i.d.", "four times a day"),
    ("q.i.d", "four times a day"),
    ("qid", "four times a day"),
    ("q4h", "every 4 hours"),
    ("q6h", "every 6 hours"),
    ("q8h", "every 8 hours"),
    ("q12h", "every 12 hours"),
    ("q.h.s.", "at bedtime"),
    ("qhs", "at bedtime"),
    ("p.r.n.", "as needed"),
    ("prn", "as needed"),
    ("p.o.", "by mouth"),
    ("po", "by mouth"),
    ("i.v.", "into a vein"),
    ("iv", "into a vein"),
    ("subcutaneous", "under the skin"),
    ("subcutaneously", "under the skin"),
    ("intramuscular", "into a muscle"),
    ("intramuscularly", "into a muscle"),
    ("sublingual", "under the tongue"),
    ("monitor for", "watch out for"),
    ("monitor", "watch"),
    ("administer", "give"),
    ("patient was prescribed", "you were given"),
    ("patient prescribed", "you were given"),
    ("prescribed", "given"),
    ("discontinue", "stop"),
    ("dyspnea", "shortness of breath"),
    ("dysuria", "painful urination"),
    ("nocturia", "frequent urination at night"),
    ("tachypnea", "rapid breathing"),
    ("hepatomegaly", "enlarged liver"),
    ("splenomegaly", "enlarged spleen"),
    ("edema", "swelling"),
    ("syncope", "fainting"),
    ("pyrexia", "fever"),
    ("photophobia", "sensitivity to light"),
    ("seizures", "convulsions"),
    ("delirium", "confusion"),
    ("neonate", "newborn baby"),
    ("the patient", "you"),
    ("patient", "you"),
];

struct ReplacementTable {
    regex: Regex,
    lookup: HashMap<String, &'static str>,
}

static TABLE: Lazy<ReplacementTable> = Lazy::new(|| {
    let mut terms: Vec<&(&str, &str)> = REPLACEMENTS.iter().collect();
    terms.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(b.0)));
    let alternation = terms
        .iter()
        .map(|(term, _)| {
            let mut piece = String::new();
            if term.starts_with(|c: char| c.is_alphanumeric()) {
                piece.push_str(r"\b");
            }
            piece.push_str(&regex::escape(term));
            if term.ends_with(|c: char| c.is_alphanumeric()) {
                piece.push_str(r"\b");
            }
            piece
        })
        .collect::<Vec<_>>()
        .join("|");
    ReplacementTable {
        regex: Regex::new(&format!("(?i)(?:{alternation})")).expect("replacement table compiles"),
        lookup: REPLACEMENTS
            .iter()
            .map(|(term, plain)| ((*term).to_string(), *plain))
            .collect(),
    }
});

static SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern compiles"));

fn match_case(original: &str, replacement: &str) -> String {
    let capitalized = original.starts_with(|c: char| c.is_uppercase())
        && !original
            .chars()
            .filter(|c| c.is_alphabetic())
            .all(char::is_uppercase);
    if capitalized {
        let mut chars = replacement.chars();
        chars.next().map_or_else(String::new, |first| {
            first.to_uppercase().chain(chars).collect()
        })
    } else {
        replacement.to_string()
    }
}

/// Replaces clinical jargon with plain wording, case-insensitively and longest term first.
#[must_use]
pub fn replace_jargon(text: &str) -> String {
    let table = &*TABLE;
    let replaced = table.regex.replace_all(text, |caps: &Captures<'_>| {
        let found = &caps[0];
        table
            .lookup
            .get(&found.to_lowercase())
            .map_or_else(|| found.to_string(), |plain| match_case(found, plain))
    });
    let replaced = replaced.replace(" should be ", " should ");
    SPACES.replace_all(replaced.trim(), " ").into_owned()
}

/// Deterministic backend used for tests and offline runs.
///
/// Applies a fixed jargon table, then appends any must-include value or
/// correction hint target that the rewrite does not already contain.
#[derive(Debug, Clone, Default)]
pub struct RuleBasedSimplifier;

impl RuleBasedSimplifier {
    /// Creates the simplifier.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Synchronous rewrite used by [`SimplificationAdapter::simplify`].
    #[must_use]
    pub fn rewrite(&self, request: &SimplificationRequest) -> String {
        let mut text = replace_jargon(&request.source_text);
        let required: Vec<&str> = request
            .must_include
            .iter()
            .map(String::as_str)
            .chain(request.hints().iter().map(|hint| hint_target(hint)))
            .filter(|value| !value.is_empty())
            .collect();
        let mut absent: Vec<&str> = Vec::new();
        for value in required {
            if !contains_term(&text, value) && !absent.contains(&value) {
                absent.push(value);
            }
        }
        if !absent.is_empty() {
            if !text.is_empty() && !text.ends_with(['.', '!', '?']) {
                text.push('.');
            }
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str("Keep in mind: ");
            text.push_str(&absent.join(", "));
            text.push('.');
        }
        text
    }
}

fn hint_target(hint: &str) -> &str {
    hint.split_once(':').map_or(hint, |(_, value)| value).trim()
}

#[async_trait]
impl SimplificationAdapter for RuleBasedSimplifier {
    fn name(&self) -> &str {
        "rule-based"
    }

    async fn simplify(&self, request: &SimplificationRequest) -> Result<String, AdapterError> {
        Ok(self.rewrite(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_jargon_longest_first() {
        assert_eq!(
            replace_jargon("Patient prescribed 50mg Atenolol PO q.d. for hypertension."),
            "You were given 50mg Atenolol by mouth once a day for high blood pressure."
        );
        assert_eq!(
            replace_jargon("History of orthostatic hypotension; monitor for syncope."),
            "History of low blood pressure when standing; watch out for fainting."
        );
        assert_eq!(
            replace_jargon("Patient was prescribed Lasix   b.i.d."),
            "You were given Lasix twice a day"
        );
    }

    #[test]
    fn leaves_embedded_abbreviations_alone() {
        assert_eq!(replace_jargon("Report improvement"), "Report improvement");
        assert_eq!(replace_jargon("Bidirectional tidal flow"), "Bidirectional tidal flow");
    }

    #[tokio::test]
    async fn appends_values_named_in_hints() {
        let request = SimplificationRequest::new("Take the tablet daily.", vec!["Tablet".into()])
            .with_corrections(vec!["include: 50mg".into(), "include: Atenolol".into()]);
        let output = RuleBasedSimplifier::new().simplify(&request).await.unwrap();
        assert_eq!(output, "Take the tablet daily. Keep in mind: 50mg, Atenolol.");
    }
}
