use indexmap::IndexMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::verification::matcher::contains_term;

/// One approved paraphrase entry: a canonical source token and its accepted renderings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransformRule {
    /// Token as it appears in clinical text (`q.d.`, `PO`, `hypertension`).
    pub source: String,
    /// Plain-language renderings that count as the same fact.
    pub renderings: Vec<String>,
}

impl TransformRule {
    /// Creates a rule.
    #[must_use]
    pub fn new(source: &str, renderings: &[&str]) -> Self {
        Self {
            source: source.into(),
            renderings: renderings.iter().map(|r| (*r).to_string()).collect(),
        }
    }
}

/// Lookup key for a source token: lowercase, periods removed, whitespace collapsed.
///
/// `q.d.`, `QD` and `qd` all map to `qd`.
#[must_use]
pub fn policy_key(token: &str) -> String {
    token
        .to_lowercase()
        .split_whitespace()
        .map(|word| word.replace('.', ""))
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn builtin_rules() -> Vec<TransformRule> {
    vec![
        TransformRule::new("q.d.", &["once a day", "once daily", "every day", "daily"]),
        TransformRule::new(
            "b.i.d.",
            &["twice a day", "twice daily", "two times a day", "2 times a day"],
        ),
        TransformRule::new(
            "t.i.d.",
            &["three times a day", "three times daily", "3 times a day"],
        ),
        TransformRule::new(
            "q.i.d.",
            &["four times a day", "four times daily", "4 times a day"],
        ),
        TransformRule::new("q.h.s.", &["at bedtime", "every night", "nightly"]),
        TransformRule::new("p.r.n.", &["as needed", "when needed", "if needed"]),
        TransformRule::new("q.a.m.", &["every morning", "in the morning"]),
        TransformRule::new("q.p.m.", &["every evening", "in the evening"]),
        TransformRule::new("q4h", &["every 4 hours", "every four hours"]),
        TransformRule::new("q6h", &["every 6 hours", "every six hours"]),
        TransformRule::new("q8h", &["every 8 hours", "every eight hours"]),
        TransformRule::new("q12h", &["every 12 hours", "every twelve hours", "twice a day"]),
        TransformRule::new("once daily", &["once a day", "every day", "daily"]),
        TransformRule::new("twice daily", &["twice a day", "two times a day"]),
        TransformRule::new("daily", &["every day", "once a day"]),
        TransformRule::new("p.o.", &["by mouth", "orally", "oral"]),
        TransformRule::new(
            "i.v.",
            &["intravenous", "intravenously", "into a vein", "through a vein"],
        ),
        TransformRule::new("sc", &["subcutaneous", "under the skin"]),
        TransformRule::new("sq", &["subcutaneous", "under the skin"]),
        TransformRule::new("subcut", &["subcutaneous", "under the skin"]),
        TransformRule::new("subcutaneously", &["under the skin", "subcutaneous"]),
        TransformRule::new("i.m.", &["intramuscular", "into muscle", "into a muscle"]),
        TransformRule::new("intramuscularly", &["into muscle", "into a muscle"]),
        TransformRule::new("s.l.", &["under the tongue", "sublingual"]),
        TransformRule::new("hypertension", &["high blood pressure"]),
        TransformRule::new("hypotension", &["low blood pressure"]),
        TransformRule::new("bradycardia", &["slow heart rate", "slow heartbeat"]),
        TransformRule::new("tachycardia", &["fast heart rate", "fast heartbeat"]),
        TransformRule::new(
            "atrial fibrillation",
            &["irregular heartbeat", "irregular heart rhythm"],
        ),
        TransformRule::new("myocardial infarction", &["heart attack"]),
        TransformRule::new("dyspnea", &["shortness of breath", "trouble breathing"]),
        TransformRule::new("edema", &["swelling"]),
        TransformRule::new("syncope", &["fainting", "passing out"]),
        TransformRule::new("hyperlipidemia", &["high cholesterol"]),
        TransformRule::new("diabetes mellitus", &["diabetes"]),
        TransformRule::new("pyrexia", &["fever"]),
    ]
}

static BUILTIN: Lazy<TransformPolicy> = Lazy::new(|| TransformPolicy::from_rules(builtin_rules()));

/// Table of approved paraphrases consulted for transformable facts.
///
/// Built once and shared read-only across pipeline runs; later rules for the
/// same key extend the renderings of earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformPolicy {
    rules: IndexMap<String, TransformRule>,
}

impl TransformPolicy {
    /// Builds a policy from `rules`.
    #[must_use]
    pub fn from_rules(rules: impl IntoIterator<Item = TransformRule>) -> Self {
        let mut policy = Self::default();
        for rule in rules {
            policy.merge_rule(&rule);
        }
        policy
    }

    /// Built-in clinical paraphrase table.
    #[must_use]
    pub fn builtin() -> Self {
        BUILTIN.clone()
    }

    /// Built-in table extended with `extra`.
    #[must_use]
    pub fn builtin_with(extra: impl IntoIterator<Item = TransformRule>) -> Self {
        let mut policy = Self::builtin();
        for rule in extra {
            policy.merge_rule(&rule);
        }
        policy
    }

    fn merge_rule(&mut self, rule: &TransformRule) {
        let key = policy_key(&rule.source);
        if key.is_empty() {
            return;
        }
        let renderings: Vec<String> = rule
            .renderings
            .iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        let entry = self.rules.entry(key).or_insert_with(|| TransformRule {
            source: rule.source.clone(),
            renderings: Vec::new(),
        });
        for rendering in renderings {
            if !entry
                .renderings
                .iter()
                .any(|known| known.eq_ignore_ascii_case(&rendering))
            {
                entry.renderings.push(rendering);
            }
        }
    }

    /// Approved renderings for `token`, if the table has an entry.
    #[must_use]
    pub fn renderings(&self, token: &str) -> Option<&[String]> {
        self.rules
            .get(&policy_key(token))
            .map(|rule| rule.renderings.as_slice())
    }

    /// First approved rendering of `original` present in `candidate`.
    #[must_use]
    pub fn accepted_rendering<'a>(&'a self, original: &str, candidate: &str) -> Option<&'a str> {
        self.renderings(original)?
            .iter()
            .find(|rendering| contains_term(candidate, rendering))
            .map(String::as_str)
    }

    /// Whether `candidate` contains an approved rendering of `original`.
    ///
    /// Tokens without an entry are never acceptable.
    #[must_use]
    pub fn is_transform_acceptable(&self, original: &str, candidate: &str) -> bool {
        self.accepted_rendering(original, candidate).is_some()
    }

    /// Number of distinct source keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules in insertion order.
    pub fn rules(&self) -> impl Iterator<Item = &TransformRule> {
        self.rules.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_ignore_case_and_periods() {
        assert_eq!(policy_key("q.d."), "qd");
        assert_eq!(policy_key("QD"), "qd");
        assert_eq!(policy_key("B.I.D."), "bid");
        assert_eq!(policy_key("p.o."), "po");
        assert_eq!(policy_key("  Once   Daily "), "once daily");
        assert_eq!(policy_key("atrial fibrillation"), "atrial fibrillation");
    }

    #[test]
    fn accepts_listed_renderings() {
        let policy = TransformPolicy::builtin();
        assert!(policy.is_transform_acceptable("q.d.", "Take it once a day."));
        assert!(policy.is_transform_acceptable("QD", "Take it Once Daily."));
        assert!(policy.is_transform_acceptable("PO", "Swallow by mouth"));
        assert!(policy.is_transform_acceptable(
            "Hypertension",
            "for high blood pressure"
        ));
        assert_eq!(
            policy.accepted_rendering("b.i.d.", "twice a day with food"),
            Some("twice a day")
        );
    }

    #[test]
    fn rejects_unknown_tokens_and_absent_renderings() {
        let policy = TransformPolicy::builtin();
        assert!(!policy.is_transform_acceptable("q.o.d.", "every other day"));
        assert!(!policy.is_transform_acceptable("q.d.", "twice a day"));
        assert!(!policy.is_transform_acceptable("po", "a moral dilemma"));
    }

    #[test]
    fn paraphrase_outside_table_is_not_accepted() {
        let policy = TransformPolicy::builtin();
        assert!(!policy.is_transform_acceptable("hypertension", "your pressure runs high"));
    }

    #[test]
    fn extra_rules_merge_into_builtin() {
        let policy = TransformPolicy::builtin_with([
            TransformRule::new("q.o.d.", &["every other day"]),
            TransformRule::new("QD", &["each day"]),
        ]);
        assert!(policy.is_transform_acceptable("qod", "every other day"));
        assert!(policy.is_transform_acceptable("q.d.", "each day"));
        assert!(policy.is_transform_acceptable("q.d.", "once a day"));
        assert_eq!(policy.len(), TransformPolicy::builtin().len() + 1);
    }
}
