use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{fact::Fact, policy::TransformPolicy};

/// How a fact was located in the candidate text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    /// Case-insensitive occurrence of the fact text.
    Exact,
    /// Occurrence after punctuation and whitespace normalization.
    Normalized,
    /// Spacing-tolerant match of an immutable fact with identical numbers.
    Fuzzy,
    /// Approved paraphrase from the transform policy.
    Transform,
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric()
}

fn boundary_before(haystack: &str, start: usize, needle_first: char) -> bool {
    if !is_word_char(needle_first) {
        return true;
    }
    let mut preceding = haystack[..start].chars().rev();
    match preceding.next() {
        None => true,
        Some(c) if is_word_char(c) => false,
        // "5mg" must not match inside "2.5mg".
        Some('.' | ',') if needle_first.is_ascii_digit() => {
            !preceding.next().is_some_and(|c| c.is_ascii_digit())
        }
        Some(_) => true,
    }
}

fn boundary_after(haystack: &str, end: usize, needle_last: char) -> bool {
    if !is_word_char(needle_last) {
        return true;
    }
    let mut following = haystack[end..].chars();
    match following.next() {
        None => true,
        Some(c) if is_word_char(c) => false,
        Some('.' | ',') if needle_last.is_ascii_digit() => {
            !following.next().is_some_and(|c| c.is_ascii_digit())
        }
        Some(_) => true,
    }
}

/// Case-insensitive search for `needle` as a whole term of `haystack`.
///
/// The occurrence must not continue a word or number on either side, so
/// `oral` is not found in `moral` and `50mg` is not found in `150mg`.
#[must_use]
pub fn contains_term(haystack: &str, needle: &str) -> bool {
    let needle = needle.trim().to_lowercase();
    let (Some(first), Some(last)) = (needle.chars().next(), needle.chars().last()) else {
        return false;
    };
    let haystack = haystack.to_lowercase();
    haystack.match_indices(needle.as_str()).any(|(start, found)| {
        boundary_before(&haystack, start, first)
            && boundary_after(&haystack, start + found.len(), last)
    })
}

/// Lowercases, drops punctuation and collapses whitespace.
///
/// Decimal points, thousands separators and slashes between digits are kept
/// (`2.5`, `120/80`); `%` and `°` are kept; hyphens become spaces.
///
/// Whitespace is collapsed, never removed: `Q. D.` normalizes to `q d` and
/// does not match `q.d.`. Abbreviations split by the candidate count as
/// missing.
#[must_use]
pub fn normalize_for_match(text: &str) -> String {
    let chars: Vec<char> = text.to_lowercase().chars().collect();
    let mut out = String::with_capacity(chars.len());
    for (idx, &c) in chars.iter().enumerate() {
        let between_digits = idx > 0
            && chars[idx - 1].is_ascii_digit()
            && chars.get(idx + 1).is_some_and(char::is_ascii_digit);
        if c.is_alphanumeric() || c == '%' || c == '°' {
            out.push(c);
        } else if c.is_whitespace() || c == '-' || c == '_' {
            out.push(' ');
        } else if matches!(c, '.' | '/' | ',') && between_digits {
            out.push(c);
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, PartialEq)]
enum Token {
    Number(String),
    Word(String),
    Symbol(char),
}

fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() {
            let mut number = String::new();
            while let Some(&d) = chars.peek() {
                let decimal_point = matches!(d, '.' | ',')
                    && number.chars().last().is_some_and(|p| p.is_ascii_digit());
                if d.is_ascii_digit() || decimal_point {
                    number.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            while number.ends_with(['.', ',']) {
                number.pop();
            }
            tokens.push(Token::Number(number));
        } else if c.is_alphabetic() {
            let mut word = String::new();
            while let Some(&l) = chars.peek() {
                if l.is_alphabetic() {
                    word.push(l);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Word(word));
        } else {
            if matches!(c, '/' | '%' | '°') {
                tokens.push(Token::Symbol(c));
            }
            chars.next();
        }
    }
    tokens
}

/// Builds the spacing-tolerant pattern for an immutable fact.
///
/// Numbers are matched literally and may not be embedded in a longer number;
/// `°` is optional; tokens may be separated by whitespace or hyphens.
fn tolerant_pattern(text: &str) -> Option<Regex> {
    let tokens = tokenize(&text.to_lowercase());
    if tokens.is_empty() {
        return None;
    }
    let body = tokens
        .iter()
        .map(|token| match token {
            Token::Number(number) => regex::escape(number),
            Token::Word(word) => regex::escape(word),
            Token::Symbol('°') => "°?".to_string(),
            Token::Symbol(symbol) => regex::escape(&symbol.to_string()),
        })
        .collect::<Vec<_>>()
        .join(r"[\s-]*");
    let pattern = format!(r"(?i)(?:^|[^\p{{L}}\p{{N}}.,]|[^\d][.,]){body}(?:$|[^\p{{L}}\p{{N}}.,]|[.,](?:$|[^\d]))");
    Regex::new(&pattern).ok()
}

/// Spacing-tolerant match for immutable facts (`50 mg` vs `50mg`).
///
/// Quantities are never approximated: every number in the fact must appear
/// with the same digits.
#[must_use]
pub fn fuzzy_immutable_match(fact_text: &str, candidate: &str) -> bool {
    tolerant_pattern(fact_text).is_some_and(|regex| regex.is_match(candidate))
}

/// Runs the matching cascade for one fact.
///
/// Exact, then normalized, then fuzzy for immutable facts or transform
/// policy lookup for transformable ones.
#[must_use]
pub fn match_fact(fact: &Fact, candidate: &str, policy: &TransformPolicy) -> Option<MatchKind> {
    if contains_term(candidate, fact.text()) || contains_term(candidate, fact.surface()) {
        return Some(MatchKind::Exact);
    }
    let normalized_fact = normalize_for_match(fact.text());
    if !normalized_fact.is_empty() && contains_term(&normalize_for_match(candidate), &normalized_fact)
    {
        return Some(MatchKind::Normalized);
    }
    if fact.is_immutable() {
        return fuzzy_immutable_match(fact.text(), candidate).then_some(MatchKind::Fuzzy);
    }
    policy
        .is_transform_acceptable(fact.text(), candidate)
        .then_some(MatchKind::Transform)
}
