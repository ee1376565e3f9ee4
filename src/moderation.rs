//! Stateless quality rules for generated text items.
//!
//! `review` inspects one item and returns the full set of issues (every rule
//! is evaluated, none short-circuit); `severity` folds the set into the
//! three-level tag the moderation loop branches on. Verdicts are derived
//! fresh per item and never persisted.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::domain::{GeneratedItem, ItemType};

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
  OffensiveOrStereotype,
  Ambiguous,
  Subjective,
  StructuralInvalid,
  TooLong,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
  None,
  Minor,
  Severe,
}

pub const MAX_PROMPT_CHARS: usize = 300;

/// Fixed denylist for the offensive rule. Matched on word boundaries after
/// lowercasing.
const DENYLIST: &[&str] = &[
  "idiot", "idiots", "stupid", "dumb", "moron", "morons", "retarded", "hate",
  "inferior", "superior race", "lazy race",
];

/// Hedging markers for the ambiguity rule. The first two are substring
/// matches (punctuation), the rest phrase matches.
const HEDGING_SUBSTRINGS: &[&str] = &["etc.", "..."];
const HEDGING_PHRASES: &[&str] =
  &["it depends", "generally", "usually", "no single correct answer"];

/// Comparative-opinion markers for the subjectivity rule.
const SUBJECTIVE_WORDS: &[&str] = &["better", "worse", "prettiest", "ugliest"];

/// Evaluate every rule against the item. All checks run; issues accumulate.
pub fn review(item: &GeneratedItem) -> BTreeSet<IssueKind> {
  let mut issues = BTreeSet::new();
  let text = item.prompt_text.to_lowercase();
  let words: Vec<&str> = text
    .split(|c: char| !c.is_alphanumeric())
    .filter(|w| !w.is_empty())
    .collect();

  if has_denylisted_token(&text, &words) || has_generalization_pattern(&words) {
    issues.insert(IssueKind::OffensiveOrStereotype);
  }

  if HEDGING_SUBSTRINGS.iter().any(|m| text.contains(m))
    || HEDGING_PHRASES.iter().any(|p| contains_phrase(&words, p))
  {
    issues.insert(IssueKind::Ambiguous);
  }

  if SUBJECTIVE_WORDS.iter().any(|w| words.contains(w)) {
    issues.insert(IssueKind::Subjective);
  }

  if !structure_is_valid(item) {
    issues.insert(IssueKind::StructuralInvalid);
  }

  if item.prompt_text.chars().count() > MAX_PROMPT_CHARS {
    issues.insert(IssueKind::TooLong);
  }

  issues
}

pub fn severity(issues: &BTreeSet<IssueKind>) -> Severity {
  if issues.contains(&IssueKind::OffensiveOrStereotype) {
    Severity::Severe
  } else if !issues.is_empty() {
    Severity::Minor
  } else {
    Severity::None
  }
}

fn has_denylisted_token(text: &str, words: &[&str]) -> bool {
  DENYLIST.iter().any(|d| {
    if d.contains(' ') {
      text.contains(d)
    } else {
      words.contains(d)
    }
  })
}

/// "all/most <group> are ..." generalization patterns.
fn has_generalization_pattern(words: &[&str]) -> bool {
  words.windows(3).any(|w| {
    (w[0] == "all" || w[0] == "most") && w[2] == "are"
  })
}

fn contains_phrase(words: &[&str], phrase: &str) -> bool {
  let parts: Vec<&str> = phrase.split(' ').collect();
  words.windows(parts.len()).any(|w| w == parts.as_slice())
}

/// Type-specific structural validity.
fn structure_is_valid(item: &GeneratedItem) -> bool {
  match item.item_type {
    ItemType::MultipleChoice => {
      let Some(options) = &item.options else { return false };
      if options.len() != 4 || options.iter().any(|o| o.trim().is_empty()) {
        return false;
      }
      let mut seen: Vec<String> = Vec::with_capacity(4);
      for o in options {
        let k = o.trim().to_lowercase();
        if seen.contains(&k) {
          return false;
        }
        seen.push(k);
      }
      matches!(item.answer.trim(), "A" | "B" | "C" | "D")
    }
    ItemType::TrueFalse => {
      matches!(item.answer.trim().to_lowercase().as_str(), "true" | "false")
    }
    ItemType::ShortAnswer => !item.answer.trim().is_empty(),
  }
}
