//! Duplicate detection across a generation context.
//!
//! The seen set is built fresh per call from the session's current items
//! plus the old and new text of prior regeneration events (bounded to the
//! most recent 50 to keep the check cheap), then discarded. Matching is
//! exact on normalized text; no fuzzy matching.

use std::collections::HashSet;

use crate::domain::{GeneratedItem, RegenerationEvent};
use crate::util::normalize_for_compare;

pub const MAX_REGEN_EVENTS: usize = 50;

/// Build the normalized seen set for one generation context.
///
/// `regen_events` must be ordered most-recent-first; only the first
/// `MAX_REGEN_EVENTS` are considered.
pub fn build_seen_set(
  session_items: &[GeneratedItem],
  regen_events: &[RegenerationEvent],
) -> HashSet<String> {
  let mut seen = HashSet::new();
  for item in session_items {
    insert_text(&mut seen, &item.prompt_text);
  }
  for event in regen_events.iter().take(MAX_REGEN_EVENTS) {
    if let Some(old) = &event.old_item {
      insert_text(&mut seen, &old.prompt_text);
    }
    insert_text(&mut seen, &event.new_item.prompt_text);
  }
  seen
}

/// Add loose phrases (e.g. caller-supplied avoid lists) to a seen set.
pub fn extend_with_phrases<'a>(seen: &mut HashSet<String>, phrases: impl IntoIterator<Item = &'a str>) {
  for p in phrases {
    insert_text(seen, p);
  }
}

pub fn is_duplicate(item: &GeneratedItem, seen: &HashSet<String>) -> bool {
  seen.contains(&normalize_for_compare(&item.prompt_text))
}

fn insert_text(seen: &mut HashSet<String>, text: &str) {
  let n = normalize_for_compare(text);
  if !n.is_empty() {
    seen.insert(n);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Utc;

  use crate::domain::ItemType;

  fn item(text: &str) -> GeneratedItem {
    GeneratedItem {
      item_type: ItemType::ShortAnswer,
      prompt_text: text.into(),
      options: None,
      answer: "ans".into(),
      explanation: None,
    }
  }

  fn event(old: Option<&str>, new: &str) -> RegenerationEvent {
    RegenerationEvent {
      session_id: "s1".into(),
      index: 0,
      old_item: old.map(item),
      new_item: item(new),
      created_at: Utc::now(),
    }
  }

  #[test]
  fn matches_despite_case_and_punctuation() {
    let seen = build_seen_set(&[item("What is recursion?")], &[]);
    assert!(is_duplicate(&item("what IS recursion"), &seen));
    assert!(is_duplicate(&item("  What...is,recursion!?  "), &seen));
    assert!(!is_duplicate(&item("What is iteration?"), &seen));
  }

  #[test]
  fn regeneration_history_contributes_old_and_new_text() {
    let seen = build_seen_set(&[], &[event(Some("old phrasing"), "new phrasing")]);
    assert!(is_duplicate(&item("Old phrasing."), &seen));
    assert!(is_duplicate(&item("NEW phrasing"), &seen));
  }

  #[test]
  fn history_is_bounded_to_most_recent_fifty() {
    // Most-recent-first: events 0..60, only 0..50 should be kept.
    let events: Vec<RegenerationEvent> =
      (0..60).map(|i| event(None, &format!("question number {i}"))).collect();
    let seen = build_seen_set(&[], &events);
    assert!(is_duplicate(&item("question number 0"), &seen));
    assert!(is_duplicate(&item("question number 49"), &seen));
    assert!(!is_duplicate(&item("question number 50"), &seen));
    assert!(!is_duplicate(&item("question number 59"), &seen));
  }

  #[test]
  fn avoid_phrases_extend_the_set() {
    let mut seen = build_seen_set(&[], &[]);
    extend_with_phrases(&mut seen, ["Avoid THIS one!"]);
    assert!(is_duplicate(&item("avoid this one"), &seen));
  }

  #[test]
  fn no_fuzzy_matching() {
    let seen = build_seen_set(&[item("What is a base case in recursion?")], &[]);
    // One word off: not a duplicate under exact-normalized matching.
    assert!(!is_duplicate(&item("What is the base case in recursion?"), &seen));
  }
}
