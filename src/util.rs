//! Small utility helpers used across modules.

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
/// This is intentionally simple (no nested/conditional logic).
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = tpl.to_string();
  for (k, v) in pairs {
    let needle = format!("{{{}}}", k);
    out = out.replace(&needle, v);
  }
  out
}

/// Normalize text for duplicate comparison: lowercase, collapse every
/// non-alphanumeric run to a single space, trim.
pub fn normalize_for_compare(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  let mut pending_space = false;
  for ch in s.chars() {
    if ch.is_alphanumeric() {
      if pending_space && !out.is_empty() {
        out.push(' ');
      }
      pending_space = false;
      for lc in ch.to_lowercase() {
        out.push(lc);
      }
    } else {
      pending_space = true;
    }
  }
  out
}

/// Normalize an image prompt before hashing: lowercase and collapse
/// whitespace runs. Punctuation is preserved (prompts are content).
pub fn normalize_prompt(s: &str) -> String {
  s.split_whitespace()
    .collect::<Vec<_>>()
    .join(" ")
    .to_lowercase()
}

/// Pull the first JSON object out of a model response. Providers sometimes
/// wrap the payload in ``` fences or prepend prose despite instructions.
pub fn extract_json_object(raw: &str) -> Result<serde_json::Value, String> {
  let mut s = raw.trim();
  if s.is_empty() {
    return Err("empty model response".into());
  }
  if s.starts_with("```") {
    s = s.trim_start_matches("```json").trim_start_matches("```");
    s = s.trim_end_matches("```").trim();
  }
  if !s.starts_with('{') {
    let start = s.find('{').ok_or("no JSON object in model response")?;
    let end = s.rfind('}').ok_or("no JSON object in model response")?;
    if end <= start {
      return Err("no JSON object in model response".into());
    }
    s = &s[start..=end];
  }
  serde_json::from_str(s).map_err(|e| format!("JSON parse error: {}", e))
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with huge request/response payloads.
#[allow(dead_code)]
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max { s.to_string() } else { format!("{}… ({} bytes total)", &s[..max], s.len()) }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn normalize_collapses_punctuation_and_case() {
    assert_eq!(normalize_for_compare("What is O(n log n)?!"), "what is o n log n");
    assert_eq!(normalize_for_compare("  spaced   out  "), "spaced out");
    assert_eq!(normalize_for_compare("¿Qué-es; esto?"), "qué es esto");
  }

  #[test]
  fn prompt_normalization_keeps_punctuation() {
    assert_eq!(normalize_prompt("Quiz about\n  RECURSION!"), "quiz about recursion!");
  }

  #[test]
  fn json_extraction_handles_fences_and_prose() {
    let fenced = "```json\n{\"a\": 1}\n```";
    assert_eq!(extract_json_object(fenced).unwrap()["a"], 1);
    let prose = "Here you go:\n{\"b\": [2]} hope that helps";
    assert_eq!(extract_json_object(prose).unwrap()["b"][0], 2);
    assert!(extract_json_object("").is_err());
    assert!(extract_json_object("no json here").is_err());
  }
}
