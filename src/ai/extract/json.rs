//! JSON Extraction and Repair
//!
//! Recovers a JSON object from engine output. Handles:
//! - Markdown code fence wrapping (```json ... ```)
//! - JSON embedded in explanatory text (outermost `{...}` wins)
//! - Trailing commas
//! - Missing closing braces/brackets and truncated strings

use serde_json::Value;
use tracing::{debug, warn};

use crate::types::{ErrorCategory, Result, VerigenError};

/// Extract and parse JSON from an engine response
pub fn extract_json(content: &str) -> Result<Value> {
    JsonRepairer::new().parse_or_repair(content).map(|(value, _)| value)
}

/// JSON repair strategies
pub struct JsonRepairer {
    max_repair_attempts: usize,
}

impl Default for JsonRepairer {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonRepairer {
    pub fn new() -> Self {
        Self {
            max_repair_attempts: 3,
        }
    }

    /// Parse JSON, attempting extraction and repair if the direct parse fails.
    ///
    /// Returns (Value, was_repaired)
    pub fn parse_or_repair(&self, raw: &str) -> Result<(Value, bool)> {
        let cleaned = self.preprocess(raw);

        if let Ok(value) = serde_json::from_str::<Value>(&cleaned) {
            return Ok((value, false));
        }

        debug!("Initial JSON parse failed, attempting extraction and repair");

        let mut candidates = Vec::with_capacity(2);
        if let Some(extracted) = self.outermost_object(&cleaned) {
            if let Ok(value) = serde_json::from_str::<Value>(&extracted) {
                debug!("JSON extracted from mixed content");
                return Ok((value, true));
            }
            candidates.push(extracted);
        }
        candidates.push(cleaned.clone());

        for candidate in &candidates {
            for attempt in 1..=self.max_repair_attempts {
                let repaired = self.repair_attempt(candidate, attempt);
                if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
                    warn!("JSON repaired on attempt {}", attempt);
                    return Ok((value, true));
                }
            }
        }

        Err(VerigenError::llm_with_category(
            ErrorCategory::ParseError,
            format!(
                "Failed to parse or repair JSON. Content preview: {}...",
                cleaned.chars().take(200).collect::<String>()
            ),
        ))
    }

    fn preprocess(&self, raw: &str) -> String {
        let s = self.strip_code_fences(raw.trim());
        s.trim_start_matches('\u{feff}').trim().to_string()
    }

    fn strip_code_fences(&self, s: &str) -> String {
        let mut result = s.to_string();

        if result.starts_with("```")
            && let Some(first_newline) = result.find('\n')
        {
            result = result[first_newline + 1..].to_string();
        }

        if result.ends_with("```") {
            result = result[..result.len() - 3].trim_end().to_string();
        }

        result
    }

    fn repair_attempt(&self, s: &str, level: usize) -> String {
        let mut result = self.fix_trailing_commas(s);
        if level >= 2 {
            result = self.fix_truncated_strings(&result);
        }
        if level >= 3 {
            result = self.remove_control_chars(&result);
            result = self.fix_trailing_commas(result.trim_end().trim_end_matches(','));
        }
        self.balance_brackets(&result)
    }

    /// Drop commas directly before `]` or `}`
    fn fix_trailing_commas(&self, s: &str) -> String {
        let chars: Vec<char> = s.chars().collect();
        let mut result = String::with_capacity(s.len());
        let mut in_string = false;
        let mut escape = false;

        for (i, &ch) in chars.iter().enumerate() {
            if escape {
                escape = false;
                result.push(ch);
                continue;
            }
            match ch {
                '\\' if in_string => escape = true,
                '"' => in_string = !in_string,
                ',' if !in_string => {
                    let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                    if matches!(next, Some(']') | Some('}')) {
                        continue;
                    }
                }
                _ => {}
            }
            result.push(ch);
        }

        result
    }

    /// Close unterminated strings and append missing closers in nesting order
    fn balance_brackets(&self, s: &str) -> String {
        let mut result = s.to_string();
        let mut stack: Vec<char> = Vec::new();
        let mut in_string = false;
        let mut escape = false;

        for ch in s.chars() {
            if escape {
                escape = false;
                continue;
            }
            match ch {
                '\\' if in_string => escape = true,
                '"' => in_string = !in_string,
                '{' if !in_string => stack.push('}'),
                '[' if !in_string => stack.push(']'),
                '}' | ']' if !in_string => {
                    stack.pop();
                }
                _ => {}
            }
        }

        if in_string {
            result.push('"');
        }
        while let Some(closer) = stack.pop() {
            result.push(closer);
        }
        result
    }

    /// Close strings cut off at a newline
    fn fix_truncated_strings(&self, s: &str) -> String {
        let mut result = String::with_capacity(s.len() + 10);
        let mut in_string = false;
        let mut escape = false;

        for ch in s.chars() {
            if escape {
                escape = false;
                result.push(ch);
                continue;
            }
            match ch {
                '\\' if in_string => escape = true,
                '"' => in_string = !in_string,
                '\n' | '\r' if in_string => {
                    result.push('"');
                    in_string = false;
                }
                _ => {}
            }
            result.push(ch);
        }
        result
    }

    fn remove_control_chars(&self, s: &str) -> String {
        s.chars()
            .filter(|c| !c.is_control() || *c == '\n' || *c == '\r' || *c == '\t')
            .collect()
    }

    /// Text from the first `{` to its matching `}`, or to the end of input
    /// when the object is unterminated
    fn outermost_object(&self, s: &str) -> Option<String> {
        let start = s.find('{')?;
        let mut depth = 0i32;
        let mut in_string = false;
        let mut escape = false;

        for (i, ch) in s[start..].char_indices() {
            if escape {
                escape = false;
                continue;
            }
            match ch {
                '\\' if in_string => escape = true,
                '"' => in_string = !in_string,
                '{' if !in_string => depth += 1,
                '}' if !in_string => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(s[start..start + i + 1].to_string());
                    }
                }
                _ => {}
            }
        }

        Some(s[start..].to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_json() {
        let (value, repaired) = JsonRepairer::new()
            .parse_or_repair(r#"{"key": "value"}"#)
            .unwrap();
        assert!(!repaired);
        assert_eq!(value["key"], "value");
    }

    #[test]
    fn test_strip_code_fences() {
        let value = extract_json("```json\n{\"key\": \"value\"}\n```").unwrap();
        assert_eq!(value["key"], "value");
    }

    #[test]
    fn test_extract_from_prose() {
        let input = "Sure! Here is the contract:\n{\"language\": \"typescript\", \"components\": [\"A\"]}\nLet me know.";
        let value = extract_json(input).unwrap();
        assert_eq!(value["language"], "typescript");
    }

    #[test]
    fn test_fix_trailing_comma() {
        let (value, repaired) = JsonRepairer::new()
            .parse_or_repair(r#"{"files": [{"path": "a.ts"},],}"#)
            .unwrap();
        assert!(repaired);
        assert!(value["files"].is_array());
    }

    #[test]
    fn test_trailing_comma_inside_string_preserved() {
        let value = extract_json(r#"{"text": "a,]", "n": 1,}"#).unwrap();
        assert_eq!(value["text"], "a,]");
    }

    #[test]
    fn test_truncated_object_in_prose() {
        let input = "Contract: {\"language\": \"typescript\", \"components\": [\"Counter\"";
        let value = extract_json(input).unwrap();
        assert_eq!(value["components"][0], "Counter");
    }

    #[test]
    fn test_garbage_fails() {
        assert!(extract_json("no json here at all").is_err());
    }
}
