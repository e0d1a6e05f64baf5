//! Generation Contract
//!
//! Output of the Interpret stage. Parsing is deliberately lenient: engines
//! return anything from strict JSON to prose with an embedded object, with
//! either `language` or `targetLanguage` style keys. Missing fields are filled
//! from the deterministic fallback so a contract is always well-formed.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

const FALLBACK_LANGUAGE: &str = "typescript";
const FALLBACK_FRAMEWORK: &str = "react";
const FALLBACK_COMPONENT: &str = "Component";
const FALLBACK_TEST_STRATEGY: &str = "unit";
const SUMMARY_MAX_CHARS: usize = 200;

/// Structured description of what to generate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub summary: String,
    pub target_language: String,
    pub target_framework: String,
    /// Ordered; the first component is the primary one
    pub components: Vec<String>,
    pub dependencies: BTreeSet<String>,
    pub ui_hints: Vec<String>,
    pub edge_cases: Vec<String>,
    /// path → purpose
    pub file_structure: BTreeMap<String, String>,
    pub test_strategy: String,
}

impl Contract {
    /// Deterministic contract used whenever the engine output is unusable
    pub fn fallback(prompt: &str) -> Self {
        Self {
            summary: summarize(prompt),
            target_language: FALLBACK_LANGUAGE.to_string(),
            target_framework: FALLBACK_FRAMEWORK.to_string(),
            components: vec![FALLBACK_COMPONENT.to_string()],
            dependencies: BTreeSet::from([FALLBACK_FRAMEWORK.to_string()]),
            ui_hints: vec!["modern".to_string()],
            edge_cases: Vec::new(),
            file_structure: BTreeMap::new(),
            test_strategy: FALLBACK_TEST_STRATEGY.to_string(),
        }
    }

    /// Build a contract from an engine JSON value. Returns `None` when the
    /// value is not an object; absent or malformed fields take fallback values.
    pub fn from_value(prompt: &str, value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let fallback = Self::fallback(prompt);

        let field = |keys: &[&str]| keys.iter().find_map(|k| obj.get(*k));

        let summary = field(&["summary", "description"])
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.trim().to_string())
            .unwrap_or(fallback.summary);

        let target_language = field(&["target_language", "targetLanguage", "language"])
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.trim().to_lowercase())
            .unwrap_or(fallback.target_language);

        let target_framework = field(&["target_framework", "targetFramework", "framework"])
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.trim().to_lowercase())
            .unwrap_or(fallback.target_framework);

        let components = field(&["components"])
            .map(string_list)
            .filter(|c| !c.is_empty())
            .unwrap_or(fallback.components);

        let dependencies = field(&["dependencies", "deps"])
            .map(|v| string_list(v).into_iter().collect::<BTreeSet<_>>())
            .unwrap_or(fallback.dependencies);

        let ui_hints = field(&["ui_hints", "uiHints"])
            .map(string_list)
            .unwrap_or(fallback.ui_hints);

        let edge_cases = field(&["edge_cases", "edgeCases"])
            .map(string_list)
            .unwrap_or(fallback.edge_cases);

        let file_structure = field(&["file_structure", "fileStructure"])
            .map(path_map)
            .unwrap_or(fallback.file_structure);

        let test_strategy = field(&["test_strategy", "testStrategy"])
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(fallback.test_strategy);

        Some(Self {
            summary,
            target_language,
            target_framework,
            components,
            dependencies,
            ui_hints,
            edge_cases,
            file_structure,
            test_strategy,
        })
    }

    pub fn primary_component(&self) -> &str {
        self.components
            .first()
            .map(String::as_str)
            .unwrap_or(FALLBACK_COMPONENT)
    }

    /// Source file extension implied by language and framework
    pub fn source_extension(&self) -> &'static str {
        let jsx = matches!(self.target_framework.as_str(), "react" | "preact" | "solid");
        match (self.target_language.as_str(), jsx) {
            ("javascript" | "js", true) => "jsx",
            ("javascript" | "js", false) => "js",
            (_, true) => "tsx",
            (_, false) => "ts",
        }
    }
}

fn summarize(prompt: &str) -> String {
    let trimmed = prompt.trim();
    if trimmed.chars().count() <= SUMMARY_MAX_CHARS {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(SUMMARY_MAX_CHARS).collect();
        format!("{}...", cut.trim_end())
    }
}

/// Accepts `["a", "b"]`, `[{"name": "a"}]`, or `"a, b"`
fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Object(o) => o
                    .get("name")
                    .or_else(|| o.get("title"))
                    .and_then(Value::as_str)
                    .map(|s| s.trim().to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Value::String(s) => s
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        Value::Object(o) => o.keys().cloned().collect(),
        _ => Vec::new(),
    }
}

/// Accepts `{"path": "purpose"}` or `["path", ...]`
fn path_map(value: &Value) -> BTreeMap<String, String> {
    match value {
        Value::Object(o) => o
            .iter()
            .map(|(k, v)| {
                let purpose = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), purpose)
            })
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|p| (p.to_string(), String::new()))
            .collect(),
        _ => BTreeMap::new(),
    }
}
