//! Stage Prompts
//!
//! Prompt construction for each engine-backed pipeline stage, plus the
//! deterministic fallback files used when the engine is unavailable or its
//! reply cannot be parsed.
//!
//! ## Structure
//!
//! Every user prompt is assembled with [`PromptBuilder`] from the same
//! section kinds (role, objectives, context, code, focus) so that stages
//! differ only in what they ask for. File-producing stages all request the
//! fenced `// filename:` block format parsed by `ai::extract`.

use crate::constants::pipeline::MAX_DIAGNOSTICS_CHARS;
use crate::types::{Contract, FileSet, VerificationResult, truncate_chars};

pub const FALLBACK_SCAFFOLD_PATH: &str = "src/Component.tsx";
pub const FALLBACK_TEST_PATH: &str = "src/Component.test.tsx";

const FALLBACK_SCAFFOLD: &str = "import React from 'react';

export const Component: React.FC = () => {
  // TODO: Implement component logic
  return <div>Component</div>;
};
";

const FALLBACK_TEST: &str = "import { render, screen } from '@testing-library/react';
import { Component } from './Component';

describe('Component', () => {
  test('renders correctly', () => {
    render(<Component />);
    expect(screen.getByText('Component')).toBeInTheDocument();
  });
});
";

const FILE_FORMAT: &str = "Return every file as a fenced code block whose first line is a filename marker:

```tsx
// filename: src/Example.tsx
export const Example = () => null;
```

Use `# filename:` instead for languages with `#` comments. Paths must be relative and must not contain `..`.";

// =============================================================================
// Prompt Builder
// =============================================================================

#[derive(Debug, Clone)]
enum PromptSection {
    Role { expertise: String, task: String },
    Objectives(Vec<String>),
    /// Ordered key-value pairs
    Context(Vec<(String, String)>),
    Text {
        header: Option<String>,
        content: String,
    },
    Focus {
        target: String,
        restrictions: Vec<String>,
    },
}

/// Section-based prompt construction
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    sections: Vec<PromptSection>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role(mut self, expertise: &str, task: &str) -> Self {
        self.sections.push(PromptSection::Role {
            expertise: expertise.to_string(),
            task: task.to_string(),
        });
        self
    }

    pub fn objectives<S: AsRef<str>>(mut self, objectives: &[S]) -> Self {
        self.sections.push(PromptSection::Objectives(
            objectives.iter().map(|o| o.as_ref().to_string()).collect(),
        ));
        self
    }

    /// Add a context item, appending to the existing context section
    pub fn context_item(mut self, key: &str, value: &str) -> Self {
        let existing = self.sections.iter_mut().find_map(|s| match s {
            PromptSection::Context(items) => Some(items),
            _ => None,
        });
        match existing {
            Some(items) => items.push((key.to_string(), value.to_string())),
            None => self.sections.push(PromptSection::Context(vec![(
                key.to_string(),
                value.to_string(),
            )])),
        }
        self
    }

    pub fn text(mut self, content: &str) -> Self {
        self.sections.push(PromptSection::Text {
            header: None,
            content: content.to_string(),
        });
        self
    }

    pub fn section(mut self, header: &str, content: &str) -> Self {
        self.sections.push(PromptSection::Text {
            header: Some(header.to_string()),
            content: content.to_string(),
        });
        self
    }

    pub fn focus<S: AsRef<str>>(mut self, target: &str, restrictions: &[S]) -> Self {
        self.sections.push(PromptSection::Focus {
            target: target.to_string(),
            restrictions: restrictions.iter().map(|r| r.as_ref().to_string()).collect(),
        });
        self
    }

    pub fn build(self) -> String {
        let mut prompt = String::new();

        for section in self.sections {
            match section {
                PromptSection::Role { expertise, task } => {
                    prompt.push_str("<ROLE>\n");
                    prompt.push_str(&format!(
                        "You are an expert {} specializing in {}.\n",
                        expertise, task
                    ));
                    prompt.push_str("</ROLE>\n\n");
                }
                PromptSection::Objectives(objectives) => {
                    prompt.push_str("<OBJECTIVES>\n");
                    for (i, obj) in objectives.iter().enumerate() {
                        prompt.push_str(&format!("{}. {}\n", i + 1, obj));
                    }
                    prompt.push_str("</OBJECTIVES>\n\n");
                }
                PromptSection::Context(items) => {
                    prompt.push_str("# Context\n\n");
                    for (key, value) in items {
                        prompt.push_str(&format!("**{}**: {}\n", key, value));
                    }
                    prompt.push('\n');
                }
                PromptSection::Text { header, content } => {
                    if let Some(h) = header {
                        prompt.push_str(&format!("# {}\n\n", h));
                    }
                    prompt.push_str(&content);
                    prompt.push_str("\n\n");
                }
                PromptSection::Focus {
                    target,
                    restrictions,
                } => {
                    prompt.push_str("<FOCUS>\n");
                    prompt.push_str(&format!("IMPORTANT: Focus EXCLUSIVELY on: {}\n", target));
                    for restriction in restrictions {
                        prompt.push_str(&format!("- {}\n", restriction));
                    }
                    prompt.push_str("</FOCUS>\n\n");
                }
            }
        }

        prompt.trim_end().to_string()
    }
}

// =============================================================================
// Stage Prompts
// =============================================================================

/// System and user prompt for one engine call
#[derive(Debug, Clone)]
pub struct StagePrompt {
    pub system: String,
    pub user: String,
}

pub struct StagePrompts;

impl StagePrompts {
    pub fn interpret(prompt: &str) -> StagePrompt {
        let system = PromptBuilder::new()
            .role("software architect", "turning feature requests into build contracts")
            .text("Respond with a single JSON object and nothing else.")
            .build();

        let user = PromptBuilder::new()
            .section("Request", prompt)
            .objectives(&[
                "Identify the target language and framework",
                "List the components to build, most important first",
                "List package dependencies, UI hints and edge cases worth testing",
                "Propose a file structure mapping each path to its purpose",
                "Name a test strategy (unit, integration or e2e)",
            ])
            .section(
                "Output Schema",
                r#"{"summary": "...", "language": "typescript", "framework": "react", "components": ["..."], "dependencies": ["..."], "ui_hints": ["..."], "edge_cases": ["..."], "file_structure": {"src/Example.tsx": "purpose"}, "test_strategy": "unit"}"#,
            )
            .build();

        StagePrompt { system, user }
    }

    pub fn scaffold(contract: &Contract) -> StagePrompt {
        let system = PromptBuilder::new()
            .role(
                &format!("{} {} engineer", contract.target_framework, contract.target_language),
                "minimal, compilable project scaffolds",
            )
            .text(FILE_FORMAT)
            .build();

        let mut user = contract_context(PromptBuilder::new(), contract).objectives(&[
            "Create minimal compilable files for every component",
            "Mark unimplemented logic with TODO comments",
            "Include a package.json declaring the dependencies",
        ]);
        if !contract.file_structure.is_empty() {
            user = user.section("Requested File Structure", &render_structure(contract));
        }

        StagePrompt {
            system,
            user: user.build(),
        }
    }

    pub fn unit_test(contract: &Contract, files: &FileSet) -> StagePrompt {
        let system = PromptBuilder::new()
            .role("test engineer", "Vitest suites with Testing Library")
            .text(FILE_FORMAT)
            .build();

        let mut edge_cases: Vec<String> = contract
            .edge_cases
            .iter()
            .map(|e| format!("Assert the edge case: {}", e))
            .collect();
        edge_cases.insert(0, "Cover every listed component with at least one test".to_string());

        let user = contract_context(PromptBuilder::new(), contract)
            .objectives(&edge_cases)
            .section("Source Files", &render_files(files))
            .focus(
                "test files",
                &["Do NOT modify source files", "Place tests next to the code they cover"],
            )
            .build();

        StagePrompt { system, user }
    }

    pub fn repair(
        contract: &Contract,
        files: &FileSet,
        tests: &FileSet,
        result: &VerificationResult,
    ) -> StagePrompt {
        let system = PromptBuilder::new()
            .role(
                &format!("{} engineer", contract.target_language),
                "fixing failing test suites with minimal patches",
            )
            .text(FILE_FORMAT)
            .build();

        let failing: Vec<&str> = result.failing_cases().collect();
        let mut user = PromptBuilder::new()
            .context_item("Passed", &result.passed_count().to_string())
            .context_item("Failed", &result.failed_count().to_string());
        if !failing.is_empty() {
            user = user.context_item("Failing tests", &failing.join(", "));
        }

        let user = user
            .section(
                "Diagnostics",
                &truncate_chars(result.diagnostics(), MAX_DIAGNOSTICS_CHARS),
            )
            .section("Source Files", &render_files(files))
            .section("Test Files", &render_files(tests))
            .focus(
                "the failing behaviour",
                &[
                    "Fix only the failing parts and return the corrected files",
                    "Return only files you changed",
                    "Do NOT rewrite the tests to make them pass",
                ],
            )
            .build();

        StagePrompt { system, user }
    }
}

fn contract_context(builder: PromptBuilder, contract: &Contract) -> PromptBuilder {
    let deps: Vec<&str> = contract.dependencies.iter().map(String::as_str).collect();
    builder
        .context_item("Summary", &contract.summary)
        .context_item("Language", &contract.target_language)
        .context_item("Framework", &contract.target_framework)
        .context_item("Components", &contract.components.join(", "))
        .context_item("Dependencies", &deps.join(", "))
        .context_item("UI hints", &contract.ui_hints.join(", "))
}

fn render_structure(contract: &Contract) -> String {
    contract
        .file_structure
        .iter()
        .map(|(path, purpose)| {
            if purpose.is_empty() {
                format!("- {}", path)
            } else {
                format!("- {}: {}", path, purpose)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render files in the same block format the engine is asked to return
pub fn render_files(files: &FileSet) -> String {
    files
        .iter()
        .map(|(path, content)| {
            let lang = path.rsplit('.').next().unwrap_or_default();
            format!("```{}\n// filename: {}\n{}\n```", lang, path, content.trim_end())
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

// =============================================================================
// Fallbacks
// =============================================================================

/// Single-file scaffold used when the engine produces nothing usable
pub fn fallback_scaffold() -> FileSet {
    FileSet::single(FALLBACK_SCAFFOLD_PATH, FALLBACK_SCAFFOLD)
}

/// Single test file matching [`fallback_scaffold`]
pub fn fallback_tests() -> FileSet {
    FileSet::single(FALLBACK_TEST_PATH, FALLBACK_TEST)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::extract::parse_file_blocks;
    use crate::types::CaseResult;

    #[test]
    fn test_builder_sections() {
        let prompt = PromptBuilder::new()
            .role("code analyst", "TypeScript")
            .objectives(&["Analyze code", "Generate tests"])
            .context_item("Language", "typescript")
            .context_item("Framework", "react")
            .build();

        assert!(prompt.contains("<ROLE>"));
        assert!(prompt.contains("1. Analyze code"));
        assert!(prompt.contains("2. Generate tests"));
        let lang = prompt.find("**Language**").unwrap();
        let framework = prompt.find("**Framework**").unwrap();
        assert!(lang < framework);
        assert_eq!(prompt.matches("# Context").count(), 1);
    }

    #[test]
    fn test_rendered_files_parse_back() {
        let files = FileSet::from_iter([
            ("src/A.tsx".to_string(), "export const A = 1;\n".to_string()),
            ("package.json".to_string(), "{}\n".to_string()),
        ]);
        assert_eq!(parse_file_blocks(&render_files(&files)), files);
    }

    #[test]
    fn test_scaffold_prompt_honors_file_structure() {
        let mut contract = Contract::fallback("counter");
        contract
            .file_structure
            .insert("src/Counter.tsx".into(), "counter component".into());
        let prompt = StagePrompts::scaffold(&contract);
        assert!(prompt.user.contains("src/Counter.tsx: counter component"));
        assert!(prompt.system.contains("// filename:"));
    }

    #[test]
    fn test_unit_test_prompt_lists_edge_cases() {
        let mut contract = Contract::fallback("counter");
        contract.edge_cases = vec!["negative counts".into()];
        let prompt = StagePrompts::unit_test(&contract, &fallback_scaffold());
        assert!(prompt.user.contains("Assert the edge case: negative counts"));
        assert!(prompt.user.contains(FALLBACK_SCAFFOLD_PATH));
    }

    #[test]
    fn test_repair_prompt_includes_failures() {
        let result = VerificationResult::from_cases(
            vec![CaseResult::passed("renders"), CaseResult::failed("increments")],
            "expected 1, received 0",
        );
        let prompt = StagePrompts::repair(
            &Contract::fallback("counter"),
            &fallback_scaffold(),
            &fallback_tests(),
            &result,
        );
        assert!(prompt.user.contains("**Failing tests**: increments"));
        assert!(prompt.user.contains("expected 1, received 0"));
        assert!(prompt.user.contains(FALLBACK_TEST_PATH));
    }

    #[test]
    fn test_fallbacks_are_single_files() {
        assert_eq!(fallback_scaffold().len(), 1);
        assert_eq!(fallback_tests().len(), 1);
        assert!(fallback_scaffold().get(FALLBACK_SCAFFOLD_PATH).unwrap().contains("TODO"));
    }
}
