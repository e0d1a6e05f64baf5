//! Built-in Tools
//!
//! Simulated formatter, linter and CSS compiler that ship with the catalog.
//! They transform file sets in memory and never spawn a process, so they
//! work without Node tooling installed.

use std::collections::BTreeSet;

use crate::types::{FileSet, PluginManifest, extension_of};

const SCRIPT_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx"];

const TAILWIND_OUTPUT_PATH: &str = "styles.css";
const TAILWIND_OUTPUT: &str = "/* Generated by Tailwind CSS */
.btn { @apply px-4 py-2 bg-blue-500 text-white rounded; }
.card { @apply p-6 bg-white shadow-lg rounded-lg; }
";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinTool {
    Prettier,
    Eslint,
    TailwindJit,
    Passthrough,
}

impl BuiltinTool {
    pub const ALL: [BuiltinTool; 4] = [
        BuiltinTool::Prettier,
        BuiltinTool::Eslint,
        BuiltinTool::TailwindJit,
        BuiltinTool::Passthrough,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Prettier => "prettier",
            Self::Eslint => "eslint",
            Self::TailwindJit => "tailwind-jit",
            Self::Passthrough => "passthrough",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    pub fn manifest(&self) -> PluginManifest {
        let kinds = |k: &[&str]| k.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>();
        let (description, command, inputs, outputs, cost) = match self {
            Self::Prettier => (
                "Code formatter for JavaScript, TypeScript, and more",
                "prettier --write",
                kinds(&["typescript", "javascript", "css", "json"]),
                kinds(&["typescript", "javascript", "css", "json"]),
                500,
            ),
            Self::Eslint => (
                "JavaScript and TypeScript linter with auto-fix",
                "eslint --fix",
                kinds(&["typescript", "javascript"]),
                kinds(&["typescript", "javascript"]),
                1000,
            ),
            Self::TailwindJit => (
                "Tailwind CSS JIT compiler",
                "tailwindcss -i input.css -o output.css",
                kinds(&["css", "html", "typescript", "javascript"]),
                kinds(&["css"]),
                800,
            ),
            Self::Passthrough => (
                "Returns input files unchanged",
                "true",
                BTreeSet::new(),
                BTreeSet::new(),
                0,
            ),
        };

        PluginManifest {
            name: self.name().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: description.to_string(),
            inputs,
            outputs,
            command: command.split_whitespace().map(str::to_string).collect(),
            estimated_cost_ms: cost,
            estimated_tokens: 0,
            timeout_ms: None,
            enabled: true,
            verified: true,
            directory: None,
            installed_at: None,
        }
    }

    pub fn apply(&self, files: &FileSet) -> FileSet {
        match self {
            Self::Prettier => map_scripts(files, format_script),
            Self::Eslint => map_scripts(files, lint_fix),
            Self::TailwindJit => {
                // Inputs never overwrite the compiled stylesheet
                files
                    .iter()
                    .filter(|(path, _)| *path != TAILWIND_OUTPUT_PATH)
                    .map(|(p, c)| (p.to_string(), c.to_string()))
                    .chain(std::iter::once((
                        TAILWIND_OUTPUT_PATH.to_string(),
                        TAILWIND_OUTPUT.to_string(),
                    )))
                    .collect()
            }
            Self::Passthrough => files.clone(),
        }
    }
}

fn is_script(path: &str) -> bool {
    extension_of(path).is_some_and(|ext| SCRIPT_EXTENSIONS.contains(&ext.as_str()))
}

fn map_scripts(files: &FileSet, f: fn(&str) -> String) -> FileSet {
    files
        .iter()
        .map(|(path, content)| {
            let out = if is_script(path) {
                f(content)
            } else {
                content.to_string()
            };
            (path.to_string(), out)
        })
        .collect()
}

/// Break after statements and around blocks
fn format_script(content: &str) -> String {
    content
        .replace(';', ";\n")
        .replace('{', " {\n")
        .replace('}', "\n}")
}

/// `var` → `const`, loose equality → strict
fn lint_fix(content: &str) -> String {
    strict_equality(&content.replace("var ", "const "))
}

/// Rewrite `==` to `===` and `!=` to `!==`, leaving existing strict operators
/// and `<=`/`>=` alone
fn strict_equality(content: &str) -> String {
    let chars: Vec<char> = content.chars().collect();
    let mut out = String::with_capacity(content.len() + 8);
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        if ch == '=' || ch == '!' {
            let run_start = i;
            let mut j = i + 1;
            while j < chars.len() && chars[j] == '=' {
                j += 1;
            }
            let equals = j - run_start - usize::from(ch == '!');
            let prev = run_start.checked_sub(1).map(|p| chars[p]);
            let comparison_prefix = matches!(prev, Some('<' | '>' | '='));

            out.extend(&chars[run_start..j]);
            if ch == '=' && equals == 2 && !comparison_prefix {
                out.push('=');
            } else if ch == '!' && equals == 1 {
                out.push('=');
            }
            i = j;
            continue;
        }
        out.push(ch);
        i += 1;
    }

    out
}
