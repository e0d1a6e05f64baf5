//! Fenced File Block Parsing
//!
//! Engines return files as fenced code blocks whose body starts with a
//! filename marker:
//!
//! ````text
//! ```tsx
//! // filename: src/Counter.tsx
//! export const Counter = () => null;
//! ```
//! ````
//!
//! A file ends at the closing fence or at the next filename marker inside the
//! same block. [`FileBlockParser`] works incrementally so the pipeline can
//! emit each file as soon as it closes while the engine is still streaming.

use tracing::warn;

use crate::types::{FileSet, validate_relative_path};

const MARKERS: &[&str] = &["// filename:", "# filename:", "/* filename:", "<!-- filename:"];

/// A file whose block has closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFile {
    pub path: String,
    pub content: String,
}

/// Incremental parser over streamed text
#[derive(Debug, Default)]
pub struct FileBlockParser {
    pending: String,
    in_block: bool,
    current: Option<(String, Vec<String>)>,
}

impl FileBlockParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns files closed by it
    pub fn push(&mut self, chunk: &str) -> Vec<ParsedFile> {
        self.pending.push_str(chunk);
        let mut closed = Vec::new();

        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            self.feed_line(line.trim_end_matches(['\n', '\r']), &mut closed);
        }

        closed
    }

    /// Flush the trailing partial line and any unterminated block
    pub fn finish(mut self) -> Vec<ParsedFile> {
        let mut closed = Vec::new();
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.feed_line(line.trim_end_matches('\r'), &mut closed);
        }
        if let Some((path, lines)) = self.current.take()
            && !lines.is_empty()
        {
            Self::close(path, lines, &mut closed);
        }
        closed
    }

    fn feed_line(&mut self, line: &str, closed: &mut Vec<ParsedFile>) {
        let trimmed = line.trim();

        if trimmed.starts_with("```") {
            if self.in_block {
                if let Some((path, lines)) = self.current.take() {
                    Self::close(path, lines, closed);
                }
                self.in_block = false;
            } else {
                self.in_block = true;
            }
            return;
        }

        if !self.in_block {
            return;
        }

        if let Some(path) = parse_marker(trimmed) {
            if let Some((prev, lines)) = self.current.take() {
                Self::close(prev, lines, closed);
            }
            self.current = Some((path, Vec::new()));
        } else if let Some((_, lines)) = self.current.as_mut() {
            lines.push(line.to_string());
        }
    }

    fn close(path: String, lines: Vec<String>, closed: &mut Vec<ParsedFile>) {
        if let Err(e) = validate_relative_path(&path) {
            warn!("Dropping generated file: {}", e);
            return;
        }
        let mut content = lines.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        closed.push(ParsedFile { path, content });
    }
}

fn parse_marker(line: &str) -> Option<String> {
    MARKERS.iter().find_map(|marker| {
        let rest = line.strip_prefix(marker)?;
        let path = rest
            .trim()
            .trim_end_matches("-->")
            .trim_end_matches("*/")
            .trim()
            .trim_start_matches("./")
            .to_string();
        (!path.is_empty()).then_some(path)
    })
}

/// Parse every file block in a complete response. Later blocks for the same
/// path replace earlier ones.
pub fn parse_file_blocks(text: &str) -> FileSet {
    let mut parser = FileBlockParser::new();
    let mut files = parser.push(text);
    files.extend(parser.finish());
    files.into_iter().map(|f| (f.path, f.content)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = "Here are the files:\n\
```json\n\
// filename: package.json\n\
{\"name\": \"demo\"}\n\
```\n\
\n\
```tsx\n\
// filename: src/A.tsx\n\
export const A = 1;\n\
// filename: src/B.tsx\n\
export const B = 2;\n\
```\n";

    #[test]
    fn test_parse_multiple_blocks() {
        let files = parse_file_blocks(RESPONSE);
        assert_eq!(files.len(), 3);
        assert_eq!(files.get("package.json"), Some("{\"name\": \"demo\"}\n"));
        assert_eq!(files.get("src/A.tsx"), Some("export const A = 1;\n"));
        assert_eq!(files.get("src/B.tsx"), Some("export const B = 2;\n"));
    }

    #[test]
    fn test_incremental_emits_on_close() {
        let mut parser = FileBlockParser::new();
        assert!(parser.push("```ts\n// filename: a.ts\nconst x").is_empty());
        assert!(parser.push(" = 1;\n").is_empty());
        let closed = parser.push("```\n");
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].path, "a.ts");
        assert_eq!(closed[0].content, "const x = 1;\n");
        assert!(parser.finish().is_empty());
    }

    #[test]
    fn test_unterminated_block_flushed_on_finish() {
        let mut parser = FileBlockParser::new();
        parser.push("```py\n# filename: main.py\nprint('hi')");
        let files = parser.finish();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "main.py");
        assert_eq!(files[0].content, "print('hi')\n");
    }

    #[test]
    fn test_blocks_without_marker_are_ignored() {
        let files = parse_file_blocks("```ts\nconst orphan = 1;\n```\n");
        assert!(files.is_empty());
    }

    #[test]
    fn test_unsafe_paths_dropped() {
        let files = parse_file_blocks("```\n// filename: ../../etc/passwd\nroot\n```\n");
        assert!(files.is_empty());
    }

    #[test]
    fn test_marker_variants() {
        assert_eq!(parse_marker("// filename: ./src/x.ts"), Some("src/x.ts".into()));
        assert_eq!(parse_marker("<!-- filename: index.html -->"), Some("index.html".into()));
        assert_eq!(parse_marker("/* filename: a.css */"), Some("a.css".into()));
        assert_eq!(parse_marker("// filename:"), None);
        assert_eq!(parse_marker("const a = 1;"), None);
    }
}
