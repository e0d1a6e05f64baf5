//! Engine Output Extraction
//!
//! - `json`: contract JSON recovery from prose, fences and truncated output
//! - `blocks`: fenced `// filename:` file blocks, batch or incremental

mod blocks;
mod json;

pub use blocks::{FileBlockParser, ParsedFile, parse_file_blocks};
pub use json::{JsonRepairer, extract_json};
