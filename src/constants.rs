//! Global Constants
//!
//! Centralized constants for configuration and tuning.
//! All magic numbers should be defined here with documentation.

/// Generation pipeline constants
pub mod pipeline {
    /// Default bound on Repair → Execute cycles
    pub const DEFAULT_MAX_REPAIR_ATTEMPTS: u32 = 2;

    /// Default wall-clock budget for one engine call (seconds)
    pub const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 300;

    /// Maximum characters of diagnostics forwarded into a repair prompt
    pub const MAX_DIAGNOSTICS_CHARS: usize = 8_000;

    /// Token limits per engine call
    pub mod max_tokens {
        pub const INTERPRET: usize = 1_024;
        pub const SCAFFOLD: usize = 4_096;
        pub const UNIT_TEST: usize = 4_096;
        pub const REPAIR: usize = 4_096;
    }

    /// Progress percentages reported when each stage completes.
    ///
    /// Repair attempts interpolate between `EXECUTE` and `REPAIR_CEILING`;
    /// only Report reaches 100.
    pub mod progress {
        pub const INTERPRET: u8 = 15;
        pub const SCAFFOLD: u8 = 30;
        pub const UNIT_TEST: u8 = 45;
        pub const EXECUTE: u8 = 60;
        pub const REPAIR_CEILING: u8 = 95;
        pub const REPORT: u8 = 100;
    }
}

/// Completion engine retry constants
pub mod retry {
    /// Default maximum retries per engine call
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// Base delay for exponential backoff (milliseconds)
    pub const BASE_DELAY_MS: u64 = 500;

    /// Maximum delay between retries (seconds)
    pub const MAX_DELAY_SECS: u64 = 30;

    /// Backoff multiplier
    pub const BACKOFF_FACTOR: f32 = 2.0;
}

/// Sandbox constants
pub mod sandbox {
    /// Default test-runner timeout (seconds)
    pub const DEFAULT_TEST_TIMEOUT_SECS: u64 = 120;

    /// Default plugin tool timeout (seconds)
    pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;

    /// Maximum bytes of stdout/stderr kept as diagnostics
    pub const MAX_OUTPUT_BYTES: usize = 64 * 1024;

    /// Prefix for per-call workspace directories
    pub const WORKSPACE_PREFIX: &str = "verigen-ws-";

    /// Larger workspace files are not collected as outputs (1MB)
    pub const MAX_FILE_BYTES: u64 = 1_048_576;

    /// Directories never collected from a workspace
    pub const SKIPPED_DIRS: &[&str] = &["node_modules", ".git", "coverage", "dist"];
}

/// Plugin registry constants
pub mod plugins {
    /// Manifest file names, in lookup order
    pub const MANIFEST_FILES: &[&str] = &["plugin.json", "plugin.yaml", "plugin.yml"];

    /// Default cost estimate when a manifest omits it (milliseconds)
    pub const DEFAULT_COST_MS: u64 = 1000;

    /// Tools cheaper than this get the low-cost bonus
    pub const LOW_COST_THRESHOLD_MS: u64 = 5000;

    /// Discovery scoring weights
    pub mod score {
        pub const INPUT_MATCH: u32 = 2;
        pub const KEYWORD_MATCH: u32 = 3;
        pub const LOW_COST: u32 = 1;
    }

    /// Timeout for `git clone` during install (seconds)
    pub const CLONE_TIMEOUT_SECS: u64 = 120;

    /// Prefix of per-install staging directories under the install dir.
    /// The leading dot keeps them from ever passing as a plugin name.
    pub const STAGING_PREFIX: &str = ".verigen-install-";
}

/// HTTP/Network constants
pub mod network {
    /// Default request timeout (seconds)
    pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

    /// Connection timeout (seconds)
    pub const CONNECTION_TIMEOUT_SECS: u64 = 30;
}
