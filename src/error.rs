//! Error taxonomy for the widget pipeline.
//!
//! Failures are always scoped to the smallest unit that caused them: a bad
//! upload is rejected whole before anything is written, a single file that
//! fails to compile becomes an `error`-kind artifact descriptor while its
//! siblings still return, and a malformed settings/localization module
//! degrades one placed instance to its raw stored configuration.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Rejected synchronously before any state changed (bad name, missing
    /// file category, disallowed extension).
    #[error("invalid input: {0}")]
    Input(String),

    /// The named package directory does not exist.
    #[error("package not found: {0}")]
    NotFound(String),

    /// Compilation produced nothing usable for the whole package (zero valid
    /// artifacts, or no script artifact). Per-file failures are NOT this
    /// variant; they travel as `ArtifactKind::Error` descriptors.
    #[error("compilation failed for {package}: {message}")]
    Compile { package: String, message: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Retry budget for a placed instance is spent. Terminal and visible,
    /// never auto-escalated.
    #[error("retry budget exhausted after {attempts} attempts")]
    Exhausted { attempts: u32 },

    /// A load attempt lost the race against its timeout.
    #[error("load timed out after {millis}ms")]
    Timeout { millis: u64 },
}
