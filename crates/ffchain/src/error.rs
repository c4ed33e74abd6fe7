use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by command construction, probing and process supervision.
///
/// Every failure reaches the caller as one of these variants. Nothing is
/// retried automatically.
#[derive(Debug, Error)]
pub enum ChainError {
    /// A required binary could not be resolved on this host.
    #[error("{binary} binary not found in system PATH")]
    NotFound { binary: String },

    /// ffprobe ran but exited non-zero.
    #[error("FFprobe failed (exit code {exit_code}) for {}: {stderr}", path.display())]
    ProbeFailed {
        path: PathBuf,
        exit_code: i32,
        stderr: String,
    },

    /// ffprobe succeeded but its output could not be parsed.
    #[error("Failed to parse ffprobe JSON for {}: {source}", path.display())]
    InvalidProbeOutput {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The launched process exited with a non-zero code.
    #[error("Process exited with code {exit_code}: {}", args.join(" "))]
    ProcessFailed {
        args: Vec<String>,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    /// A bounded wait passed its deadline. The process is left running.
    #[error("Process did not complete within {0:?}")]
    Timeout(Duration),

    /// The requested capability is not available from the launcher.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Out-of-bounds access on a stream collection.
    #[error("Stream index {index} is out of range (collection has {len} streams)")]
    IndexOutOfRange { index: usize, len: usize },

    /// A stream category outside video/audio/subtitle.
    #[error("Stream type must be one of video, audio, subtitle; got {0:?}")]
    InvalidStreamType(String),

    /// A binary, input or output path that cannot be passed on as UTF-8.
    #[error("Path is not valid UTF-8: {}", .0.display())]
    NonUtf8Path(PathBuf),

    /// An output without explicit mappings was added before any input.
    #[error("Cannot default stream mappings: no inputs registered")]
    NoInputs,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ChainError>;
