use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::discovery;
use crate::error::{ChainError, Result};

/// Complete ffprobe output structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeData {
    #[serde(default)]
    pub streams: Vec<ProbeStream>,
    pub format: Option<ProbeFormat>,
}

/// Format-level metadata from ffprobe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeFormat {
    pub format_name: Option<String>,
    pub duration: Option<String>,
    pub bit_rate: Option<String>,
    pub tags: Option<HashMap<String, String>>,
}

/// Stream-level metadata from ffprobe
///
/// Only the fields the chain needs are typed; everything else ffprobe
/// reports is kept in `extra` so the record can be passed through intact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeStream {
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<HashMap<String, String>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ProbeStream {
    /// The full record as ffprobe reported it
    pub fn raw(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl ProbeData {
    /// Parse ffprobe's `-print_format json` output
    pub fn from_json(path: &Path, json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|source| ChainError::InvalidProbeOutput {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Source of probe data for an input file
pub trait Prober: Send + Sync {
    fn probe(&self, path: &Path) -> Result<ProbeData>;
}

/// Runs the ffprobe binary and parses its JSON output
#[derive(Debug, Clone, Default)]
pub struct FfprobeProber {
    ffprobe_bin: Option<PathBuf>,
}

impl FfprobeProber {
    /// Use a specific ffprobe binary instead of looking it up on PATH
    pub fn with_binary(ffprobe_bin: impl Into<PathBuf>) -> Self {
        FfprobeProber {
            ffprobe_bin: Some(ffprobe_bin.into()),
        }
    }

    pub fn from_option(ffprobe_bin: Option<PathBuf>) -> Self {
        FfprobeProber { ffprobe_bin }
    }
}

impl Prober for FfprobeProber {
    fn probe(&self, path: &Path) -> Result<ProbeData> {
        let ffprobe = discovery::resolve("ffprobe", self.ffprobe_bin.as_deref())?;

        debug!("Executing FFprobe for: {}", path.display());

        let output = Command::new(&ffprobe)
            .arg("-v")
            .arg("quiet")
            .arg("-print_format")
            .arg("json")
            .arg("-show_format")
            .arg("-show_streams")
            .arg(path)
            .output()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ChainError::NotFound {
                    binary: ffprobe.display().to_string(),
                },
                _ => ChainError::Io(e),
            })?;

        if !output.status.success() {
            return Err(ChainError::ProbeFailed {
                path: path.to_path_buf(),
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let json_str = String::from_utf8_lossy(&output.stdout);
        ProbeData::from_json(path, &json_str)
    }
}
