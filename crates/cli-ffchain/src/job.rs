use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use ffchain::{StreamMapping, Supervisor};
use serde::{Deserialize, Serialize};

/// A transcode job as written in a JSON or TOML job file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobSpec {
    #[serde(default)]
    pub global_options: Vec<GlobalOption>,
    pub inputs: Vec<JobInput>,
    #[serde(default)]
    pub outputs: Vec<JobOutput>,
}

/// `-name` or `-name value`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalOption {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInput {
    pub path: PathBuf,
    /// `[key, value]` pairs, in order
    #[serde(default)]
    pub options: Vec<(String, String)>,
    #[serde(default)]
    pub filters: Vec<JobFilter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFilter {
    pub name: String,
    #[serde(default)]
    pub args: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutput {
    pub path: PathBuf,
    /// Explicit mappings; first video and audio of the last input when absent
    #[serde(default)]
    pub streams: Option<Vec<JobMapping>>,
    #[serde(default)]
    pub options: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMapping {
    /// `video`, `audio` or `subtitle`
    pub kind: String,
    #[serde(default)]
    pub index: u32,
    /// Position of the source in `inputs`
    #[serde(default)]
    pub input: usize,
}

impl JobSpec {
    /// Load a job file; TOML when the extension is `.toml`, JSON otherwise
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read job file: {}", path.display()))?;

        if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse TOML job: {}", path.display()))
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON job: {}", path.display()))
        }
    }

    /// Register this job's options, inputs and outputs on `supervisor`
    pub fn apply(&self, supervisor: &mut Supervisor) -> Result<()> {
        if self.inputs.is_empty() {
            bail!("Job has no inputs");
        }
        if self.outputs.is_empty() {
            bail!("Job has no outputs");
        }

        for opt in &self.global_options {
            supervisor.option(&opt.name, opt.value.as_deref());
        }

        for input in &self.inputs {
            supervisor.input_with(&input.path, &pairs(&input.options), |node| {
                for filter in &input.filters {
                    node.filter(&filter.name, &pairs(&filter.args));
                }
            });
        }

        for output in &self.outputs {
            let streams = match &output.streams {
                Some(mappings) => Some(self.mappings(mappings)?),
                None => None,
            };
            supervisor
                .output(&output.path, streams, &pairs(&output.options))
                .with_context(|| format!("Invalid output: {}", output.path.display()))?;
        }

        Ok(())
    }

    fn mappings(&self, mappings: &[JobMapping]) -> Result<Vec<StreamMapping>> {
        mappings
            .iter()
            .map(|m| {
                if m.input >= self.inputs.len() {
                    bail!("Mapping refers to input {} but the job has {} inputs", m.input, self.inputs.len());
                }
                Ok(StreamMapping::parse(&m.kind, m.index, m.input)?)
            })
            .collect()
    }
}

fn pairs(options: &[(String, String)]) -> Vec<(&str, &str)> {
    options.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn build(job: &JobSpec) -> Vec<String> {
        let mut supervisor = Supervisor::with_binary("ffmpeg");
        job.apply(&mut supervisor).unwrap();
        supervisor.build_command().unwrap()
    }

    #[test]
    fn test_load_json_job() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.json");
        fs::write(
            &path,
            r#"{
                "global_options": [{"name": "y"}],
                "inputs": [{"path": "a.mp4"}],
                "outputs": [{"path": "b.mp4", "options": [["c:v", "libx264"]]}]
            }"#,
        )
        .unwrap();

        let job = JobSpec::load(&path).unwrap();
        assert_eq!(
            build(&job),
            vec!["ffmpeg", "-y", "-i", "a.mp4", "-map", "0:v:0", "-map", "0:a:0", "-c:v", "libx264", "b.mp4"]
        );
    }

    #[test]
    fn test_load_toml_job() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.toml");
        fs::write(
            &path,
            r#"
[[global_options]]
name = "loglevel"
value = "error"

[[inputs]]
path = "talk.mkv"
options = [["ss", "30"]]

[[inputs.filters]]
name = "scale"
args = [["width", "1280"], ["height", "-1"]]

[[inputs]]
path = "music.flac"

[[outputs]]
path = "out.mkv"
options = [["vf", "fps=30"]]
streams = [
    { kind = "video", index = 0, input = 0 },
    { kind = "audio", index = 0, input = 1 },
]
"#,
        )
        .unwrap();

        let job = JobSpec::load(&path).unwrap();
        assert_eq!(job.inputs.len(), 2);
        assert_eq!(
            build(&job),
            vec![
                "ffmpeg", "-loglevel", "error", "-ss", "30", "-vf", "scale=width=1280:height=-1", "-i", "talk.mkv",
                "-i", "music.flac", "-map", "0:v:0", "-map", "1:a:0", "-vf", "fps=30", "out.mkv",
            ]
        );
    }

    #[test]
    fn test_invalid_mapping_kind() {
        let job = JobSpec {
            inputs: vec![JobInput {
                path: "a.mp4".into(),
                options: vec![],
                filters: vec![],
            }],
            outputs: vec![JobOutput {
                path: "b.mp4".into(),
                streams: Some(vec![JobMapping {
                    kind: "data".to_string(),
                    index: 0,
                    input: 0,
                }]),
                options: vec![],
            }],
            ..Default::default()
        };
        let mut supervisor = Supervisor::with_binary("ffmpeg");
        assert!(job.apply(&mut supervisor).is_err());
    }

    #[test]
    fn test_mapping_to_unknown_input() {
        let job = JobSpec {
            inputs: vec![JobInput {
                path: "a.mp4".into(),
                options: vec![],
                filters: vec![],
            }],
            outputs: vec![JobOutput {
                path: "b.mp4".into(),
                streams: Some(vec![JobMapping {
                    kind: "audio".to_string(),
                    index: 0,
                    input: 3,
                }]),
                options: vec![],
            }],
            ..Default::default()
        };
        let mut supervisor = Supervisor::with_binary("ffmpeg");
        let err = job.apply(&mut supervisor).unwrap_err();
        assert!(err.to_string().contains("input 3"));
    }

    #[test]
    fn test_job_without_outputs() {
        let job = JobSpec {
            inputs: vec![JobInput {
                path: "a.mp4".into(),
                options: vec![],
                filters: vec![],
            }],
            ..Default::default()
        };
        let mut supervisor = Supervisor::with_binary("ffmpeg");
        assert!(job.apply(&mut supervisor).is_err());
    }

    #[test]
    fn test_missing_job_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(JobSpec::load(&dir.path().join("missing.json")).is_err());
    }
}
