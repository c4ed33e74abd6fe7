use std::path::Path;

use crate::error::{ChainError, Result};
use crate::nodes::{Input, Output};

/// Output option key whose value joins the output's filter list
const OUTPUT_FILTER_KEY: &str = "vf";

/// Command builder for generating ffmpeg argument vectors
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandBuilder;

impl CommandBuilder {
    /// Create a new command builder
    pub fn new() -> Self {
        CommandBuilder
    }

    /// Build the full argument vector, binary path first.
    ///
    /// Token order:
    /// - global options, as added
    /// - per input: `-key value` options, `-vf <chain>` if filtered, `-i <path>`
    /// - per output: `-map` per mapping, `-key value` options, `-vf <filters>`
    ///   if any, then the output path
    ///
    /// An output option named `vf` is not emitted inline; its value joins the
    /// output's filter list. The outputs themselves are left untouched.
    ///
    /// Fails with `NonUtf8Path` rather than passing a mangled path to ffmpeg.
    pub fn build(
        &self,
        binary: &Path,
        global_options: &[String],
        inputs: &[Input],
        outputs: &[Output],
    ) -> Result<Vec<String>> {
        let mut args = Vec::new();

        args.push(path_arg(binary)?);
        args.extend(global_options.iter().cloned());

        for input in inputs {
            for (key, value) in &input.options {
                args.push(format!("-{}", key));
                args.push(value.clone());
            }

            if let Some(chain) = input.filter_chain.as_ref().filter(|c| !c.is_empty()) {
                args.push("-vf".to_string());
                args.push(chain.to_string());
            }

            args.push("-i".to_string());
            args.push(path_arg(&input.path)?);
        }

        for output in outputs {
            for mapping in &output.mapped_streams {
                args.push("-map".to_string());
                args.push(mapping.specifier());
            }

            let mut filters = output.filters.clone();
            for (key, value) in &output.options {
                if key == OUTPUT_FILTER_KEY {
                    filters.push(value.clone());
                } else {
                    args.push(format!("-{}", key));
                    args.push(value.clone());
                }
            }

            if !filters.is_empty() {
                args.push("-vf".to_string());
                args.push(filters.join(","));
            }

            args.push(path_arg(&output.path)?);
        }

        Ok(args)
    }
}

fn path_arg(path: &Path) -> Result<String> {
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| ChainError::NonUtf8Path(path.to_path_buf()))
}

/// Render an argument vector as a single shell-style line
pub fn command_line(args: &[String]) -> String {
    args.iter()
        .map(|arg| quote(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote(arg: &str) -> String {
    let needs_quotes = arg.is_empty()
        || arg
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '\'' | '"' | '\\' | '$' | '`' | '|' | '&' | ';' | '(' | ')' | '<' | '>' | '*' | '?'));
    if needs_quotes {
        format!("'{}'", arg.replace('\'', "'\\''"))
    } else {
        arg.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::StreamMapping;
    use crate::streams::StreamKind;
    use proptest::prelude::*;
    use std::path::PathBuf;

    fn strings(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|t| t.to_string()).collect()
    }

    fn default_output(path: impl Into<PathBuf>, input_index: usize) -> Output {
        Output::new(path).with_streams(vec![
            StreamMapping::new(StreamKind::Video, 0, input_index),
            StreamMapping::new(StreamKind::Audio, 0, input_index),
        ])
    }

    #[test]
    fn test_full_token_order() {
        let mut input = Input::new("in.mkv", 0).with_options(&[("ss", "5"), ("t", "10")]);
        input.filter("scale", &[("width", "1280"), ("height", "-1")]).filter("fps", &[("fps", "30")]);
        let output = default_output("out.mp4", 0).with_options(&[("c:v", "libx264"), ("crf", "23")]);

        let args = CommandBuilder::new().build(
            Path::new("/usr/bin/ffmpeg"),
            &strings(&["-y", "-loglevel", "error"]),
            &[input],
            &[output],
        )
        .unwrap();

        assert_eq!(
            args,
            strings(&[
                "/usr/bin/ffmpeg",
                "-y",
                "-loglevel",
                "error",
                "-ss",
                "5",
                "-t",
                "10",
                "-vf",
                "scale=width=1280:height=-1,fps=fps=30",
                "-i",
                "in.mkv",
                "-map",
                "0:v:0",
                "-map",
                "0:a:0",
                "-c:v",
                "libx264",
                "-crf",
                "23",
                "out.mp4",
            ])
        );
    }

    #[test]
    fn test_vf_option_routed_to_filters() {
        let mut output = Output::new("out.mp4").with_options(&[("vf", "hflip"), ("an", "1")]);
        output.filter("scale=640:-1");
        let input = Input::new("in.mp4", 0);

        let builder = CommandBuilder::new();
        let args = builder.build(Path::new("ffmpeg"), &[], &[input], std::slice::from_ref(&output)).unwrap();
        assert_eq!(
            args,
            strings(&["ffmpeg", "-i", "in.mp4", "-an", "1", "-vf", "scale=640:-1,hflip", "out.mp4"])
        );
        // The output keeps its own filters; a rebuild yields the same tokens
        assert_eq!(output.filters, strings(&["scale=640:-1"]));
        let input = Input::new("in.mp4", 0);
        assert_eq!(builder.build(Path::new("ffmpeg"), &[], &[input], &[output]).unwrap(), args);
    }

    #[test]
    fn test_multiple_inputs_and_outputs_keep_order() {
        let inputs = vec![Input::new("a.mp4", 0), Input::new("b.wav", 1)];
        let outputs = vec![
            Output::new("video.mkv").with_streams(vec![StreamMapping::new(StreamKind::Video, 0, 0)]),
            Output::new("audio.flac").with_streams(vec![
                StreamMapping::new(StreamKind::Audio, 0, 1),
                StreamMapping::new(StreamKind::Subtitle, 2, 0),
            ]),
        ];

        let args = CommandBuilder::new().build(Path::new("ffmpeg"), &[], &inputs, &outputs).unwrap();
        assert_eq!(
            args,
            strings(&[
                "ffmpeg", "-i", "a.mp4", "-i", "b.wav", "-map", "0:v:0", "video.mkv", "-map", "1:a:0",
                "-map", "0:s:2", "audio.flac",
            ])
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_path_is_rejected() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let path = PathBuf::from(OsStr::from_bytes(b"clip\xff.mp4"));
        let builder = CommandBuilder::new();

        let err = builder
            .build(Path::new("ffmpeg"), &[], &[Input::new(path.clone(), 0)], &[default_output("out.mp4", 0)])
            .unwrap_err();
        assert!(matches!(err, ChainError::NonUtf8Path(ref p) if *p == path));

        let err = builder
            .build(Path::new("ffmpeg"), &[], &[Input::new("in.mp4", 0)], &[default_output(path.clone(), 0)])
            .unwrap_err();
        assert!(matches!(err, ChainError::NonUtf8Path(_)));
    }

    #[test]
    fn test_command_line_quotes_when_needed() {
        let args = strings(&["ffmpeg", "-i", "my movie.mkv", "-metadata", "title=It's", "out.mp4"]);
        assert_eq!(
            command_line(&args),
            "ffmpeg -i 'my movie.mkv' -metadata 'title=It'\\''s' out.mp4"
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Building is pure: same configuration, same tokens
        #[test]
        fn test_build_is_deterministic(
            paths in prop::collection::vec("[a-z]{1,8}\\.mp4", 1..4),
            filters in prop::collection::vec("[a-z]{1,6}", 0..3),
        ) {
            let inputs: Vec<Input> = paths.iter().enumerate().map(|(i, p)| Input::new(p.clone(), i)).collect();
            let mut output = default_output("out.mkv", inputs.len() - 1);
            for filter in &filters {
                output.option("vf", filter);
            }
            let outputs = vec![output];
            let builder = CommandBuilder::new();
            let first = builder.build(&PathBuf::from("ffmpeg"), &[], &inputs, &outputs).unwrap();
            let second = builder.build(&PathBuf::from("ffmpeg"), &[], &inputs, &outputs).unwrap();
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first.last().map(String::as_str), Some("out.mkv"));
            prop_assert_eq!(first.iter().filter(|t| *t == "-i").count(), paths.len());
        }
    }
}
