use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use log::debug;

use crate::error::Result;
use crate::ffprobe::{FfprobeProber, ProbeData, Prober};
use crate::filter::{FilterChain, FilterNode};
use crate::streams::{StreamCollection, StreamInfo, StreamKind};

/// Set `key` in an ordered option list. An existing key keeps its position.
pub(crate) fn set_option(options: &mut Vec<(String, String)>, key: &str, value: &str) {
    match options.iter_mut().find(|(k, _)| k == key) {
        Some(slot) => slot.1 = value.to_string(),
        None => options.push((key.to_string(), value.to_string())),
    }
}

pub(crate) fn option_list<K, V>(pairs: &[(K, V)]) -> Vec<(String, String)>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut options = Vec::with_capacity(pairs.len());
    for (key, value) in pairs {
        set_option(&mut options, key.as_ref(), value.as_ref());
    }
    options
}

/// Routes one source stream into an output file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamMapping {
    pub kind: StreamKind,
    /// Index of the stream among streams of the same kind
    pub index: u32,
    /// Registration index of the source input
    pub input_index: usize,
}

impl StreamMapping {
    pub fn new(kind: StreamKind, index: u32, input_index: usize) -> Self {
        StreamMapping {
            kind,
            index,
            input_index,
        }
    }

    /// Build a mapping from a category name, rejecting anything other than
    /// `video`, `audio` or `subtitle`
    pub fn parse(kind: &str, index: u32, input_index: usize) -> Result<Self> {
        Ok(StreamMapping::new(kind.parse()?, index, input_index))
    }

    /// The `-map` argument, e.g. `0:v:0`
    pub fn specifier(&self) -> String {
        format!("{}:{}:{}", self.input_index, self.kind.letter(), self.index)
    }
}

/// An input file with its options, filter chain and lazily probed streams
pub struct Input {
    pub path: PathBuf,
    /// Options placed before `-i`, in insertion order
    pub options: Vec<(String, String)>,
    pub filter_chain: Option<FilterChain>,
    index: usize,
    prober: Arc<dyn Prober>,
    probe_data: OnceLock<ProbeData>,
    video: OnceLock<StreamCollection>,
    audio: OnceLock<StreamCollection>,
    subtitle: OnceLock<StreamCollection>,
}

impl fmt::Debug for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Input")
            .field("path", &self.path)
            .field("options", &self.options)
            .field("filter_chain", &self.filter_chain)
            .field("index", &self.index)
            .field("probed", &self.probe_data.get().is_some())
            .finish()
    }
}

impl Input {
    /// Create an input at the given registration index, probed with ffprobe from PATH
    pub fn new(path: impl Into<PathBuf>, index: usize) -> Self {
        Input {
            path: path.into(),
            options: Vec::new(),
            filter_chain: None,
            index,
            prober: Arc::new(FfprobeProber::default()),
            probe_data: OnceLock::new(),
            video: OnceLock::new(),
            audio: OnceLock::new(),
            subtitle: OnceLock::new(),
        }
    }

    pub fn with_prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = prober;
        self
    }

    pub fn with_options<K, V>(mut self, options: &[(K, V)]) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.options = option_list(options);
        self
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Set an input option
    pub fn option(&mut self, key: &str, value: &str) -> &mut Self {
        set_option(&mut self.options, key, value);
        self
    }

    /// Append a filter to this input's chain
    pub fn filter(&mut self, name: &str, args: &[(&str, &str)]) -> &mut Self {
        self.filter_chain
            .get_or_insert_with(FilterChain::new)
            .push(FilterNode::with_args(name, args));
        self
    }

    /// Probe the file, running the prober at most once per input
    pub fn probe(&self) -> Result<&ProbeData> {
        if let Some(data) = self.probe_data.get() {
            return Ok(data);
        }
        debug!("Probing input {}: {}", self.index, self.path.display());
        let data = self.prober.probe(&self.path)?;
        Ok(self.probe_data.get_or_init(|| data))
    }

    pub fn video(&self) -> Result<&StreamCollection> {
        self.streams(StreamKind::Video)
    }

    pub fn audio(&self) -> Result<&StreamCollection> {
        self.streams(StreamKind::Audio)
    }

    pub fn subtitle(&self) -> Result<&StreamCollection> {
        self.streams(StreamKind::Subtitle)
    }

    /// All streams of one kind, computed on first access and cached
    pub fn streams(&self, kind: StreamKind) -> Result<&StreamCollection> {
        let cell = match kind {
            StreamKind::Video => &self.video,
            StreamKind::Audio => &self.audio,
            StreamKind::Subtitle => &self.subtitle,
        };
        if let Some(collection) = cell.get() {
            return Ok(collection);
        }
        let collection = self.collect_streams(kind)?;
        Ok(cell.get_or_init(|| collection))
    }

    fn collect_streams(&self, kind: StreamKind) -> Result<StreamCollection> {
        let data = self.probe()?;
        let streams = data
            .streams
            .iter()
            .filter(|s| s.codec_type.as_deref() == Some(kind.as_str()))
            .map(|s| StreamInfo {
                index: s.index,
                kind,
                codec_name: s.codec_name.clone().unwrap_or_else(|| "unknown".to_string()),
                input_index: self.index,
                metadata: s.tags.clone().unwrap_or_default(),
                raw: s.raw(),
            })
            .collect();
        Ok(StreamCollection::new(streams))
    }
}

/// An output file with its stream mappings and options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Output {
    pub path: PathBuf,
    pub mapped_streams: Vec<StreamMapping>,
    /// Options placed before the output path, in insertion order
    pub options: Vec<(String, String)>,
    /// Filter strings combined into a single `-vf` for this output
    pub filters: Vec<String>,
}

impl Output {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Output {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_streams(mut self, mapped_streams: Vec<StreamMapping>) -> Self {
        self.mapped_streams = mapped_streams;
        self
    }

    pub fn with_options<K, V>(mut self, options: &[(K, V)]) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.options = option_list(options);
        self
    }

    pub fn option(&mut self, key: &str, value: &str) -> &mut Self {
        set_option(&mut self.options, key, value);
        self
    }

    pub fn filter(&mut self, filter: impl Into<String>) -> &mut Self {
        self.filters.push(filter.into());
        self
    }
}
