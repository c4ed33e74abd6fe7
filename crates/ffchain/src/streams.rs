use std::collections::HashMap;
use std::fmt;
use std::ops::Index;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ChainError, Result};

/// Category of an elementary stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
}

impl StreamKind {
    pub const ALL: [StreamKind; 3] = [StreamKind::Video, StreamKind::Audio, StreamKind::Subtitle];

    /// Name as reported in ffprobe's `codec_type`
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Video => "video",
            StreamKind::Audio => "audio",
            StreamKind::Subtitle => "subtitle",
        }
    }

    /// Specifier letter used in `-map` arguments
    pub fn letter(&self) -> char {
        match self {
            StreamKind::Video => 'v',
            StreamKind::Audio => 'a',
            StreamKind::Subtitle => 's',
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamKind {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "video" => Ok(StreamKind::Video),
            "audio" => Ok(StreamKind::Audio),
            "subtitle" => Ok(StreamKind::Subtitle),
            other => Err(ChainError::InvalidStreamType(other.to_string())),
        }
    }
}

/// One probed stream of an input file
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    /// Stream index within its container
    pub index: u32,
    pub kind: StreamKind,
    pub codec_name: String,
    /// Registration index of the input the stream belongs to
    pub input_index: usize,
    /// Stream tags (language, title, ...)
    pub metadata: HashMap<String, String>,
    /// The full ffprobe record for this stream
    pub raw: serde_json::Value,
}

impl StreamInfo {
    pub fn language(&self) -> Option<&str> {
        self.metadata.get("language").map(String::as_str)
    }

    pub fn title(&self) -> Option<&str> {
        self.metadata.get("title").map(String::as_str)
    }
}

/// Ordered, bounds-checked collection of streams of one category
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamCollection {
    streams: Vec<StreamInfo>,
}

impl StreamCollection {
    pub fn new(streams: Vec<StreamInfo>) -> Self {
        StreamCollection { streams }
    }

    /// Checked access; fails with `IndexOutOfRange` at or beyond `len()`
    pub fn get(&self, index: usize) -> Result<&StreamInfo> {
        self.streams.get(index).ok_or(ChainError::IndexOutOfRange {
            index,
            len: self.streams.len(),
        })
    }

    pub fn first(&self) -> Option<&StreamInfo> {
        self.streams.first()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StreamInfo> {
        self.streams.iter()
    }
}

impl Index<usize> for StreamCollection {
    type Output = StreamInfo;

    fn index(&self, index: usize) -> &StreamInfo {
        &self.streams[index]
    }
}

impl<'a> IntoIterator for &'a StreamCollection {
    type Item = &'a StreamInfo;
    type IntoIter = std::slice::Iter<'a, StreamInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.streams.iter()
    }
}

impl IntoIterator for StreamCollection {
    type Item = StreamInfo;
    type IntoIter = std::vec::IntoIter<StreamInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.streams.into_iter()
    }
}
