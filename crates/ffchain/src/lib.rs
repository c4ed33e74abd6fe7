pub mod command;
pub mod config;
pub mod discovery;
pub mod error;
pub mod ffprobe;
pub mod filter;
pub mod launcher;
pub mod nodes;
pub mod process;
pub mod streams;
pub mod supervisor;

pub use command::{command_line, CommandBuilder};
pub use config::ChainConfig;
pub use error::{ChainError, Result};
pub use ffprobe::{FfprobeProber, ProbeData, ProbeFormat, ProbeStream, Prober};
pub use filter::{FilterChain, FilterNode};
pub use launcher::{ChildProcess, Launcher, MemoryInfo, ProcessOutput, ResourceProbe, SystemLauncher};
pub use nodes::{Input, Output, StreamMapping};
pub use process::{Completed, ProcessHandle, ResourceSample, Timing};
pub use streams::{StreamCollection, StreamInfo, StreamKind};
pub use supervisor::{ExecuteOptions, Execution, ProcessRegistry, Supervisor};
