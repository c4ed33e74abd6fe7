use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};

use crate::command::{command_line, CommandBuilder};
use crate::config::ChainConfig;
use crate::discovery;
use crate::error::{ChainError, Result};
use crate::ffprobe::{FfprobeProber, Prober};
use crate::launcher::{Launcher, SystemLauncher};
use crate::nodes::{Input, Output, StreamMapping};
use crate::process::{Completed, ProcessHandle, Timing};
use crate::streams::StreamKind;

/// Every process launched in the background by any [`Supervisor`]
static ACTIVE_PROCESSES: ProcessRegistry = ProcessRegistry::new();

/// Process-wide list of launched handles, drained on bulk termination
pub struct ProcessRegistry {
    handles: Mutex<Vec<Arc<ProcessHandle>>>,
}

impl ProcessRegistry {
    pub const fn new() -> Self {
        ProcessRegistry {
            handles: Mutex::new(Vec::new()),
        }
    }

    fn handles(&self) -> MutexGuard<'_, Vec<Arc<ProcessHandle>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a handle; handles already terminated are dropped from the list
    pub fn register(&self, handle: Arc<ProcessHandle>) {
        let mut handles = self.handles();
        handles.retain(|h| !h.is_terminated());
        handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles().is_empty()
    }

    /// Terminate every tracked handle and empty the registry.
    ///
    /// The list is taken out under the lock and terminated outside it, so
    /// a slow process never blocks concurrent registration.
    pub fn terminate_all(&self) {
        let handles = std::mem::take(&mut *self.handles());
        for handle in handles {
            if let Err(e) = handle.terminate() {
                warn!("Failed to terminate process {}: {}", handle.pid(), e);
            }
        }
    }
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// How [`Supervisor::execute`] runs the command
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Run to completion and capture stdout/stderr
    pub capture_output: bool,
    /// Sample CPU/memory usage and hand back the process handle
    pub monitor: bool,
}

/// Outcome of [`Supervisor::execute`]
pub enum Execution {
    /// Captured run that exited with code 0
    Completed(Completed),
    /// Background process with resource sampling
    Monitored(Arc<ProcessHandle>),
    /// Background process reachable through [`Supervisor::process`]
    Detached,
}

/// Builds and runs ffmpeg commands.
///
/// Inputs and outputs belong to this instance; only the registry of
/// launched processes is shared process-wide.
pub struct Supervisor {
    binary_path: PathBuf,
    global_options: Vec<String>,
    inputs: Vec<Input>,
    outputs: Vec<Output>,
    current_process: Option<Arc<ProcessHandle>>,
    launcher: Box<dyn Launcher>,
    prober: Arc<dyn Prober>,
    timing: Timing,
}

impl Supervisor {
    /// Use the ffmpeg binary found on PATH
    pub fn new() -> Result<Self> {
        Ok(Self::with_binary(discovery::resolve("ffmpeg", None)?))
    }

    pub fn with_binary(binary_path: impl Into<PathBuf>) -> Self {
        Supervisor {
            binary_path: binary_path.into(),
            global_options: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            current_process: None,
            launcher: Box::new(SystemLauncher::new()),
            prober: Arc::new(FfprobeProber::default()),
            timing: Timing::default(),
        }
    }

    /// Binaries and intervals from configuration; unset binaries come from PATH
    pub fn from_config(cfg: &ChainConfig) -> Result<Self> {
        let binary_path = discovery::resolve("ffmpeg", cfg.ffmpeg_bin.as_deref())?;
        Ok(Self::with_binary(binary_path)
            .with_prober(Arc::new(FfprobeProber::from_option(cfg.ffprobe_bin.clone())))
            .with_timing(Timing::from(cfg)))
    }

    pub fn with_launcher(mut self, launcher: Box<dyn Launcher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Prober handed to inputs registered from now on
    pub fn with_prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = prober;
        self
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    pub fn global_options(&self) -> &[String] {
        &self.global_options
    }

    pub fn inputs(&self) -> &[Input] {
        &self.inputs
    }

    pub fn input_mut(&mut self, index: usize) -> Option<&mut Input> {
        self.inputs.get_mut(index)
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    /// Add a global option, rendered as `-name` or `-name value`
    pub fn option(&mut self, name: &str, value: Option<&str>) -> &mut Self {
        self.global_options.push(format!("-{}", name));
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            self.global_options.push(value.to_string());
        }
        self
    }

    /// Register an input file; its index is the number of inputs before it
    pub fn input(&mut self, path: impl Into<PathBuf>, options: &[(&str, &str)]) -> &mut Self {
        self.input_with(path, options, |_| {})
    }

    /// Register an input file and configure it (e.g. attach filters) in place
    pub fn input_with<F>(&mut self, path: impl Into<PathBuf>, options: &[(&str, &str)], configure: F) -> &mut Self
    where
        F: FnOnce(&mut Input),
    {
        let mut input = Input::new(path, self.inputs.len())
            .with_prober(Arc::clone(&self.prober))
            .with_options(options);
        configure(&mut input);
        self.inputs.push(input);
        self
    }

    /// Map one stream of `input` for use in an output
    pub fn map_stream(&self, input: &Input, kind: StreamKind, index: u32) -> StreamMapping {
        StreamMapping::new(kind, index, input.index())
    }

    /// Register an output file.
    ///
    /// Without explicit mappings, the first video and first audio stream of
    /// the most recently added input are mapped.
    pub fn output(
        &mut self,
        path: impl Into<PathBuf>,
        mapped_streams: Option<Vec<StreamMapping>>,
        options: &[(&str, &str)],
    ) -> Result<&mut Self> {
        let mapped_streams = match mapped_streams {
            Some(streams) => streams,
            None => {
                let last = self.inputs.last().ok_or(ChainError::NoInputs)?;
                vec![
                    StreamMapping::new(StreamKind::Video, 0, last.index()),
                    StreamMapping::new(StreamKind::Audio, 0, last.index()),
                ]
            }
        };
        let output = Output::new(path).with_streams(mapped_streams).with_options(options);
        self.outputs.push(output);
        Ok(self)
    }

    /// The full argument vector, binary path first
    pub fn build_command(&self) -> Result<Vec<String>> {
        CommandBuilder::new().build(&self.binary_path, &self.global_options, &self.inputs, &self.outputs)
    }

    /// The command as a single printable line
    pub fn command_line(&self) -> Result<String> {
        Ok(command_line(&self.build_command()?))
    }

    /// Run the configured command.
    ///
    /// Monitoring needs a launcher with metrics support; without it this
    /// fails with `Unsupported` before anything is launched.
    pub fn execute(&mut self, options: ExecuteOptions) -> Result<Execution> {
        let command = self.build_command()?;

        if options.monitor && !self.launcher.supports_metrics() {
            return Err(ChainError::Unsupported(
                "resource monitoring requires process metrics support".to_string(),
            ));
        }

        debug!("Executing FFmpeg: {}", command_line(&command));

        if options.capture_output {
            let output = self.launcher.run(&command).map_err(|e| self.launch_error(e))?;
            if output.exit_code != 0 {
                return Err(ChainError::ProcessFailed {
                    args: command,
                    exit_code: output.exit_code,
                    stdout: output.stdout,
                    stderr: output.stderr,
                });
            }
            info!("FFmpeg execution completed successfully");
            return Ok(Execution::Completed(Completed {
                args: command,
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            }));
        }

        let child = self.launcher.spawn(&command, false).map_err(|e| self.launch_error(e))?;
        let probe = if options.monitor {
            self.launcher.resource_probe(child.id())
        } else {
            None
        };
        let handle = Arc::new(ProcessHandle::new(child, command, probe, self.timing));
        info!("Started FFmpeg process {}", handle.pid());

        self.current_process = Some(Arc::clone(&handle));
        ACTIVE_PROCESSES.register(Arc::clone(&handle));

        Ok(if options.monitor {
            Execution::Monitored(handle)
        } else {
            Execution::Detached
        })
    }

    fn launch_error(&self, e: io::Error) -> ChainError {
        match e.kind() {
            io::ErrorKind::NotFound => ChainError::NotFound {
                binary: self.binary_path.display().to_string(),
            },
            _ => ChainError::Io(e),
        }
    }

    /// The current background process, if any
    pub fn process(&self) -> Option<&Arc<ProcessHandle>> {
        self.current_process.as_ref()
    }

    /// Poll the current process; `None` when nothing runs or it has not exited
    pub fn poll(&self) -> Result<Option<i32>> {
        match &self.current_process {
            Some(process) => process.poll(),
            None => Ok(None),
        }
    }

    /// Wait for the current process; `None` when nothing was launched
    pub fn wait(&self, timeout: Option<Duration>) -> Result<Option<i32>> {
        match &self.current_process {
            Some(process) => process.wait(timeout).map(Some),
            None => Ok(None),
        }
    }

    /// Terminate and forget the current process
    pub fn terminate(&mut self) -> Result<()> {
        match self.current_process.take() {
            Some(process) => process.terminate(),
            None => Ok(()),
        }
    }

    /// Stop the current process before shutdown, logging rather than failing
    pub fn cleanup(&mut self) {
        if let Err(e) = self.terminate() {
            warn!("Failed to clean up FFmpeg process: {}", e);
        }
    }

    /// Terminate every background process launched by any supervisor.
    ///
    /// Intended for shutdown paths such as a Ctrl-C listener.
    pub fn terminate_all() {
        ACTIVE_PROCESSES.terminate_all();
    }

}

/// Stops the current process when the supervisor goes away, as a process
/// exit hook would
impl Drop for Supervisor {
    fn drop(&mut self) {
        self.cleanup();
    }
}
