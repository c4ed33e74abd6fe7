use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};

use log::debug;
use serde::Serialize;
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, Signal, System};
use thiserror::Error;

/// Captured result of a process run to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// A launched process as seen by [`crate::process::ProcessHandle`]
pub trait ChildProcess: Send {
    fn id(&self) -> u32;
    /// Non-blocking exit check
    fn try_wait(&mut self) -> io::Result<Option<i32>>;
    /// Ask the process to stop (SIGTERM where available)
    fn terminate(&mut self) -> io::Result<()>;
    /// Stop the process forcefully
    fn kill(&mut self) -> io::Result<()>;
    /// Drain whatever stdout/stderr was captured; `None` for streams not piped
    fn take_output(&mut self) -> (Option<String>, Option<String>);
}

/// Memory figures of a sampled process, in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryInfo {
    pub rss: u64,
    pub vms: u64,
}

/// One reading from a [`ResourceProbe`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Usage {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub memory_info: MemoryInfo,
}

/// Reasons a resource probe stops producing readings
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SampleError {
    #[error("process {0} no longer exists")]
    NoSuchProcess(u32),
    #[error("access denied to process {0}")]
    AccessDenied(u32),
}

/// Reads CPU and memory usage of one running process
pub trait ResourceProbe: Send {
    fn is_running(&mut self) -> Result<bool, SampleError>;
    fn sample(&mut self) -> Result<Usage, SampleError>;
}

/// Starts processes and, optionally, provides metrics for them
pub trait Launcher: Send + Sync {
    /// Start `args[0]` with the remaining arguments, without waiting
    fn spawn(&self, args: &[String], capture_output: bool) -> io::Result<Box<dyn ChildProcess>>;
    /// Run to completion with stdout/stderr captured
    fn run(&self, args: &[String]) -> io::Result<ProcessOutput>;
    /// Whether [`Launcher::resource_probe`] can ever return a probe
    fn supports_metrics(&self) -> bool;
    fn resource_probe(&self, pid: u32) -> Option<Box<dyn ResourceProbe>>;
}

/// Launches real OS processes; metrics and signals come from `sysinfo`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl SystemLauncher {
    pub fn new() -> Self {
        SystemLauncher
    }

    fn command(args: &[String]) -> io::Result<Command> {
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;
        let mut cmd = Command::new(program);
        cmd.args(rest);
        Ok(cmd)
    }
}

impl Launcher for SystemLauncher {
    fn spawn(&self, args: &[String], capture_output: bool) -> io::Result<Box<dyn ChildProcess>> {
        let mut cmd = Self::command(args)?;
        if capture_output {
            cmd.stdout(Stdio::piped());
            cmd.stderr(Stdio::piped());
        }
        let child = cmd.spawn()?;
        debug!("Spawned process {}: {}", child.id(), args.join(" "));
        Ok(Box::new(SystemChild { child }))
    }

    fn run(&self, args: &[String]) -> io::Result<ProcessOutput> {
        let output = Self::command(args)?.output()?;
        Ok(ProcessOutput {
            exit_code: exit_code(output.status),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn supports_metrics(&self) -> bool {
        sysinfo::IS_SUPPORTED_SYSTEM
    }

    fn resource_probe(&self, pid: u32) -> Option<Box<dyn ResourceProbe>> {
        if !self.supports_metrics() {
            return None;
        }
        Some(Box::new(SysinfoProbe::new(pid)))
    }
}

/// Exit code of a finished process; signal deaths map to `-signal`
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}

struct SystemChild {
    child: Child,
}

impl ChildProcess for SystemChild {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        Ok(self.child.try_wait()?.map(exit_code))
    }

    fn terminate(&mut self) -> io::Result<()> {
        let pid = Pid::from_u32(self.child.id());
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
        match system.process(pid).and_then(|p| p.kill_with(Signal::Term)) {
            Some(true) => Ok(()),
            // No SIGTERM on this platform, or the signal could not be sent
            _ => self.child.kill(),
        }
    }

    fn kill(&mut self) -> io::Result<()> {
        self.child.kill()
    }

    fn take_output(&mut self) -> (Option<String>, Option<String>) {
        let stdout = self.child.stdout.take().map(read_lossy);
        let stderr = self.child.stderr.take().map(read_lossy);
        (stdout, stderr)
    }
}

fn read_lossy<R: Read>(mut reader: R) -> String {
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf) {
        debug!("Failed to read process output: {}", e);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Per-process CPU and memory readings via `sysinfo`
pub struct SysinfoProbe {
    system: System,
    pid: Pid,
    total_memory: u64,
}

impl SysinfoProbe {
    pub fn new(pid: u32) -> Self {
        let mut system = System::new();
        system.refresh_memory();
        let total_memory = system.total_memory();
        SysinfoProbe {
            system,
            pid: Pid::from_u32(pid),
            total_memory,
        }
    }

    fn refresh(&mut self) -> Result<&sysinfo::Process, SampleError> {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            ProcessRefreshKind::new().with_cpu().with_memory(),
        );
        self.system
            .process(self.pid)
            .ok_or(SampleError::NoSuchProcess(self.pid.as_u32()))
    }
}

impl ResourceProbe for SysinfoProbe {
    fn is_running(&mut self) -> Result<bool, SampleError> {
        let process = self.refresh()?;
        Ok(!matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
    }

    fn sample(&mut self) -> Result<Usage, SampleError> {
        let total_memory = self.total_memory;
        let pid = self.pid;
        let process = self
            .system
            .process(pid)
            .ok_or(SampleError::NoSuchProcess(pid.as_u32()))?;
        let rss = process.memory();
        let memory_percent = if total_memory == 0 {
            0.0
        } else {
            (rss as f64 / total_memory as f64 * 100.0) as f32
        };
        Ok(Usage {
            cpu_percent: process.cpu_usage(),
            memory_percent,
            memory_info: MemoryInfo {
                rss,
                vms: process.virtual_memory(),
            },
        })
    }
}
