use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;

use crate::config::ChainConfig;
use crate::error::{ChainError, Result};
use crate::launcher::{ChildProcess, MemoryInfo, ResourceProbe};

/// Intervals governing polling, sampling and sampler shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub poll_interval: Duration,
    pub sample_interval: Duration,
    pub join_timeout: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            poll_interval: Duration::from_millis(100),
            sample_interval: Duration::from_millis(100),
            join_timeout: Duration::from_secs(1),
        }
    }
}

impl From<&ChainConfig> for Timing {
    fn from(cfg: &ChainConfig) -> Self {
        Timing {
            poll_interval: cfg.poll_interval(),
            sample_interval: cfg.sample_interval(),
            join_timeout: cfg.join_timeout(),
        }
    }
}

/// One CPU/memory measurement of a monitored process
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceSample {
    /// Time since the process was launched
    pub elapsed: Duration,
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub memory_info: MemoryInfo,
}

/// A process that finished with exit code 0
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completed {
    pub args: Vec<String>,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cooperative stop flag the sampler can sleep on
#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl StopSignal {
    fn stop(&self) {
        *lock(&self.stopped) = true;
        self.cond.notify_all();
    }

    fn is_stopped(&self) -> bool {
        *lock(&self.stopped)
    }

    /// Sleep for `timeout` or until stopped; returns whether stop was requested
    fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = lock(&self.stopped);
        let (guard, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

struct Sampler {
    handle: JoinHandle<()>,
    done: Receiver<()>,
}

/// Supervises one launched process.
///
/// The handle moves from running to terminated exactly once, either when
/// `poll` observes an exit code or when `terminate`/`kill` delivers its
/// signal. When a resource
/// probe is supplied, a background thread records CPU/memory samples until
/// the process exits or the handle stops it.
pub struct ProcessHandle {
    child: Mutex<Box<dyn ChildProcess>>,
    pid: u32,
    args: Vec<String>,
    started_at: DateTime<Utc>,
    timing: Timing,
    terminated: AtomicBool,
    exit_code: Mutex<Option<i32>>,
    output: Mutex<Option<(String, String)>>,
    samples: Arc<Mutex<Vec<ResourceSample>>>,
    stop: Arc<StopSignal>,
    sampler: Mutex<Option<Sampler>>,
}

impl ProcessHandle {
    pub fn new(
        child: Box<dyn ChildProcess>,
        args: Vec<String>,
        probe: Option<Box<dyn ResourceProbe>>,
        timing: Timing,
    ) -> Self {
        let pid = child.id();
        let start = Instant::now();
        let samples = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(StopSignal::default());

        let sampler = probe.and_then(|probe| {
            let (done_tx, done) = mpsc::channel();
            let samples = Arc::clone(&samples);
            let stop = Arc::clone(&stop);
            let interval = timing.sample_interval;
            let spawned = thread::Builder::new()
                .name(format!("ffchain-sampler-{}", pid))
                .spawn(move || collect_metrics(probe, samples, stop, start, interval, done_tx));
            match spawned {
                Ok(handle) => Some(Sampler { handle, done }),
                Err(e) => {
                    warn!("Failed to start resource sampler for process {}: {}", pid, e);
                    None
                }
            }
        });

        ProcessHandle {
            child: Mutex::new(child),
            pid,
            args,
            started_at: Utc::now(),
            timing,
            terminated: AtomicBool::new(false),
            exit_code: Mutex::new(None),
            output: Mutex::new(None),
            samples,
            stop,
            sampler: Mutex::new(sampler),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// The exit code, once observed
    pub fn exit_code(&self) -> Option<i32> {
        *lock(&self.exit_code)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Whether a resource sampler is attached to this process
    pub fn is_monitored(&self) -> bool {
        lock(&self.sampler).is_some()
    }

    /// Snapshot of the resource samples collected so far
    pub fn resource_usage(&self) -> Vec<ResourceSample> {
        lock(&self.samples).clone()
    }

    /// Check for exit without blocking.
    ///
    /// Once an exit code has been observed it is returned from cache and
    /// the child is not queried again.
    pub fn poll(&self) -> Result<Option<i32>> {
        let mut exit_code = lock(&self.exit_code);
        if exit_code.is_some() {
            return Ok(*exit_code);
        }
        let status = lock(&self.child).try_wait()?;
        if let Some(code) = status {
            *exit_code = Some(code);
            if !self.terminated.swap(true, Ordering::SeqCst) {
                info!("Process {} exited with code {}", self.pid, code);
            }
            self.stop.stop();
        }
        Ok(status)
    }

    /// Poll until the process exits or `timeout` elapses.
    ///
    /// On timeout the process is left running.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<i32> {
        // A deadline past the end of the clock waits without bound
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        loop {
            if let Some(code) = self.poll()? {
                return Ok(code);
            }
            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(ChainError::Timeout(timeout.unwrap_or_default()));
                    }
                    self.timing.poll_interval.min(deadline - now)
                }
                None => self.timing.poll_interval,
            };
            thread::sleep(pause);
        }
    }

    /// Ask the process to stop. No-op once terminated.
    pub fn terminate(&self) -> Result<()> {
        self.stop_process("terminate", |child| child.terminate())
    }

    /// Forcefully stop the process. No-op once terminated.
    pub fn kill(&self) -> Result<()> {
        self.stop_process("kill", |child| child.kill())
    }

    fn stop_process<F>(&self, action: &str, signal: F) -> Result<()>
    where
        F: FnOnce(&mut dyn ChildProcess) -> std::io::Result<()>,
    {
        if self.is_terminated() || self.poll()?.is_some() {
            return Ok(());
        }

        {
            let mut child = lock(&self.child);
            if self.is_terminated() {
                return Ok(());
            }
            debug!("Sending {} to process {}", action, self.pid);
            // A failed signal leaves the handle running so the caller can escalate
            if let Err(e) = signal(child.as_mut()) {
                warn!("Failed to {} process {}: {}", action, self.pid, e);
                return Err(ChainError::from(e));
            }
            self.terminated.store(true, Ordering::SeqCst);
        }
        self.stop_sampler();
        Ok(())
    }

    /// Signal the sampler and join it, giving up after the join timeout
    fn stop_sampler(&self) {
        self.stop.stop();
        let Some(sampler) = lock(&self.sampler).take() else {
            return;
        };
        match sampler.done.recv_timeout(self.timing.join_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if sampler.handle.join().is_err() {
                    warn!("Resource sampler for process {} panicked", self.pid);
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Resource sampler for process {} did not stop within {:?}; detaching",
                    self.pid, self.timing.join_timeout
                );
            }
        }
    }

    /// Captured stdout and stderr. Empty for streams that were not piped.
    ///
    /// Reading piped streams blocks until the process closes them.
    pub fn output(&self) -> (String, String) {
        let mut cached = lock(&self.output);
        if let Some(output) = cached.as_ref() {
            return output.clone();
        }
        let (stdout, stderr) = lock(&self.child).take_output();
        let output = (stdout.unwrap_or_default(), stderr.unwrap_or_default());
        *cached = Some(output.clone());
        output
    }

    /// `Ok(None)` while running; the completed result on exit code 0;
    /// `ProcessFailed` on any other exit code.
    pub fn check_result(&self) -> Result<Option<Completed>> {
        let Some(exit_code) = self.poll()? else {
            return Ok(None);
        };
        let (stdout, stderr) = self.output();
        if exit_code == 0 {
            Ok(Some(Completed {
                args: self.args.clone(),
                exit_code,
                stdout,
                stderr,
            }))
        } else {
            Err(ChainError::ProcessFailed {
                args: self.args.clone(),
                exit_code,
                stdout,
                stderr,
            })
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.stop_sampler();
    }
}

/// Sampler loop: one reading per interval while the process runs.
/// Probe failures end the loop quietly.
fn collect_metrics(
    mut probe: Box<dyn ResourceProbe>,
    samples: Arc<Mutex<Vec<ResourceSample>>>,
    stop: Arc<StopSignal>,
    start: Instant,
    interval: Duration,
    done: Sender<()>,
) {
    while !stop.is_stopped() {
        let usage = match probe.is_running() {
            Ok(true) => probe.sample(),
            Ok(false) => break,
            Err(e) => Err(e),
        };
        match usage {
            Ok(usage) => lock(&samples).push(ResourceSample {
                elapsed: start.elapsed(),
                cpu_percent: usage.cpu_percent,
                memory_percent: usage.memory_percent,
                memory_info: usage.memory_info,
            }),
            Err(e) => {
                debug!("Resource sampling stopped: {}", e);
                break;
            }
        }
        if stop.wait_timeout(interval) {
            break;
        }
    }
    let _ = done.send(());
}
