//! Minimal process model used by the job controller.
//!
//! `Executor` builds a `ProcessHandle` for a program and its arguments without
//! spawning anything. The handle is shared between the job, its wait watcher
//! and `Job::stop`, so every operation takes `&self` and the implementations
//! keep their mutable state behind locks.

use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use std::time::Duration;

use crate::core::error::DownloadError;

pub trait Executor: Send + Sync {
    fn create_command(&self, program: &str, args: &[String]) -> Arc<dyn ProcessHandle>;
}

pub trait ProcessHandle: Send + Sync {
    fn start(&self) -> Result<(), DownloadError>;
    /// Blocks until the process terminates.
    fn wait(&self) -> Result<(), DownloadError>;
    fn stdout_pipe(&self) -> Result<OutputPipe, DownloadError>;
    fn stderr_pipe(&self) -> Result<OutputPipe, DownloadError>;
    /// `None` until `start` succeeds.
    fn process(&self) -> Option<ProcessId>;
    /// `None` until `wait` has returned.
    fn process_state(&self) -> Option<ExitState>;
    /// Asks the process to finish gracefully (SIGINT on unix).
    fn interrupt(&self) -> Result<(), DownloadError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitState {
    exited: bool,
    code: Option<i32>,
}

impl ExitState {
    pub fn new(exited: bool, code: Option<i32>) -> Self {
        Self { exited, code }
    }

    /// True when the process ran to an exit on its own rather than being
    /// torn down by a signal.
    pub fn exited(&self) -> bool {
        self.exited
    }

    pub fn code(&self) -> Option<i32> {
        self.code
    }
}

impl From<ExitStatus> for ExitState {
    fn from(status: ExitStatus) -> Self {
        Self::new(status.code().is_some(), status.code())
    }
}

/// Readable end of one output stream.
///
/// Clones share the same underlying stream. A pipe can be handed out before
/// the process exists; reads fail with `NotConnected` until it is attached.
#[derive(Clone, Default)]
pub struct OutputPipe {
    slot: Arc<Mutex<Option<Box<dyn Read + Send>>>>,
}

impl OutputPipe {
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn connected(reader: impl Read + Send + 'static) -> Self {
        let pipe = Self::default();
        pipe.attach(reader);
        pipe
    }

    pub fn attach(&self, reader: impl Read + Send + 'static) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(Box::new(reader));
        }
    }

    pub fn is_connected(&self) -> bool {
        self.slot.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }
}

impl Read for OutputPipe {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| io::Error::other("output pipe lock poisoned"))?;
        match slot.as_mut() {
            Some(reader) => reader.read(buf),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "process has not been started",
            )),
        }
    }
}

/// How often `RealProcess::wait` polls for exit.
const WAIT_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Default, Clone, Copy)]
pub struct RealExecutor;

impl Executor for RealExecutor {
    fn create_command(&self, program: &str, args: &[String]) -> Arc<dyn ProcessHandle> {
        Arc::new(RealProcess::new(program, args))
    }
}

/// `std::process` backed handle.
///
/// The child is only reaped while its lock is held, and `interrupt` signals
/// under the same lock, so a signal never reaches a recycled pid.
pub struct RealProcess {
    program: String,
    command: Mutex<Command>,
    child: Mutex<Option<Child>>,
    pid: OnceLock<u32>,
    status: OnceLock<ExitStatus>,
    stdout: OutputPipe,
    stderr: OutputPipe,
}

impl RealProcess {
    pub fn new(program: &str, args: &[String]) -> Self {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        Self {
            program: program.to_string(),
            command: Mutex::new(command),
            child: Mutex::new(None),
            pid: OnceLock::new(),
            status: OnceLock::new(),
            stdout: OutputPipe::detached(),
            stderr: OutputPipe::detached(),
        }
    }

    fn request_pipe(&self, stream: StreamKind) -> Result<OutputPipe, DownloadError> {
        let mut command = self.command.lock().map_err(|_| DownloadError::Pipe {
            message: "command lock poisoned".to_string(),
        })?;

        let pipe = match stream {
            StreamKind::Stdout => &self.stdout,
            StreamKind::Stderr => &self.stderr,
        };

        if self.pid.get().is_some() {
            if pipe.is_connected() {
                return Ok(pipe.clone());
            }
            return Err(DownloadError::Pipe {
                message: format!("{stream} must be requested before the process starts"),
            });
        }

        match stream {
            StreamKind::Stdout => command.stdout(Stdio::piped()),
            StreamKind::Stderr => command.stderr(Stdio::piped()),
        };
        Ok(pipe.clone())
    }

    fn settle(&self, status: ExitStatus) -> Result<(), DownloadError> {
        if status.success() {
            Ok(())
        } else {
            Err(DownloadError::Exited {
                exit_code: status.code(),
            })
        }
    }
}

impl ProcessHandle for RealProcess {
    fn start(&self) -> Result<(), DownloadError> {
        let mut command = self.command.lock().map_err(|_| DownloadError::Spawn {
            program: self.program.clone(),
            message: "command lock poisoned".to_string(),
        })?;

        if self.pid.get().is_some() {
            return Err(DownloadError::AlreadyStarted);
        }

        let mut child = command
            .spawn()
            .map_err(|e| DownloadError::spawn(&self.program, e))?;

        if let Some(stdout) = child.stdout.take() {
            self.stdout.attach(stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            self.stderr.attach(stderr);
        }

        let _ = self.pid.set(child.id());
        if let Ok(mut slot) = self.child.lock() {
            *slot = Some(child);
        }
        Ok(())
    }

    fn wait(&self) -> Result<(), DownloadError> {
        loop {
            {
                let mut slot = self.child.lock().map_err(|_| DownloadError::Wait {
                    message: "child lock poisoned".to_string(),
                })?;
                if let Some(status) = self.status.get() {
                    return self.settle(*status);
                }
                let child = slot.as_mut().ok_or(DownloadError::NotStarted)?;
                let reaped = child.try_wait().map_err(|e| DownloadError::Wait {
                    message: e.to_string(),
                })?;
                if let Some(status) = reaped {
                    let _ = self.status.set(status);
                    return self.settle(status);
                }
            }
            thread::sleep(WAIT_POLL);
        }
    }

    fn stdout_pipe(&self) -> Result<OutputPipe, DownloadError> {
        self.request_pipe(StreamKind::Stdout)
    }

    fn stderr_pipe(&self) -> Result<OutputPipe, DownloadError> {
        self.request_pipe(StreamKind::Stderr)
    }

    fn process(&self) -> Option<ProcessId> {
        self.pid.get().copied().map(ProcessId)
    }

    fn process_state(&self) -> Option<ExitState> {
        self.status.get().copied().map(ExitState::from)
    }

    fn interrupt(&self) -> Result<(), DownloadError> {
        let slot = self.child.lock().map_err(|_| DownloadError::Signal {
            message: "child lock poisoned".to_string(),
        })?;
        if self.status.get().is_some() {
            return Ok(());
        }
        let child = slot.as_ref().ok_or(DownloadError::NotStarted)?;
        send_interrupt(child.id())
    }
}

#[cfg(unix)]
fn send_interrupt(pid: u32) -> Result<(), DownloadError> {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| DownloadError::Signal {
        message: format!("pid {pid} out of range"),
    })?;
    signal::kill(Pid::from_raw(raw), Signal::SIGINT).map_err(|e| DownloadError::Signal {
        message: e.to_string(),
    })
}

#[cfg(not(unix))]
fn send_interrupt(_pid: u32) -> Result<(), DownloadError> {
    Err(DownloadError::Signal {
        message: "interrupt is not supported on this platform".to_string(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Stdout => f.write_str("stdout"),
            StreamKind::Stderr => f.write_str("stderr"),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> RealProcess {
        RealProcess::new("sh", &["-c".to_string(), script.to_string()])
    }

    #[test]
    fn handle_is_inert_until_started() {
        let process = sh("exit 0");
        assert!(process.process().is_none());
        assert!(process.process_state().is_none());
        assert_eq!(process.wait(), Err(DownloadError::NotStarted));
        assert_eq!(process.interrupt(), Err(DownloadError::NotStarted));
    }

    #[test]
    fn captures_stdout_and_exit_state() {
        let process = sh("printf hello");
        let mut stdout = process.stdout_pipe().unwrap();
        process.start().unwrap();
        assert!(process.process().is_some());

        let mut captured = String::new();
        stdout.read_to_string(&mut captured).unwrap();
        assert_eq!(captured, "hello");

        assert_eq!(process.wait(), Ok(()));
        let state = process.process_state().unwrap();
        assert!(state.exited());
        assert_eq!(state.code(), Some(0));
    }

    #[test]
    fn non_zero_exit_is_a_wait_error() {
        let process = sh("exit 3");
        process.start().unwrap();
        assert_eq!(
            process.wait(),
            Err(DownloadError::Exited { exit_code: Some(3) })
        );
    }

    #[test]
    fn missing_binary_is_reported() {
        let process = RealProcess::new("ytflow-definitely-missing-binary", &[]);
        assert!(matches!(
            process.start(),
            Err(DownloadError::BinaryNotFound { .. })
        ));
        assert!(process.process().is_none());
    }

    #[test]
    fn pipes_cannot_be_attached_after_start() {
        let process = sh("exit 0");
        process.start().unwrap();
        assert!(matches!(
            process.stderr_pipe(),
            Err(DownloadError::Pipe { .. })
        ));
        let _ = process.wait();
    }

    #[test]
    fn interrupt_after_exit_sends_nothing() {
        let process = sh("exit 0");
        process.start().unwrap();
        assert_eq!(process.wait(), Ok(()));
        assert_eq!(process.interrupt(), Ok(()));
        assert_eq!(process.process_state().unwrap().code(), Some(0));
    }

    #[test]
    fn interrupt_terminates_sleeping_process() {
        let process = RealProcess::new("sleep", &["30".to_string()]);
        process.start().unwrap();
        assert!(process.process_state().is_none());
        std::thread::sleep(Duration::from_millis(50));
        process.interrupt().unwrap();

        assert!(process.wait().is_err());
        let state = process.process_state().unwrap();
        assert!(!state.exited());
    }
}
