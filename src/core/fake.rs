//! Deterministic executor that never touches the operating system.
//!
//! Start failures, wait failures, run time and captured output are all
//! injected through `FakeBehavior`. The simulated run can be cut short by
//! `interrupt`, which lets stop-protocol tests finish quickly.

use std::io::{self, Cursor, Read};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};

use crate::core::error::DownloadError;
use crate::core::process::{ExitState, Executor, OutputPipe, ProcessHandle, ProcessId};

pub const FAKE_PID: u32 = 4242;

#[derive(Debug, Clone)]
pub struct FakeBehavior {
    pub start_error: Option<DownloadError>,
    pub wait_error: Option<DownloadError>,
    pub interrupt_error: Option<DownloadError>,
    pub wait_duration: Duration,
    pub stdout_data: Vec<u8>,
    pub stderr_data: Vec<u8>,
    /// Pause before the first byte of captured output becomes readable.
    pub output_delay: Duration,
    /// Exit state reported once `wait` returns.
    pub exit_confirmed: bool,
    /// Whether an interrupt ends the simulated run early.
    pub honors_interrupt: bool,
}

impl Default for FakeBehavior {
    fn default() -> Self {
        Self {
            start_error: None,
            wait_error: None,
            interrupt_error: None,
            wait_duration: Duration::from_millis(500),
            stdout_data: Vec::new(),
            stderr_data: Vec::new(),
            output_delay: Duration::ZERO,
            exit_confirmed: true,
            honors_interrupt: true,
        }
    }
}

impl FakeBehavior {
    pub fn start_error(mut self, message: &str) -> Self {
        self.start_error = Some(DownloadError::Spawn {
            program: "fake".to_string(),
            message: message.to_string(),
        });
        self
    }

    pub fn wait_error(mut self, message: &str) -> Self {
        self.wait_error = Some(DownloadError::Wait {
            message: message.to_string(),
        });
        self
    }

    pub fn interrupt_error(mut self, message: &str) -> Self {
        self.interrupt_error = Some(DownloadError::Signal {
            message: message.to_string(),
        });
        self
    }

    pub fn wait_duration(mut self, duration: Duration) -> Self {
        self.wait_duration = duration;
        self
    }

    pub fn stdout(mut self, data: &str) -> Self {
        self.stdout_data = data.as_bytes().to_vec();
        self
    }

    pub fn stderr(mut self, data: &str) -> Self {
        self.stderr_data = data.as_bytes().to_vec();
        self
    }

    pub fn output_delay(mut self, delay: Duration) -> Self {
        self.output_delay = delay;
        self
    }

    pub fn exit_confirmed(mut self, confirmed: bool) -> Self {
        self.exit_confirmed = confirmed;
        self
    }

    pub fn ignore_interrupt(mut self) -> Self {
        self.honors_interrupt = false;
        self
    }
}

/// Behaves like a pipe that stays silent for a while before producing output.
struct DelayedReader {
    delay: Option<Duration>,
    inner: Cursor<Vec<u8>>,
}

impl Read for DelayedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(delay) = self.delay.take() {
            std::thread::sleep(delay);
        }
        self.inner.read(buf)
    }
}

#[derive(Debug, Default)]
struct FakeState {
    started: bool,
    waited: bool,
    interrupts: usize,
}

pub struct FakeProcess {
    name: String,
    args: Vec<String>,
    behavior: FakeBehavior,
    state: Mutex<FakeState>,
    wake: Condvar,
    stdout: OnceLock<OutputPipe>,
    stderr: OnceLock<OutputPipe>,
}

impl FakeProcess {
    pub fn new(name: &str, args: &[String], behavior: FakeBehavior) -> Self {
        Self {
            name: name.to_string(),
            args: args.to_vec(),
            behavior,
            state: Mutex::new(FakeState::default()),
            wake: Condvar::new(),
            stdout: OnceLock::new(),
            stderr: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn is_started(&self) -> bool {
        self.lock().started
    }

    pub fn is_waited(&self) -> bool {
        self.lock().waited
    }

    pub fn interrupt_count(&self) -> usize {
        self.lock().interrupts
    }

    fn captured(&self, data: &[u8]) -> OutputPipe {
        OutputPipe::connected(DelayedReader {
            delay: Some(self.behavior.output_delay),
            inner: Cursor::new(data.to_vec()),
        })
    }

    // A panic while holding the lock only happens inside a failing test;
    // keep serving the state so the remaining assertions still report.
    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ProcessHandle for FakeProcess {
    fn start(&self) -> Result<(), DownloadError> {
        if let Some(err) = &self.behavior.start_error {
            return Err(err.clone());
        }
        self.lock().started = true;
        Ok(())
    }

    fn wait(&self) -> Result<(), DownloadError> {
        let mut state = self.lock();
        if !state.started {
            return Err(DownloadError::NotStarted);
        }

        let deadline = Instant::now() + self.behavior.wait_duration;
        loop {
            if self.behavior.honors_interrupt && state.interrupts > 0 {
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            state = self
                .wake
                .wait_timeout(state, remaining)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }

        state.waited = true;
        match &self.behavior.wait_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn stdout_pipe(&self) -> Result<OutputPipe, DownloadError> {
        Ok(self
            .stdout
            .get_or_init(|| self.captured(&self.behavior.stdout_data))
            .clone())
    }

    fn stderr_pipe(&self) -> Result<OutputPipe, DownloadError> {
        Ok(self
            .stderr
            .get_or_init(|| self.captured(&self.behavior.stderr_data))
            .clone())
    }

    fn process(&self) -> Option<ProcessId> {
        self.lock().started.then_some(ProcessId(FAKE_PID))
    }

    fn process_state(&self) -> Option<ExitState> {
        if !self.lock().waited {
            return None;
        }
        if !self.behavior.exit_confirmed {
            return Some(ExitState::new(false, None));
        }
        let code = if self.behavior.wait_error.is_some() { 1 } else { 0 };
        Some(ExitState::new(true, Some(code)))
    }

    fn interrupt(&self) -> Result<(), DownloadError> {
        if let Some(err) = &self.behavior.interrupt_error {
            return Err(err.clone());
        }
        let mut state = self.lock();
        if !state.started {
            return Err(DownloadError::NotStarted);
        }
        state.interrupts += 1;
        self.wake.notify_all();
        Ok(())
    }
}

/// Hands out `FakeProcess` handles and remembers every one it created.
#[derive(Default)]
pub struct FakeExecutor {
    behavior: Mutex<FakeBehavior>,
    created: Mutex<Vec<Arc<FakeProcess>>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(behavior: FakeBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            created: Mutex::new(Vec::new()),
        }
    }

    /// Behavior for handles created from now on.
    pub fn set_behavior(&self, behavior: FakeBehavior) {
        if let Ok(mut current) = self.behavior.lock() {
            *current = behavior;
        }
    }

    pub fn last_command(&self) -> Option<Arc<FakeProcess>> {
        self.created.lock().ok()?.last().cloned()
    }

    pub fn commands(&self) -> Vec<Arc<FakeProcess>> {
        self.created
            .lock()
            .map(|created| created.clone())
            .unwrap_or_default()
    }
}

impl Executor for FakeExecutor {
    fn create_command(&self, program: &str, args: &[String]) -> Arc<dyn ProcessHandle> {
        let behavior = self
            .behavior
            .lock()
            .map(|behavior| behavior.clone())
            .unwrap_or_default();
        let process = Arc::new(FakeProcess::new(program, args, behavior));
        if let Ok(mut created) = self.created.lock() {
            created.push(Arc::clone(&process));
        }
        process
    }
}
