//! Lifecycle of one yt-dlp download.
//!
//! `start` spawns the process and three threads: a wait watcher plus one drain
//! per output stream. The drains read while the stage is `Downloading` and, if
//! logging is enabled, hand chunks to single-slot channels. The watcher flips
//! the stage to `Processing` once the process exits, joins both drains, drops
//! their senders (closing the channels) and records the terminal stage.
//!
//! `stop` interrupts the process and then polls with exponential backoff until
//! a terminal stage is reached, forcing `Completed` once the delay passes the
//! configured ceiling.

use std::io::Read;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::core::command::YtDlpCommand;
use crate::core::config::JobConfig;
use crate::core::error::DownloadError;
use crate::core::process::{Executor, OutputPipe, ProcessHandle, RealExecutor, StreamKind};
use crate::core::stage::{AtomicStage, DownloadStage};

pub type Chunk = Vec<u8>;

/// State shared between a job and its background threads.
struct JobShared {
    url: String,
    stage: AtomicStage,
    logging: AtomicBool,
    started_at: OnceLock<Instant>,
    stopped_at: OnceLock<Instant>,
    /// Outcome of `wait`, recorded before the drains are joined.
    verdict: OnceLock<DownloadStage>,
}

impl JobShared {
    fn stage(&self) -> DownloadStage {
        self.stage.load()
    }

    fn logging_enabled(&self) -> bool {
        self.logging.load(Ordering::Relaxed)
    }

    fn finish(&self, stage: DownloadStage) -> bool {
        if !self.stage.finish(stage) {
            return false;
        }
        let _ = self.stopped_at.set(Instant::now());
        info!(url = %self.url, %stage, "download finished");
        true
    }
}

pub struct Job {
    url: String,
    config: JobConfig,
    executor: Arc<dyn Executor>,
    shared: Arc<JobShared>,
    process: Option<Arc<dyn ProcessHandle>>,
    stdout: Option<Receiver<Chunk>>,
    stderr: Option<Receiver<Chunk>>,
}

impl Job {
    pub fn new(url: &str) -> Self {
        Self::with_executor(url, Arc::new(RealExecutor))
    }

    pub fn with_executor(url: &str, executor: Arc<dyn Executor>) -> Self {
        Self::with_config(url, executor, JobConfig::default())
    }

    pub fn with_config(url: &str, executor: Arc<dyn Executor>, config: JobConfig) -> Self {
        Self {
            url: url.to_string(),
            config,
            executor,
            shared: Arc::new(JobShared {
                url: url.to_string(),
                stage: AtomicStage::new(DownloadStage::NotStarted),
                logging: AtomicBool::new(false),
                started_at: OnceLock::new(),
                stopped_at: OnceLock::new(),
                verdict: OnceLock::new(),
            }),
            process: None,
            stdout: None,
            stderr: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    /// Current stage. Safe to poll at any rate; the value may trail the
    /// background threads by one update.
    pub fn stage(&self) -> DownloadStage {
        self.shared.stage()
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.shared.started_at.get().copied()
    }

    pub fn stopped_at(&self) -> Option<Instant> {
        self.shared.stopped_at.get().copied()
    }

    /// Time spent running: up to `stopped_at`, or up to now while running.
    pub fn elapsed(&self) -> Option<Duration> {
        let started = self.started_at()?;
        let end = self.stopped_at().unwrap_or_else(Instant::now);
        Some(end.saturating_duration_since(started))
    }

    pub fn logging_enabled(&self) -> bool {
        self.shared.logging_enabled()
    }

    /// While disabled, drained output is discarded instead of queued.
    pub fn set_logging(&self, enabled: bool) {
        self.shared.logging.store(enabled, Ordering::Relaxed);
    }

    /// Captured stdout chunks; `None` until the job has started. The channel
    /// disconnects once both drains have finished.
    pub fn stdout(&self) -> Option<&Receiver<Chunk>> {
        self.stdout.as_ref()
    }

    pub fn stderr(&self) -> Option<&Receiver<Chunk>> {
        self.stderr.as_ref()
    }

    pub fn start(&mut self) -> Result<(), DownloadError> {
        if self.process.is_some() {
            return Err(DownloadError::AlreadyStarted);
        }

        let args = YtDlpCommand::new(&self.url, &self.config).to_args();
        let process = self.executor.create_command(&self.config.program, &args);

        let stdout_pipe = process.stdout_pipe().inspect_err(|err| {
            warn!(url = %self.url, error = %err, "failed to acquire stdout pipe");
        })?;
        let stderr_pipe = process.stderr_pipe().inspect_err(|err| {
            warn!(url = %self.url, error = %err, "failed to acquire stderr pipe");
        })?;

        let (stdout_tx, stdout_rx) = mpsc::sync_channel::<Chunk>(1);
        let (stderr_tx, stderr_rx) = mpsc::sync_channel::<Chunk>(1);

        if let Err(err) = process.start() {
            warn!(
                url = %self.url,
                program = %self.config.program,
                error = %err,
                "failed to start download"
            );
            return Err(err);
        }

        let _ = self.shared.started_at.set(Instant::now());
        self.shared.stage.advance(DownloadStage::Downloading);
        self.set_logging(false);
        info!(url = %self.url, program = %self.config.program, ?args, "download started");

        let stdout_drain = self.spawn_drain(StreamKind::Stdout, stdout_pipe, stdout_tx);
        let stderr_drain = self.spawn_drain(StreamKind::Stderr, stderr_pipe, stderr_tx);
        spawn_watcher(
            Arc::clone(&self.shared),
            Arc::clone(&process),
            stdout_drain,
            stderr_drain,
        );

        self.process = Some(process);
        self.stdout = Some(stdout_rx);
        self.stderr = Some(stderr_rx);
        Ok(())
    }

    /// Interrupts the download and waits, with bounded patience, for it to
    /// settle. Never fails; problems are logged.
    pub fn stop(&self) {
        let Some(process) = &self.process else {
            return;
        };
        if process.process().is_none() {
            return;
        }
        if self.stage().is_terminal() {
            return;
        }

        if process.process_state().is_some_and(|state| state.exited()) {
            // Exit code decides; the watcher records it if it has not yet.
            if let Some(&verdict) = self.shared.verdict.get() {
                self.shared.finish(verdict);
            }
            return;
        }

        match process.interrupt() {
            Ok(()) => debug!(url = %self.url, "interrupt delivered"),
            Err(err) => warn!(url = %self.url, error = %err, "failed to interrupt download"),
        }

        let policy = self.config.stop;
        let mut delay = policy.initial_delay.max(Duration::from_millis(1));
        while !self.stage().is_terminal() {
            if process.process_state().is_some_and(|state| state.exited()) {
                debug!(url = %self.url, "process exited after interrupt");
                return;
            }
            if delay > policy.max_delay {
                warn!(
                    url = %self.url,
                    max_delay_ms = policy.max_delay.as_millis() as u64,
                    "process did not exit after interrupt, forcing completion"
                );
                let verdict = self.shared.verdict.get().copied();
                self.shared.finish(verdict.unwrap_or(DownloadStage::Completed));
                return;
            }
            thread::sleep(delay);
            delay = delay.saturating_mul(2);
        }
    }

    fn spawn_drain(
        &self,
        stream: StreamKind,
        mut pipe: OutputPipe,
        sender: SyncSender<Chunk>,
    ) -> JoinHandle<SyncSender<Chunk>> {
        let shared = Arc::clone(&self.shared);
        let chunk_size = self.config.chunk_size.max(1);
        let idle = self.config.drain_idle;

        thread::spawn(move || {
            let mut buffer = vec![0u8; chunk_size];
            let mut connected = true;

            while shared.stage() == DownloadStage::Downloading {
                let read = match pipe.read(&mut buffer) {
                    Ok(0) | Err(_) => {
                        thread::sleep(idle);
                        continue;
                    }
                    Ok(n) => n,
                };

                if connected && shared.logging_enabled() {
                    connected = offer(&sender, buffer[..read].to_vec(), &shared, idle);
                }
            }

            debug!(url = %shared.url, %stream, "drain finished");
            sender
        })
    }
}

/// Hands `chunk` to the consumer, waiting while the slot is full. Gives up
/// on the chunk if the consumer turns logging off, and returns `false` once
/// the receiving side is gone.
fn offer(
    sender: &SyncSender<Chunk>,
    mut chunk: Chunk,
    shared: &JobShared,
    idle: Duration,
) -> bool {
    loop {
        match sender.try_send(chunk) {
            Ok(()) => return true,
            Err(TrySendError::Full(rejected)) => {
                if !shared.logging_enabled() {
                    return true;
                }
                chunk = rejected;
                thread::sleep(idle.max(Duration::from_millis(1)));
            }
            Err(TrySendError::Disconnected(_)) => return false,
        }
    }
}

fn spawn_watcher(
    shared: Arc<JobShared>,
    process: Arc<dyn ProcessHandle>,
    stdout_drain: JoinHandle<SyncSender<Chunk>>,
    stderr_drain: JoinHandle<SyncSender<Chunk>>,
) {
    thread::spawn(move || {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| process.wait()));

        let verdict = match outcome {
            Ok(Ok(())) => match process.process_state() {
                Some(state) if state.exited() => DownloadStage::Completed,
                _ => {
                    warn!(url = %shared.url, "wait returned but exit was not confirmed");
                    DownloadStage::Error
                }
            },
            Ok(Err(err)) => {
                warn!(url = %shared.url, error = %err, "download failed");
                DownloadStage::Error
            }
            Err(_) => {
                error!(url = %shared.url, "wait watcher panicked");
                DownloadStage::Error
            }
        };
        let _ = shared.verdict.set(verdict);

        // Ends the drain loops; they must be joined before the channels close.
        shared.stage.advance(DownloadStage::Processing);

        let stdout_tx = join_drain(&shared, StreamKind::Stdout, stdout_drain);
        let stderr_tx = join_drain(&shared, StreamKind::Stderr, stderr_drain);
        drop(stdout_tx);
        drop(stderr_tx);

        let _ = shared.stopped_at.set(Instant::now());
        shared.finish(verdict);
    });
}

fn join_drain(
    shared: &JobShared,
    stream: StreamKind,
    drain: JoinHandle<SyncSender<Chunk>>,
) -> Option<SyncSender<Chunk>> {
    match drain.join() {
        Ok(sender) => Some(sender),
        Err(_) => {
            error!(url = %shared.url, %stream, "drain panicked");
            None
        }
    }
}
