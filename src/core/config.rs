use std::time::Duration;

pub const DEFAULT_PROGRAM: &str = "yt-dlp";
pub const DEFAULT_FORMAT: &str = "best[height<=1080]";
pub const DEFAULT_FIXUP: &str = "warn";

/// Patience of `Job::stop` while waiting for an interrupted process.
///
/// The delay starts at `initial_delay` and doubles after each poll; once it
/// would exceed `max_delay` the job is forced to `Completed`. Total wait is
/// therefore bounded by roughly `2 * max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobConfig {
    pub program: String,
    pub format: String,
    pub fixup: String,
    pub force_ipv4: bool,
    pub extra_args: Vec<String>,
    pub chunk_size: usize,
    pub drain_idle: Duration,
    pub stop: StopPolicy,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            format: DEFAULT_FORMAT.to_string(),
            fixup: DEFAULT_FIXUP.to_string(),
            force_ipv4: true,
            extra_args: Vec::new(),
            chunk_size: 1000,
            drain_idle: Duration::from_millis(10),
            stop: StopPolicy::default(),
        }
    }
}
