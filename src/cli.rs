use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use crate::batch::{self, BatchOptions};
use crate::core::config::{JobConfig, StopPolicy, DEFAULT_FIXUP, DEFAULT_FORMAT, DEFAULT_PROGRAM};
use crate::core::process::RealExecutor;
use crate::formatter::format_report;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("invalid command: {message}")]
    InvalidCommand { message: String },
    #[error("cannot read batch file '{}': {source}", path.display())]
    BatchFile { path: PathBuf, source: io::Error },
    #[error("no URLs given")]
    NoUrls,
    #[error("{count} of {total} downloads did not complete")]
    JobsFailed { count: usize, total: usize },
}

#[derive(Debug, Parser)]
#[command(name = "ytflow", version, about = "Run and supervise yt-dlp downloads")]
pub struct Cli {
    /// URLs to download
    #[arg(value_name = "URL")]
    pub urls: Vec<String>,
    /// File with one URL per line ('#' starts a comment)
    #[arg(short = 'a', long = "batch-file", value_name = "FILE")]
    pub batch_file: Option<PathBuf>,
    #[arg(long = "binary", env = "YTFLOW_BIN", default_value = DEFAULT_PROGRAM)]
    pub binary: String,
    #[arg(short = 'f', long = "format", default_value = DEFAULT_FORMAT)]
    pub format: String,
    #[arg(long = "fixup", default_value = DEFAULT_FIXUP)]
    pub fixup: String,
    /// Do not pass -4 to the downloader
    #[arg(long = "no-force-ipv4")]
    pub no_force_ipv4: bool,
    /// Extra downloader arguments, split like a shell would
    #[arg(long = "extra-args", value_name = "ARGS", allow_hyphen_values = true)]
    pub extra_args: Option<String>,
    /// Print downloader output as it arrives
    #[arg(long = "follow")]
    pub follow: bool,
    /// Stop all downloads after this many seconds
    #[arg(long = "stop-after", value_name = "SECS")]
    pub stop_after: Option<u64>,
    /// Longest single wait while stopping a download
    #[arg(long = "stop-timeout", value_name = "SECS", default_value_t = 30)]
    pub stop_timeout: u64,
    #[arg(long = "log-file", value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    pub fn job_config(&self) -> Result<JobConfig, CliError> {
        let extra_args = match &self.extra_args {
            Some(raw) => shell_words::split(raw).map_err(|err| CliError::InvalidCommand {
                message: err.to_string(),
            })?,
            None => Vec::new(),
        };

        Ok(JobConfig {
            program: self.binary.clone(),
            format: self.format.clone(),
            fixup: self.fixup.clone(),
            force_ipv4: !self.no_force_ipv4,
            extra_args,
            stop: StopPolicy {
                max_delay: Duration::from_secs(self.stop_timeout),
                ..StopPolicy::default()
            },
            ..JobConfig::default()
        })
    }

    pub fn batch_options(&self) -> Result<BatchOptions, CliError> {
        Ok(BatchOptions {
            config: self.job_config()?,
            follow: self.follow,
            stop_after: self.stop_after.map(Duration::from_secs),
            ..BatchOptions::default()
        })
    }

    /// Command-line URLs followed by those from the batch file.
    pub fn collect_urls(&self) -> Result<Vec<String>, CliError> {
        let mut urls = self.urls.clone();
        if let Some(path) = &self.batch_file {
            let from_file = batch::parse_url_file(path).map_err(|source| CliError::BatchFile {
                path: path.clone(),
                source,
            })?;
            urls.extend(from_file);
        }
        if urls.is_empty() {
            return Err(CliError::NoUrls);
        }
        Ok(urls)
    }
}

pub fn execute(cli: Cli) -> Result<(), CliError> {
    let urls = cli.collect_urls()?;
    let options = cli.batch_options()?;

    let mut stdout = io::stdout();
    let report = batch::run(&urls, Arc::new(RealExecutor), &options, &mut stdout);

    for line in format_report(&report.jobs) {
        println!("{line}");
    }

    let count = report.unfinished();
    if count > 0 {
        return Err(CliError::JobsFailed {
            count,
            total: report.jobs.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["ytflow"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_match_the_stock_command_line() {
        let cli = parse(&["https://example.com/video"]);
        let config = cli.job_config().unwrap();
        assert_eq!(config.format, "best[height<=1080]");
        assert_eq!(config.fixup, "warn");
        assert!(config.force_ipv4);
        assert!(config.extra_args.is_empty());
        assert_eq!(config.stop.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn extra_args_are_shell_split() {
        let cli = parse(&[
            "--extra-args",
            "-o '%(title)s.%(ext)s' --no-part",
            "--no-force-ipv4",
            "https://example.com/video",
        ]);
        let config = cli.job_config().unwrap();
        assert_eq!(config.extra_args, ["-o", "%(title)s.%(ext)s", "--no-part"]);
        assert!(!config.force_ipv4);
    }

    #[test]
    fn unbalanced_quotes_are_rejected() {
        let cli = parse(&["--extra-args", "-o 'broken", "https://example.com/video"]);
        assert!(matches!(
            cli.job_config(),
            Err(CliError::InvalidCommand { .. })
        ));
    }

    #[test]
    fn no_urls_is_an_error() {
        let cli = parse(&["--follow"]);
        assert!(matches!(cli.collect_urls(), Err(CliError::NoUrls)));
    }

    #[test]
    fn stop_after_becomes_a_duration() {
        let cli = parse(&["--stop-after", "5", "https://example.com/video"]);
        let options = cli.batch_options().unwrap();
        assert_eq!(options.stop_after, Some(Duration::from_secs(5)));
        assert!(!options.follow);
    }
}
