use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::info;

use crate::core::config::JobConfig;
use crate::core::job::{Chunk, Job};
use crate::core::order::sort_by_stage;
use crate::core::process::Executor;
use crate::core::stage::DownloadStage;

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub config: JobConfig,
    pub follow: bool,
    pub stop_after: Option<Duration>,
    pub poll_interval: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            config: JobConfig::default(),
            follow: false,
            stop_after: None,
            poll_interval: Duration::from_millis(200),
        }
    }
}

pub struct BatchReport {
    /// Most advanced first.
    pub jobs: Vec<Job>,
}

impl BatchReport {
    /// Jobs that failed or never started.
    pub fn unfinished(&self) -> usize {
        self.jobs
            .iter()
            .filter(|job| matches!(job.stage(), DownloadStage::Error | DownloadStage::NotStarted))
            .count()
    }
}

/// One URL per line. Blank lines and lines starting with `#` are skipped.
pub fn parse_url_file(path: &Path) -> Result<Vec<String>, io::Error> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut urls = Vec::new();

    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();

        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        urls.push(trimmed.to_string());
    }

    Ok(urls)
}

/// Starts one job per URL, follows them until all have settled (or until
/// `stop_after`), then stops whatever is still running.
pub fn run(
    urls: &[String],
    executor: Arc<dyn Executor>,
    options: &BatchOptions,
    out: &mut impl Write,
) -> BatchReport {
    let mut jobs: Vec<Job> = urls
        .iter()
        .map(|url| Job::with_config(url, Arc::clone(&executor), options.config.clone()))
        .collect();

    for job in &mut jobs {
        // A failed start is logged by the job and shows up as NotStarted.
        if job.start().is_ok() && options.follow {
            job.set_logging(true);
        }
    }

    let begun = Instant::now();
    let mut seen: Vec<DownloadStage> = jobs.iter().map(Job::stage).collect();

    loop {
        if options.follow {
            for job in &jobs {
                forward_output(job, out);
            }
        }

        for (job, last) in jobs.iter().zip(seen.iter_mut()) {
            let stage = job.stage();
            if stage != *last {
                info!(url = %job.url(), from = %last, to = %stage, "stage changed");
                *last = stage;
            }
        }

        if jobs.iter().all(|job| is_settled(job.stage())) {
            break;
        }

        if options
            .stop_after
            .is_some_and(|limit| begun.elapsed() >= limit)
        {
            info!("stop deadline reached");
            break;
        }

        thread::sleep(options.poll_interval);
    }

    for job in &jobs {
        job.set_logging(false);
    }
    stop_all(&mut jobs);

    if options.follow {
        for job in &jobs {
            forward_output(job, out);
        }
    }

    sort_by_stage(&mut jobs);
    BatchReport { jobs }
}

fn is_settled(stage: DownloadStage) -> bool {
    stage == DownloadStage::NotStarted || stage.is_terminal()
}

/// Stops every job in parallel; returns once all of them have returned.
pub fn stop_all(jobs: &mut [Job]) {
    thread::scope(|scope| {
        for job in jobs.iter_mut() {
            scope.spawn(move || job.stop());
        }
    });
}

fn forward_output(job: &Job, out: &mut impl Write) {
    for receiver in [job.stdout(), job.stderr()].into_iter().flatten() {
        write_pending(receiver, out);
    }
    let _ = out.flush();
}

fn write_pending(receiver: &Receiver<Chunk>, out: &mut impl Write) {
    while let Ok(chunk) = receiver.try_recv() {
        if out.write_all(&chunk).is_err() {
            return;
        }
    }
}
