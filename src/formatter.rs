use std::time::Duration;

use crate::core::job::Job;

const URL_WIDTH: usize = 60;

pub fn format_job_line(job: &Job) -> String {
    let elapsed = job
        .elapsed()
        .map(format_duration)
        .unwrap_or_else(|| "--:--:--".to_string());
    format!(
        "{:<12} {} {}",
        job.stage(),
        elapsed,
        truncate_url(job.url(), URL_WIDTH)
    )
}

pub fn format_report(jobs: &[Job]) -> Vec<String> {
    jobs.iter().map(format_job_line).collect()
}

pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

fn truncate_url(url: &str, width: usize) -> String {
    if url.chars().count() <= width {
        return url.to_string();
    }
    let keep: String = url.chars().take(width.saturating_sub(3)).collect();
    format!("{keep}...")
}
