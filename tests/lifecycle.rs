use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ytflow::core::fake::{FakeBehavior, FakeExecutor, FakeProcess};
use ytflow::core::order::sort_by_stage;
use ytflow::core::process::RealExecutor;
use ytflow::core::{DownloadStage, Job};

const URL: &str = "https://example.com/video";

fn fake_job(behavior: FakeBehavior) -> (Job, Arc<FakeExecutor>) {
    let executor = Arc::new(FakeExecutor::with_behavior(behavior));
    (Job::with_executor(URL, executor.clone()), executor)
}

fn last_command(executor: &FakeExecutor) -> Arc<FakeProcess> {
    executor.last_command().expect("no command was created")
}

fn wait_for_stage(job: &Job, stage: DownloadStage) -> DownloadStage {
    let deadline = Instant::now() + Duration::from_secs(2);
    while job.stage() != stage && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    job.stage()
}

#[test]
fn successful_start() {
    let (mut job, executor) = fake_job(FakeBehavior::default());
    assert_eq!(job.url(), URL);
    assert_eq!(job.stage(), DownloadStage::NotStarted);

    job.start().unwrap();

    let command = last_command(&executor);
    assert_eq!(command.name(), "yt-dlp");
    assert!(command.args().iter().any(|arg| arg == URL));
    assert!(command.is_started());
    assert_eq!(job.stage(), DownloadStage::Downloading);
    assert!(job.started_at().is_some());
    assert!(job.stopped_at().is_none());
}

#[test]
fn default_job_uses_real_executor_lazily() {
    // Construction never spawns anything.
    let job = Job::new(URL);
    assert_eq!(job.stage(), DownloadStage::NotStarted);
    assert_eq!(job.config().program, "yt-dlp");
    job.stop();

    let explicit = Job::with_executor(URL, Arc::new(RealExecutor));
    assert!(explicit.stdout().is_none());
}

#[test]
fn start_error_keeps_job_not_started() {
    let (mut job, _) = fake_job(FakeBehavior::default().start_error("command not found"));

    assert!(job.start().is_err());
    assert_eq!(job.stage(), DownloadStage::NotStarted);
    assert!(job.stdout().is_none());
    assert!(job.stderr().is_none());

    thread::sleep(Duration::from_millis(50));
    assert_eq!(job.stage(), DownloadStage::NotStarted);
}

#[test]
fn wait_error_ends_in_error() {
    let (mut job, _) = fake_job(
        FakeBehavior::default()
            .wait_error("process failed")
            .wait_duration(Duration::from_millis(50)),
    );
    job.start().unwrap();

    assert_eq!(wait_for_stage(&job, DownloadStage::Error), DownloadStage::Error);
    assert!(job.stopped_at().is_some());
}

#[test]
fn clean_exit_ends_in_completed() {
    let (mut job, _) = fake_job(FakeBehavior::default().wait_duration(Duration::from_millis(50)));
    job.start().unwrap();

    thread::sleep(Duration::from_millis(100));
    assert_eq!(
        wait_for_stage(&job, DownloadStage::Completed),
        DownloadStage::Completed
    );
    assert!(job.stopped_at().is_some());
}

#[test]
fn processing_is_visited_before_the_terminal_stage() {
    let (mut job, _) = fake_job(FakeBehavior::default().wait_duration(Duration::from_millis(40)));
    job.start().unwrap();

    let mut observed = vec![job.stage()];
    let deadline = Instant::now() + Duration::from_secs(2);
    while !job.stage().is_terminal() && Instant::now() < deadline {
        let stage = job.stage();
        if observed.last() != Some(&stage) {
            observed.push(stage);
        }
        thread::sleep(Duration::from_millis(1));
    }
    observed.push(job.stage());

    assert!(observed.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(observed.first(), Some(&DownloadStage::Downloading));
    assert_eq!(observed.last(), Some(&DownloadStage::Completed));
}

#[test]
fn full_cycle_with_stop_after_completion() {
    let (mut job, executor) = fake_job(FakeBehavior::default());
    let mut stages = vec![job.stage()];

    job.start().unwrap();
    stages.push(job.stage());

    thread::sleep(Duration::from_millis(500));
    wait_for_stage(&job, DownloadStage::Completed);

    job.stop();
    stages.push(job.stage());

    assert_eq!(
        stages,
        [
            DownloadStage::NotStarted,
            DownloadStage::Downloading,
            DownloadStage::Completed,
        ]
    );
    assert_eq!(last_command(&executor).interrupt_count(), 0);
}

#[test]
fn argument_construction() {
    let executor = Arc::new(FakeExecutor::new());
    let mut job = Job::with_executor("https://example.com/test-video", executor.clone());
    job.start().unwrap();

    let command = last_command(&executor);
    assert_eq!(
        command.args(),
        [
            "-f",
            "best[height<=1080]",
            "--fixup",
            "warn",
            "-4",
            "https://example.com/test-video",
        ]
    );
}

#[test]
fn sorting_puts_most_advanced_first() {
    let mut jobs: Vec<Job> = [
        FakeBehavior::default().start_error("missing"),
        FakeBehavior::default().wait_duration(Duration::from_millis(10)),
        FakeBehavior::default().wait_duration(Duration::from_secs(30)),
    ]
    .into_iter()
    .enumerate()
    .map(|(idx, behavior)| {
        let executor = Arc::new(FakeExecutor::with_behavior(behavior));
        let mut job = Job::with_executor(&format!("https://example.com/{idx}"), executor);
        let _ = job.start();
        job
    })
    .collect();

    wait_for_stage(&jobs[1], DownloadStage::Completed);
    sort_by_stage(&mut jobs);

    let stages: Vec<DownloadStage> = jobs.iter().map(Job::stage).collect();
    assert_eq!(
        stages,
        [
            DownloadStage::Completed,
            DownloadStage::Downloading,
            DownloadStage::NotStarted,
        ]
    );
}
