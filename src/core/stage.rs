use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Progress of a download job, ordered from least to most "done".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum DownloadStage {
    NotStarted = 0,
    Downloading = 1,
    Processing = 2,
    Completed = 3,
    Error = 4,
}

impl DownloadStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, DownloadStage::Completed | DownloadStage::Error)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => DownloadStage::NotStarted,
            1 => DownloadStage::Downloading,
            2 => DownloadStage::Processing,
            3 => DownloadStage::Completed,
            _ => DownloadStage::Error,
        }
    }
}

impl fmt::Display for DownloadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DownloadStage::NotStarted => "Not Started",
            DownloadStage::Downloading => "Downloading",
            DownloadStage::Processing => "Processing",
            DownloadStage::Completed => "Completed",
            DownloadStage::Error => "Error",
        };
        f.pad(label)
    }
}

/// Stage cell shared between a job and its background threads.
///
/// Every write is a single atomic store, so observers polling from another
/// thread never see a torn value. Reads are not linearizable with respect to
/// the writers: a drain loop may run one extra iteration after the stage has
/// moved on.
#[derive(Debug)]
pub struct AtomicStage(AtomicU8);

impl AtomicStage {
    pub fn new(stage: DownloadStage) -> Self {
        Self(AtomicU8::new(stage as u8))
    }

    pub fn load(&self) -> DownloadStage {
        DownloadStage::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves forward to `stage`; never moves backwards.
    pub fn advance(&self, stage: DownloadStage) {
        self.0.fetch_max(stage as u8, Ordering::AcqRel);
    }

    /// Records a terminal verdict unless one was already recorded.
    /// Returns `true` if this call set it.
    pub fn finish(&self, stage: DownloadStage) -> bool {
        debug_assert!(stage.is_terminal());
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if DownloadStage::from_u8(current).is_terminal() {
                    None
                } else {
                    Some(stage as u8)
                }
            })
            .is_ok()
    }
}
