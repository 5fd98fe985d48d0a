pub mod command;
pub mod config;
pub mod error;
pub mod fake;
pub mod job;
pub mod order;
pub mod process;
pub mod stage;

pub use config::{JobConfig, StopPolicy};
pub use error::DownloadError;
pub use job::Job;
pub use stage::DownloadStage;
