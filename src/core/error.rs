use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownloadError {
    #[error("{program} binary not found in PATH")]
    BinaryNotFound { program: String },
    #[error("failed to spawn {program}: {message}")]
    Spawn { program: String, message: String },
    #[error("process exited abnormally (exit_code={exit_code:?})")]
    Exited { exit_code: Option<i32> },
    #[error("waiting on process failed: {message}")]
    Wait { message: String },
    #[error("failed to deliver interrupt: {message}")]
    Signal { message: String },
    #[error("output pipe unavailable: {message}")]
    Pipe { message: String },
    #[error("process has not been started")]
    NotStarted,
    #[error("job was already started")]
    AlreadyStarted,
}

impl DownloadError {
    pub fn spawn(program: &str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            DownloadError::BinaryNotFound {
                program: program.to_string(),
            }
        } else {
            DownloadError::Spawn {
                program: program.to_string(),
                message: err.to_string(),
            }
        }
    }
}
