use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Failed to open process: {0}")]
    ProcessOpenFailed(String),

    #[error("Insufficient privilege: {0}")]
    InsufficientPrivilege(String),

    #[error("Failed to read process memory at address {address:#x}: {message}")]
    MemoryReadFailed { address: u64, message: String },

    #[error("Failed to write process memory at address {address:#x}: {message}")]
    MemoryWriteFailed { address: u64, message: String },

    #[error("Failed to query memory region at address {address:#x}: {message}")]
    RegionQueryFailed { address: u64, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Tracking device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Failed to spawn worker: {0}")]
    WorkerSpawnFailed(String),

    #[error("Worker {pid} did not exit within the shutdown timeout")]
    WorkerUnresponsive { pid: u32 },

    #[error("{0} is only supported on Windows")]
    Unsupported(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error is a "file not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }

    /// Errors that mean the target went away rather than a transient fault.
    pub fn is_process_gone(&self) -> bool {
        matches!(self, Error::ProcessNotFound(_))
    }
}
