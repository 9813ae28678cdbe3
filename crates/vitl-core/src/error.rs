use thiserror::Error;

use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum VitlError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: usize, available: usize },
}

impl VitlError {
    pub(crate) fn oom(requested: usize, available: usize) -> Self {
        VitlError::OutOfMemory {
            requested,
            available,
        }
    }

    /// True for allocation failures; callers may retry after freeing memory.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, VitlError::OutOfMemory { .. })
    }
}

pub type Result<T> = std::result::Result<T, VitlError>;
