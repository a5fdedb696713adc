// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NvrError {
    #[error("{what} not found")]
    NotFound { what: String },

    #[error("{what} already exists")]
    AlreadyExists { what: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("canceled: {0}")]
    Canceled(String),

    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl NvrError {
    /// Shorthand for the common "segment <id> not found" case.
    pub fn segment_not_found(id: &str) -> Self {
        NvrError::NotFound { what: format!("segment '{id}'") }
    }

    /// Shorthand for the common "camera <id> not found" case.
    pub fn camera_not_found(id: &str) -> Self {
        NvrError::NotFound { what: format!("camera '{id}'") }
    }
}

pub type Result<T> = std::result::Result<T, NvrError>;
