use serde::Serialize;
use std::fmt;

pub const ERR_TOOL_UNAVAILABLE: &str = "ERR_TOOL_UNAVAILABLE";
pub const ERR_NO_DEVICE: &str = "ERR_NO_DEVICE";
pub const ERR_FILE_NOT_FOUND: &str = "ERR_FILE_NOT_FOUND";
pub const ERR_INSTALL_FAILED: &str = "ERR_INSTALL_FAILED";
pub const ERR_VALIDATION: &str = "ERR_VALIDATION";
pub const ERR_DEPENDENCY: &str = "ERR_DEPENDENCY";
pub const ERR_SYSTEM: &str = "ERR_SYSTEM";
pub const ERR_INTERRUPTED: &str = "ERR_INTERRUPTED";

#[derive(Debug, Clone, Serialize)]
pub struct AppError {
    pub error: String,
    pub code: String,
    pub trace_id: String,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code: code.into(),
            trace_id: trace_id.into(),
        }
    }

    pub fn tool_unavailable(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_TOOL_UNAVAILABLE, message, trace_id)
    }

    pub fn no_device(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_NO_DEVICE, message, trace_id)
    }

    pub fn file_not_found(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_FILE_NOT_FOUND, message, trace_id)
    }

    pub fn install_failed(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_INSTALL_FAILED, message, trace_id)
    }

    pub fn validation(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_VALIDATION, message, trace_id)
    }

    pub fn dependency(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_DEPENDENCY, message, trace_id)
    }

    pub fn system(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_SYSTEM, message, trace_id)
    }

    pub fn interrupted(message: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self::new(ERR_INTERRUPTED, message, trace_id)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error, self.code)
    }
}

impl std::error::Error for AppError {}
