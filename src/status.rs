//! Exit status codes for the CLI
//!
//! podtunnel follows standard Unix exit code conventions:
//! - 0: Success (including a forward stopped with Ctrl+C after it was ready)
//! - 1: Any error (pod not found, ambiguous selector, relay failure, etc.)
//! - 130: User interrupted before the forward became ready

use std::process::{ExitCode, Termination};

/// Exit status codes following standard Unix conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitStatus {
    /// Successful execution
    Success = 0,
    /// Any error
    Error = 1,
    /// User interrupted (Ctrl+C) - standard SIGINT code
    Interrupted = 130,
}

impl Termination for ExitStatus {
    fn report(self) -> ExitCode {
        ExitCode::from(self as u8)
    }
}
