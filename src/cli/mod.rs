//! CLI argument parsing and processing

pub mod args;
pub mod process;

// Re-exports
pub use args::{Args, Command, LogFormat, RuleCommand, StartArgs, TargetArgs};
pub use process::{process_rule_args, process_start_args};
