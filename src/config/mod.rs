//! Configuration: defaults and saved port rules

#[allow(clippy::module_inception)]
pub mod config;

pub use config::{Config, Defaults, PortRule};
