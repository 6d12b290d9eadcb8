//! podtunnel library interface
//!
//! Forwards a local TCP port to exactly one running Kubernetes pod, chosen by
//! name or by label selector.
//!
//! # Module Organization
//!
//! - [`k8s`] - Pod resolution, dialers, relay and the port-forward session
//! - [`errors`] - Error types (PodtunnelError, Result)
//! - [`config`] - Config file with defaults and saved port rules
//! - [`cli`] - Argument definitions and processing
//! - [`core`] - Command dispatch
//! - [`signals`] - Interrupt handling (was_interrupted, shutdown_token)
//! - [`status`] - Exit status codes (ExitStatus)

pub mod cli;
pub mod config;
pub mod core;
pub mod errors;
pub mod k8s;
pub mod logging;
pub mod prompt;
pub mod signals;
pub mod status;
