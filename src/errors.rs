//! Error types for podtunnel

use thiserror::Error;

use crate::k8s::resolver::ResolveError;
use crate::k8s::SessionState;

/// Main error type for podtunnel
#[derive(Error, Debug)]
pub enum PodtunnelError {
    #[error("could not find a port to bind to: {0}")]
    PortAllocation(#[source] std::io::Error),

    #[error("could not get pod name: {0}")]
    PodName(#[from] ResolveError),

    #[error("could not create round tripper: {0}")]
    TransportBuild(String),

    #[error("could not create a dialer: {0}")]
    Dialer(String),

    #[error("could not create port forward: {0}")]
    RelayStart(String),

    #[error("port forward not ready after {0:.1} seconds")]
    Timeout(f64),

    #[error("port forward start was cancelled")]
    Cancelled,

    #[error("cannot start a session in state {0}")]
    InvalidState(SessionState),

    #[error("could not load kubernetes configuration: {0}")]
    Kubeconfig(String),

    #[error("could not create kubernetes client: {0}")]
    Client(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("Prompt error: {0}")]
    Prompt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<dialoguer::Error> for PodtunnelError {
    fn from(err: dialoguer::Error) -> Self {
        PodtunnelError::Prompt(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PodtunnelError>;
