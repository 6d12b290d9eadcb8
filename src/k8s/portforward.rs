//! Kubernetes port-forward session
//!
//! A [`PortForward`] owns one local-to-pod tunnel: it picks a listen port,
//! resolves the target pod, builds a dialer for it and hands both to a
//! [`Relay`] running on a background task. [`PortForward::start`] returns
//! once the relay is accepting connections or has failed to.

use std::fmt;
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{PodtunnelError, Result};
use super::credentials::Credentials;
use super::dialer::{DialerFactory, KubeDialerFactory, StreamDialer};
use super::parser::{validate_namespace, validate_pod_name};
use super::relay::{PortMapping, Relay, RelayError, TcpRelay};
use super::resolver::{resolve_running_pod, KubePodLister, PodLister};
use super::selector::LabelSelector;

/// Lifecycle of a forwarding session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Starting,
    Ready,
    Failed,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Created => "created",
            SessionState::Starting => "starting",
            SessionState::Ready => "ready",
            SessionState::Failed => "failed",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// What to forward
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardTarget {
    pub namespace: String,
    /// Known pod name; when `None` the pod is resolved from `labels`
    pub pod: Option<String>,
    pub labels: LabelSelector,
    /// Port inside the pod
    pub destination_port: u16,
    /// Local port, 0 to allocate one
    pub listen_port: u16,
    /// Upper bound on waiting for the relay to become ready
    pub ready_timeout: Option<Duration>,
}

impl ForwardTarget {
    /// Target the single running pod matching `labels`
    pub fn by_labels(namespace: impl Into<String>, labels: LabelSelector, destination_port: u16) -> Self {
        Self {
            namespace: namespace.into(),
            pod: None,
            labels,
            destination_port,
            listen_port: 0,
            ready_timeout: None,
        }
    }

    /// Target a pod by name
    pub fn by_name(namespace: impl Into<String>, pod: impl Into<String>, destination_port: u16) -> Self {
        Self {
            namespace: namespace.into(),
            pod: Some(pod.into()),
            labels: LabelSelector::default(),
            destination_port,
            listen_port: 0,
            ready_timeout: None,
        }
    }

    pub fn with_listen_port(mut self, port: u16) -> Self {
        self.listen_port = port;
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = Some(timeout);
        self
    }

    /// Check the target before any network activity
    pub fn validate(&self) -> Result<()> {
        validate_namespace(&self.namespace)?;
        if let Some(ref pod) = self.pod {
            validate_pod_name(pod)?;
        }
        if self.destination_port == 0 {
            return Err(PodtunnelError::Argument(
                "Destination port must be between 1 and 65535".to_string(),
            ));
        }
        Ok(())
    }
}

/// Cluster-facing collaborators of a session
#[derive(Clone)]
pub struct Backend {
    pub pods: Arc<dyn PodLister>,
    pub dialers: Arc<dyn DialerFactory>,
    pub relay: Arc<dyn Relay>,
}

impl Backend {
    /// Backend talking to the cluster described by `credentials`
    pub fn kube(credentials: &Credentials) -> Result<Self> {
        let client = credentials.client()?;
        Ok(Self {
            pods: Arc::new(KubePodLister::new(client)),
            dialers: Arc::new(KubeDialerFactory::new(credentials.clone())),
            relay: Arc::new(TcpRelay),
        })
    }
}

/// A single port-forward session
pub struct PortForward {
    target: ForwardTarget,
    backend: Backend,
    state: SessionState,
    stop_tx: Option<oneshot::Sender<()>>,
    relay_task: Option<JoinHandle<std::result::Result<(), RelayError>>>,
    dialer_url: Option<String>,
}

impl fmt::Debug for PortForward {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortForward")
            .field("target", &self.target)
            .field("state", &self.state)
            .field("dialer_url", &self.dialer_url)
            .finish()
    }
}

impl PortForward {
    /// Create a session against the cluster behind `credentials`
    pub fn new(target: ForwardTarget, credentials: &Credentials) -> Result<Self> {
        Self::with_backend(target, Backend::kube(credentials)?)
    }

    /// Create a session with explicit collaborators
    pub fn with_backend(target: ForwardTarget, backend: Backend) -> Result<Self> {
        target.validate()?;
        Ok(Self {
            target,
            backend,
            state: SessionState::Created,
            stop_tx: None,
            relay_task: None,
            dialer_url: None,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn target(&self) -> &ForwardTarget {
        &self.target
    }

    pub fn namespace(&self) -> &str {
        &self.target.namespace
    }

    /// Resolved pod name, once known
    pub fn pod_name(&self) -> Option<&str> {
        self.target.pod.as_deref()
    }

    /// Local port, 0 until allocated
    pub fn listen_port(&self) -> u16 {
        self.target.listen_port
    }

    pub fn destination_port(&self) -> u16 {
        self.target.destination_port
    }

    pub fn mapping(&self) -> PortMapping {
        PortMapping::new(self.target.listen_port, self.target.destination_port)
    }

    /// Endpoint of the dialer built by `start`
    pub fn dialer_url(&self) -> Option<&str> {
        self.dialer_url.as_deref()
    }

    /// Local address clients connect to
    pub fn local_addr(&self) -> String {
        format!("127.0.0.1:{}", self.target.listen_port)
    }

    /// Start forwarding and wait until the relay is ready
    ///
    /// `cancel` aborts pod resolution and the ready wait. A session starts at
    /// most once; on any error the relay task has finished before this
    /// returns and the session is `Failed`.
    pub async fn start(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.state != SessionState::Created {
            return Err(PodtunnelError::InvalidState(self.state));
        }
        self.state = SessionState::Starting;

        match self.start_inner(cancel).await {
            Ok(()) => {
                self.state = SessionState::Ready;
                info!(
                    namespace = %self.target.namespace,
                    pod = self.pod_name().unwrap_or_default(),
                    mapping = %self.mapping(),
                    "Port forward ready"
                );
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Failed;
                warn!("Port forward failed to start: {}", e);
                Err(e)
            }
        }
    }

    async fn start_inner(&mut self, cancel: &CancellationToken) -> Result<()> {
        let listen_port = self.resolve_listen_port()?;
        debug!(listen_port, "Using listen port");

        let pod = self.resolve_pod_name(cancel).await?;
        debug!(pod = %pod, "Using pod");

        let dialer: Arc<dyn StreamDialer> =
            Arc::from(self.backend.dialers.dialer(&self.target.namespace, &pod)?);
        self.dialer_url = Some(dialer.url().to_string());

        let (stop_tx, stop_rx) = oneshot::channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let relay = self.backend.relay.clone();
        let mapping = self.mapping();
        let mut task = tokio::spawn(async move { relay.forward_ports(dialer, mapping, stop_rx, ready_tx).await });

        let deadline = self.target.ready_timeout;
        let wait = tokio::select! {
            ready = ready_rx => match ready {
                Ok(()) => ReadyWait::Ready,
                // Sender dropped without signalling: the relay is finishing
                Err(_) => ReadyWait::SenderDropped,
            },
            joined = &mut task => ReadyWait::Exited(joined),
            _ = cancel.cancelled() => ReadyWait::Cancelled,
            _ = sleep_or_pending(deadline) => ReadyWait::TimedOut,
        };

        let err = match wait {
            ReadyWait::Ready => {
                self.stop_tx = Some(stop_tx);
                self.relay_task = Some(task);
                return Ok(());
            }
            ReadyWait::SenderDropped => return Err(relay_failure(task.await)),
            ReadyWait::Exited(joined) => return Err(relay_failure(joined)),
            ReadyWait::Cancelled => PodtunnelError::Cancelled,
            ReadyWait::TimedOut => {
                PodtunnelError::Timeout(deadline.map(|d| d.as_secs_f64()).unwrap_or_default())
            }
        };

        // The relay is still running; it must be gone before reporting failure
        task.abort();
        if let Err(e) = task.await {
            if !e.is_cancelled() {
                debug!("Relay task ended while aborting: {}", e);
            }
        }
        Err(err)
    }

    /// Allocate a listen port unless one was preset
    fn resolve_listen_port(&mut self) -> Result<u16> {
        if self.target.listen_port == 0 {
            self.target.listen_port = find_available_port().map_err(PodtunnelError::PortAllocation)?;
        }
        Ok(self.target.listen_port)
    }

    /// Resolve the pod once; a preset name is used as-is
    async fn resolve_pod_name(&mut self, cancel: &CancellationToken) -> Result<String> {
        if let Some(ref pod) = self.target.pod {
            return Ok(pod.clone());
        }

        let lister = self.backend.pods.clone();
        let pod = tokio::select! {
            resolved = resolve_running_pod(lister.as_ref(), &self.target.namespace, &self.target.labels) => resolved?,
            _ = cancel.cancelled() => return Err(PodtunnelError::Cancelled),
        };

        self.target.pod = Some(pod.clone());
        Ok(pod)
    }

    /// Signal the relay to stop
    ///
    /// Only the first call on a ready session sends a signal; any other call
    /// is a no-op.
    pub fn stop(&mut self) {
        match self.stop_tx.take() {
            Some(tx) => {
                if tx.send(()).is_err() {
                    debug!("Relay already gone when stop was sent");
                }
                self.state = SessionState::Stopped;
                info!(mapping = %self.mapping(), "Port forward stopped");
            }
            None => debug!(state = %self.state, "Stop ignored"),
        }
    }

    /// Wait for the relay task to finish after `stop`, or for it to fail
    ///
    /// Safe to drop mid-await; the relay task is kept until it completes.
    pub async fn closed(&mut self) -> Result<()> {
        let Some(task) = self.relay_task.as_mut() else {
            return Ok(());
        };
        let joined = task.await;
        self.relay_task = None;

        match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(PodtunnelError::RelayStart(e.to_string())),
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(PodtunnelError::RelayStart(e.to_string())),
        }
    }
}

impl Drop for PortForward {
    fn drop(&mut self) {
        // Dropping the sender alone would also end the relay loop
        self.stop();
    }
}

/// First event seen while waiting for the relay to become ready
enum ReadyWait {
    Ready,
    SenderDropped,
    Exited(std::result::Result<std::result::Result<(), RelayError>, tokio::task::JoinError>),
    Cancelled,
    TimedOut,
}

fn relay_failure(joined: std::result::Result<std::result::Result<(), RelayError>, tokio::task::JoinError>) -> PodtunnelError {
    let err = match joined {
        Ok(Ok(())) => RelayError::ExitedBeforeReady,
        Ok(Err(e)) => e,
        Err(e) => RelayError::Task(e.to_string()),
    };
    PodtunnelError::RelayStart(err.to_string())
}

async fn sleep_or_pending(deadline: Option<Duration>) {
    match deadline {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}

/// Find an available local port
///
/// Binds `127.0.0.1:0`, reads back the OS-assigned port and releases the
/// listener so the relay can bind it.
pub fn find_available_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}
