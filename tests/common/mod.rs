//! Common test utilities for podtunnel integration tests
//!
//! This module provides shared test infrastructure including:
//! - An in-memory cluster (pod listing + dialers) standing in for the API server
//! - A scripted relay that records what the session hands it
//! - CLI invocation helpers

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use podtunnel::errors::PodtunnelError;
use podtunnel::k8s::{
    portforward_url, Backend, DialerFactory, PodLister, PodQuery, PortMapping, Relay, RelayError,
    RelayStream, ResolveError, StreamDialer, TcpRelay,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::oneshot;
use url::Url;

/// API server URL used by fake dialers
pub const CLUSTER_URL: &str = "https://cluster.test:6443";

/// A pod known to the fake cluster
#[derive(Debug, Clone)]
pub struct FakePod {
    pub name: String,
    pub phase: String,
    pub labels: BTreeMap<String, String>,
}

impl FakePod {
    pub fn new(name: &str, phase: &str, labels: &[(&str, &str)]) -> Self {
        Self {
            name: name.to_string(),
            phase: phase.to_string(),
            labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    pub fn running(name: &str, labels: &[(&str, &str)]) -> Self {
        Self::new(name, "Running", labels)
    }
}

/// In-memory cluster that applies label and phase filters the way the API
/// server does
#[derive(Default)]
pub struct FakeCluster {
    pub pods: Vec<FakePod>,
    pub list_calls: AtomicUsize,
    pub queries: Mutex<Vec<(String, PodQuery)>>,
    pub dialer_requests: Mutex<Vec<(String, String)>>,
    pub fail_transport: bool,
    /// Dialers are built but every dial is refused, like a forbidden upgrade
    pub refuse_dial: bool,
    pub fail_listing: bool,
    pub hang_listing: bool,
}

impl FakeCluster {
    pub fn with_pods(pods: Vec<FakePod>) -> Self {
        Self {
            pods,
            ..Default::default()
        }
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn dialer_requests(&self) -> Vec<(String, String)> {
        self.dialer_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PodLister for FakeCluster {
    async fn list_pods(&self, namespace: &str, query: &PodQuery) -> Result<Vec<String>, ResolveError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push((namespace.to_string(), query.clone()));

        if self.hang_listing {
            std::future::pending::<()>().await;
        }
        if self.fail_listing {
            return Err(ResolveError::ClusterQueryFailed("connection refused".to_string()));
        }

        let phase = query.field_selector.strip_prefix("status.phase=");
        Ok(self
            .pods
            .iter()
            .filter(|pod| phase.map(|p| pod.phase == p).unwrap_or(true))
            .filter(|pod| query.selector.matches(&pod.labels))
            .map(|pod| pod.name.clone())
            .collect())
    }
}

impl DialerFactory for FakeCluster {
    fn dialer(&self, namespace: &str, pod: &str) -> Result<Box<dyn StreamDialer>, PodtunnelError> {
        self.dialer_requests
            .lock()
            .unwrap()
            .push((namespace.to_string(), pod.to_string()));

        if self.fail_transport {
            return Err(PodtunnelError::TransportBuild("no TLS config".to_string()));
        }

        let url = portforward_url(CLUSTER_URL, namespace, pod)?;
        if self.refuse_dial {
            return Ok(Box::new(RefusingDialer { url }));
        }
        Ok(Box::new(EchoDialer { url }))
    }
}

/// Dialer whose upgrade is always rejected
pub struct RefusingDialer {
    pub url: Url,
}

impl RefusingDialer {
    pub fn new(pod: &str) -> Self {
        Self {
            url: portforward_url(CLUSTER_URL, "default", pod).unwrap(),
        }
    }
}

#[async_trait]
impl StreamDialer for RefusingDialer {
    fn url(&self) -> &Url {
        &self.url
    }

    async fn dial(&self, _port: u16) -> io::Result<Box<dyn RelayStream>> {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "403 Forbidden"))
    }
}

/// Dialer whose pod echoes every byte back
pub struct EchoDialer {
    pub url: Url,
}

impl EchoDialer {
    pub fn new(pod: &str) -> Self {
        Self {
            url: portforward_url(CLUSTER_URL, "default", pod).unwrap(),
        }
    }
}

#[async_trait]
impl StreamDialer for EchoDialer {
    fn url(&self) -> &Url {
        &self.url
    }

    async fn dial(&self, _port: u16) -> io::Result<Box<dyn RelayStream>> {
        let (local, mut remote) = tokio::io::duplex(1024);
        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            loop {
                match remote.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if remote.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Ok(Box::new(local))
    }
}

/// How the scripted relay behaves
#[derive(Debug, Clone)]
pub enum RelayBehavior {
    /// Signal ready, then wait for stop
    Ready,
    /// Return an error without signalling ready
    Fail(String),
    /// Never signal anything
    Hang,
}

/// Relay that records its inputs instead of moving bytes
pub struct ScriptedRelay {
    pub behavior: RelayBehavior,
    pub mappings: Mutex<Vec<PortMapping>>,
    pub dialer_urls: Mutex<Vec<String>>,
    /// Whether the listen port could be bound when the relay was invoked
    pub listen_port_free: Mutex<Vec<bool>>,
    pub stop_signals: AtomicUsize,
    /// Relay futures dropped before finishing on their own
    pub dropped: Arc<AtomicUsize>,
}

/// Counts a relay future dropped mid-flight
struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl ScriptedRelay {
    pub fn new(behavior: RelayBehavior) -> Self {
        Self {
            behavior,
            mappings: Mutex::new(Vec::new()),
            dialer_urls: Mutex::new(Vec::new()),
            listen_port_free: Mutex::new(Vec::new()),
            stop_signals: AtomicUsize::new(0),
            dropped: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }

    pub fn mappings(&self) -> Vec<PortMapping> {
        self.mappings.lock().unwrap().clone()
    }

    pub fn stop_signals(&self) -> usize {
        self.stop_signals.load(Ordering::SeqCst)
    }

    pub fn invocations(&self) -> usize {
        self.mappings.lock().unwrap().len()
    }
}

#[async_trait]
impl Relay for ScriptedRelay {
    async fn forward_ports(
        &self,
        dialer: Arc<dyn StreamDialer>,
        mapping: PortMapping,
        stop: oneshot::Receiver<()>,
        ready: oneshot::Sender<()>,
    ) -> Result<(), RelayError> {
        self.mappings.lock().unwrap().push(mapping);
        self.dialer_urls.lock().unwrap().push(dialer.url().to_string());
        let free = std::net::TcpListener::bind(("127.0.0.1", mapping.listen_port)).is_ok();
        self.listen_port_free.lock().unwrap().push(free);

        match &self.behavior {
            RelayBehavior::Ready => {
                let _ = ready.send(());
                if stop.await.is_ok() {
                    self.stop_signals.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            }
            RelayBehavior::Fail(message) => Err(RelayError::Listen {
                port: mapping.listen_port,
                source: io::Error::new(io::ErrorKind::AddrInUse, message.clone()),
            }),
            RelayBehavior::Hang => {
                let _keep = (stop, ready, DropCounter(self.dropped.clone()));
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

/// Backend over a fake cluster and a scripted relay
pub fn scripted_backend(cluster: &Arc<FakeCluster>, relay: &Arc<ScriptedRelay>) -> Backend {
    Backend {
        pods: cluster.clone(),
        dialers: cluster.clone(),
        relay: relay.clone(),
    }
}

/// Backend over a fake cluster and the real loopback relay
pub fn tcp_backend(cluster: &Arc<FakeCluster>) -> Backend {
    Backend {
        pods: cluster.clone(),
        dialers: cluster.clone(),
        relay: Arc::new(TcpRelay),
    }
}

/// `podtunnel` command with an isolated config directory
pub fn podtunnel(config_dir: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::cargo_bin("podtunnel").expect("binary builds");
    cmd.env("PODTUNNEL_CONFIG_DIR", config_dir);
    cmd.env_remove("RUST_LOG");
    cmd
}
