//! Authenticated stream dialers
//!
//! A dialer is scoped to one pod and opens upgraded streams to ports inside
//! it through the API server's `portforward` sub-resource.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, Portforwarder};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use url::Url;

use crate::errors::PodtunnelError;
use super::credentials::Credentials;

/// Byte stream carrying one forwarded connection
pub trait RelayStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> RelayStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Opens streams to ports of a single pod
#[async_trait]
pub trait StreamDialer: Send + Sync {
    /// The `portforward` endpoint this dialer targets
    fn url(&self) -> &Url;

    async fn dial(&self, port: u16) -> io::Result<Box<dyn RelayStream>>;
}

/// Builds dialers from cluster credentials
pub trait DialerFactory: Send + Sync {
    fn dialer(&self, namespace: &str, pod: &str) -> Result<Box<dyn StreamDialer>, PodtunnelError>;
}

/// `{cluster}/api/v1/namespaces/{namespace}/pods/{pod}/portforward`
pub fn portforward_url(cluster_url: &str, namespace: &str, pod: &str) -> Result<Url, PodtunnelError> {
    let raw = format!(
        "{}/api/v1/namespaces/{}/pods/{}/portforward",
        cluster_url.trim_end_matches('/'),
        namespace,
        pod
    );
    Url::parse(&raw).map_err(|e| PodtunnelError::Dialer(format!("{}: {}", raw, e)))
}

/// [`DialerFactory`] using kube's websocket port-forward transport
#[derive(Debug, Clone)]
pub struct KubeDialerFactory {
    credentials: Credentials,
}

impl KubeDialerFactory {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

impl DialerFactory for KubeDialerFactory {
    fn dialer(&self, namespace: &str, pod: &str) -> Result<Box<dyn StreamDialer>, PodtunnelError> {
        let client = kube::Client::try_from(self.credentials.config().clone())
            .map_err(|e| PodtunnelError::TransportBuild(e.to_string()))?;
        let url = portforward_url(&self.credentials.cluster_url(), namespace, pod)?;

        Ok(Box::new(KubeDialer {
            pods: Api::namespaced(client, namespace),
            pod: pod.to_string(),
            url,
        }))
    }
}

/// Dialer for one pod over an upgraded API server connection
pub struct KubeDialer {
    pods: Api<Pod>,
    pod: String,
    url: Url,
}

#[async_trait]
impl StreamDialer for KubeDialer {
    fn url(&self) -> &Url {
        &self.url
    }

    async fn dial(&self, port: u16) -> io::Result<Box<dyn RelayStream>> {
        let mut forwarder = self
            .pods
            .portforward(&self.pod, &[port])
            .await
            .map_err(io::Error::other)?;
        let stream = forwarder.take_stream(port).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("port {} not found in forwarder", port))
        })?;

        Ok(Box::new(PodStream {
            stream,
            _forwarder: forwarder,
        }))
    }
}

/// Upgraded stream that keeps its forwarder alive for as long as it is used
struct PodStream<S> {
    stream: S,
    _forwarder: Portforwarder,
}

impl<S: AsyncRead + Unpin> AsyncRead for PodStream<S> {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PodStream<S> {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}
