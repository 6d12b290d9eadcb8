//! Local relay
//!
//! Accepts connections on the local listen port and copies bytes to and from
//! a stream dialed into the pod, one upstream stream per local connection.
//! The pod is dialed once before the relay reports ready.

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::dialer::{RelayStream, StreamDialer};

/// Pause after an accept error that is likely to repeat (e.g. fd exhaustion)
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// `listen:destination` port pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub listen_port: u16,
    pub destination_port: u16,
}

impl PortMapping {
    pub fn new(listen_port: u16, destination_port: u16) -> Self {
        Self {
            listen_port,
            destination_port,
        }
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.listen_port, self.destination_port)
    }
}

/// Failures of the relay loop
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("unable to listen on 127.0.0.1:{port}: {source}")]
    Listen {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to open stream to pod port {port}: {source}")]
    Upstream {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("relay exited before becoming ready")]
    ExitedBeforeReady,

    #[error("relay task failed: {0}")]
    Task(String),
}

/// Runs a forwarding loop for one mapping
///
/// Implementations send on `ready` once they accept connections and return
/// when `stop` fires or a fatal error occurs. An error returned before
/// `ready` is sent is a start failure.
#[async_trait]
pub trait Relay: Send + Sync {
    async fn forward_ports(
        &self,
        dialer: Arc<dyn StreamDialer>,
        mapping: PortMapping,
        stop: oneshot::Receiver<()>,
        ready: oneshot::Sender<()>,
    ) -> Result<(), RelayError>;
}

/// Loopback TCP relay
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpRelay;

#[async_trait]
impl Relay for TcpRelay {
    async fn forward_ports(
        &self,
        dialer: Arc<dyn StreamDialer>,
        mapping: PortMapping,
        mut stop: oneshot::Receiver<()>,
        ready: oneshot::Sender<()>,
    ) -> Result<(), RelayError> {
        // The first stream doubles as the upgrade check and serves the first connection
        let mut first = Some(dialer.dial(mapping.destination_port).await.map_err(|source| {
            RelayError::Upstream {
                port: mapping.destination_port,
                source,
            }
        })?);

        let listen_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, mapping.listen_port));
        let listener = TcpListener::bind(listen_addr).await.map_err(|source| RelayError::Listen {
            port: mapping.listen_port,
            source,
        })?;

        info!(target_url = %dialer.url(), "Forwarding from {} -> {}", listen_addr, mapping.destination_port);
        let _ = ready.send(());

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "Handling connection for {}", mapping.destination_port);
                            connections.spawn(forward_connection(
                                stream,
                                dialer.clone(),
                                first.take(),
                                mapping.destination_port,
                            ));
                        }
                        Err(e) => match accept_retry_delay(&e) {
                            Some(delay) => {
                                warn!("Accept error on {}: {}", listen_addr, e);
                                tokio::time::sleep(delay).await;
                            }
                            None => debug!("Accept error: {}", e),
                        },
                    }
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                _ = &mut stop => {
                    info!("Port forward {} stopping", mapping);
                    break;
                }
            }
        }

        connections.shutdown().await;
        Ok(())
    }
}

/// How long to wait before accepting again after `err`
///
/// Errors tied to a single aborted handshake are retried at once; anything
/// else backs off so a persistent failure does not spin the loop.
fn accept_retry_delay(err: &io::Error) -> Option<Duration> {
    match err.kind() {
        io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset | io::ErrorKind::Interrupted => None,
        _ => Some(ACCEPT_ERROR_BACKOFF),
    }
}

/// Forward a single local connection into the pod
async fn forward_connection(
    mut client: TcpStream,
    dialer: Arc<dyn StreamDialer>,
    upstream: Option<Box<dyn RelayStream>>,
    port: u16,
) {
    let mut upstream = match upstream {
        Some(stream) => stream,
        None => match dialer.dial(port).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to dial pod port {}: {}", port, e);
                let _ = client.shutdown().await;
                return;
            }
        },
    };

    match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
        Ok((sent, received)) => debug!(sent, received, "Connection closed"),
        Err(e) => warn!("Connection for {} ended: {}", port, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use url::Url;

    struct RefusingDialer {
        url: Url,
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

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_dial_failure_is_logged_at_warn() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        tracing::subscriber::with_default(subscriber, || {
            runtime.block_on(async {
                let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let addr = listener.local_addr().unwrap();
                let (_client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
                let (stream, _) = accepted.unwrap();

                let dialer: Arc<dyn StreamDialer> = Arc::new(RefusingDialer {
                    url: "https://cluster.test/api/v1/namespaces/default/pods/web/portforward".parse().unwrap(),
                });
                forward_connection(stream, dialer, None, 8080).await;
            });
        });

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("WARN"));
        assert!(output.contains("Failed to dial pod port 8080: 403 Forbidden"));
    }

    #[test]
    fn test_mapping_renders_listen_then_destination() {
        assert_eq!(PortMapping::new(43123, 9090).to_string(), "43123:9090");
    }

    #[test]
    fn test_listen_error_names_port() {
        let err = RelayError::Listen {
            port: 8080,
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use"),
        };
        assert!(err.to_string().contains("8080"));
        assert!(err.to_string().contains("address in use"));
    }

    #[test]
    fn test_accept_errors_back_off_unless_per_connection() {
        let aborted = io::Error::from(io::ErrorKind::ConnectionAborted);
        assert_eq!(accept_retry_delay(&aborted), None);

        // EMFILE
        let exhausted = io::Error::from_raw_os_error(24);
        assert_eq!(accept_retry_delay(&exhausted), Some(ACCEPT_ERROR_BACKOFF));

        let other = io::Error::new(io::ErrorKind::Other, "boom");
        assert!(accept_retry_delay(&other).is_some());
    }
}
