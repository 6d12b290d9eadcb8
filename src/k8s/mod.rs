//! Kubernetes integration module
//!
//! Forwards a local TCP port to one running pod, picked by name or by label
//! selector, through the API server's `portforward` sub-resource.
//!
//! # Example
//! ```no_run
//! use podtunnel::k8s::{parse_selector, Credentials, ForwardTarget, KubeconfigOverrides, PortForward};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> podtunnel::errors::Result<()> {
//! let credentials = Credentials::load(&KubeconfigOverrides::default()).await?;
//! let target = ForwardTarget::by_labels("default", parse_selector("app=web")?, 8080);
//! let mut session = PortForward::new(target, &credentials)?;
//!
//! session.start(&CancellationToken::new()).await?;
//! println!("listening on {}", session.local_addr());
//! session.stop();
//! # Ok(())
//! # }
//! ```

pub mod credentials;
pub mod dialer;
pub mod parser;
pub mod portforward;
pub mod relay;
pub mod resolver;
pub mod selector;

pub use credentials::{Credentials, KubeconfigOverrides};
pub use dialer::{portforward_url, DialerFactory, KubeDialerFactory, RelayStream, StreamDialer};
pub use parser::{parse_selector, validate_namespace, validate_pod_name};
pub use portforward::{find_available_port, Backend, ForwardTarget, PortForward, SessionState};
pub use relay::{PortMapping, Relay, RelayError, TcpRelay};
pub use resolver::{resolve_running_pod, KubePodLister, PodLister, PodQuery, ResolveError};
pub use selector::{LabelSelector, LabelSelectorRequirement, SelectorOperator};
