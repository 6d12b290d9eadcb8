//! Cluster credentials
//!
//! Loads the connection configuration once through the kubeconfig chain
//! (`KUBECONFIG`, `~/.kube/config`, then in-cluster service account) and
//! derives API clients from it.

use std::path::{Path, PathBuf};

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::debug;

use crate::errors::PodtunnelError;

/// Overrides applied when loading the kubeconfig
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KubeconfigOverrides {
    /// Explicit kubeconfig file instead of the default chain
    pub kubeconfig: Option<PathBuf>,
    /// Context to use instead of the current one
    pub context: Option<String>,
}

impl KubeconfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.kubeconfig.is_none() && self.context.is_none()
    }
}

/// Immutable cluster connection configuration
#[derive(Clone)]
pub struct Credentials {
    config: Config,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Auth material stays out of debug output
        f.debug_struct("Credentials")
            .field("cluster_url", &self.config.cluster_url.to_string())
            .field("default_namespace", &self.config.default_namespace)
            .finish()
    }
}

impl Credentials {
    /// Wrap an already-built configuration
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    /// Load credentials non-interactively
    ///
    /// With empty overrides this is the standard inference chain. A context
    /// override applies to the default kubeconfig; an explicit path reads
    /// that file instead.
    pub async fn load(overrides: &KubeconfigOverrides) -> Result<Self, PodtunnelError> {
        let config = if overrides.is_empty() {
            Config::infer()
                .await
                .map_err(|e| PodtunnelError::Kubeconfig(e.to_string()))?
        } else {
            let options = KubeConfigOptions {
                context: overrides.context.clone(),
                ..Default::default()
            };
            match &overrides.kubeconfig {
                Some(path) => load_from_path(path, &options).await?,
                None => Config::from_kubeconfig(&options)
                    .await
                    .map_err(|e| PodtunnelError::Kubeconfig(e.to_string()))?,
            }
        };

        debug!(cluster = %config.cluster_url, "Loaded kubernetes configuration");
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Base URL of the API server, without a trailing slash
    pub fn cluster_url(&self) -> String {
        self.config.cluster_url.to_string().trim_end_matches('/').to_string()
    }

    /// Namespace from the active context
    pub fn default_namespace(&self) -> &str {
        &self.config.default_namespace
    }

    /// Build a fresh API client
    pub fn client(&self) -> Result<Client, PodtunnelError> {
        Client::try_from(self.config.clone()).map_err(|e| PodtunnelError::Client(e.to_string()))
    }
}

async fn load_from_path(path: &Path, options: &KubeConfigOptions) -> Result<Config, PodtunnelError> {
    let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
        PodtunnelError::Kubeconfig(format!("{}: {}", path.display(), e))
    })?;
    Config::from_custom_kubeconfig(kubeconfig, options)
        .await
        .map_err(|e| PodtunnelError::Kubeconfig(e.to_string()))
}
