//! Config file handling

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::PodtunnelError;
use crate::k8s::{parse_selector, ForwardTarget};

/// `[defaults]` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Namespace used when neither the command line nor a rule names one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubeconfig: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Humantime duration, e.g. "30s"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_timeout: Option<String>,
    /// Global flags prepended to every invocation
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

/// A saved port-forward rule (`[rules.<name>]`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    /// Port inside the pod
    pub port: u16,
    #[serde(default)]
    pub listen_port: u16,
}

impl PortRule {
    /// Build a forward target, falling back to `default_namespace`
    pub fn to_target(&self, default_namespace: &str) -> Result<ForwardTarget, PodtunnelError> {
        let namespace = self.namespace.as_deref().unwrap_or(default_namespace);
        let target = match (&self.pod, &self.selector) {
            (Some(pod), _) => ForwardTarget::by_name(namespace, pod.clone(), self.port),
            (None, Some(selector)) => ForwardTarget::by_labels(namespace, parse_selector(selector)?, self.port),
            (None, None) => {
                return Err(PodtunnelError::Config(
                    "Rule needs either 'pod' or 'selector'".to_string(),
                ));
            }
        };
        Ok(target.with_listen_port(self.listen_port))
    }

    /// One-line description for listings
    pub fn describe(&self) -> String {
        let what = match (&self.pod, &self.selector) {
            (Some(pod), _) => format!("pod/{}", pod),
            (None, Some(selector)) => format!("-l {}", selector),
            (None, None) => "<no target>".to_string(),
        };
        let ns = self.namespace.as_deref().unwrap_or("<default>");
        let listen = if self.listen_port == 0 {
            "auto".to_string()
        } else {
            self.listen_port.to_string()
        };
        format!("{} in {} -> {}:{}", what, ns, listen, self.port)
    }
}

/// podtunnel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip)]
    pub config_dir: PathBuf,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub rules: BTreeMap<String, PortRule>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_dir: Self::default_config_dir(),
            defaults: Defaults::default(),
            rules: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from the default config directory
    pub fn load() -> Result<Self, PodtunnelError> {
        Self::load_from(&Self::default_config_dir())
    }

    /// Load `config.toml` from `config_dir`; a missing file yields defaults
    pub fn load_from(config_dir: &Path) -> Result<Self, PodtunnelError> {
        let config_file = config_dir.join("config.toml");

        if !config_file.exists() {
            return Ok(Self {
                config_dir: config_dir.to_path_buf(),
                ..Self::default()
            });
        }

        let content = std::fs::read_to_string(&config_file)
            .map_err(|e| PodtunnelError::Config(format!("Failed to read config: {}", e)))?;

        let mut config: Config = toml::from_str(&content)
            .map_err(|e| PodtunnelError::Config(format!("Invalid config TOML: {}", e)))?;
        config.config_dir = config_dir.to_path_buf();

        Ok(config)
    }

    /// Write the configuration back to `config.toml`
    pub fn save(&self) -> Result<(), PodtunnelError> {
        std::fs::create_dir_all(&self.config_dir)
            .map_err(|e| PodtunnelError::Config(format!("Failed to create config dir: {}", e)))?;

        let content = toml::to_string_pretty(self)
            .map_err(|e| PodtunnelError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(self.config_file(), content)
            .map_err(|e| PodtunnelError::Config(format!("Failed to write config: {}", e)))
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// Parsed `defaults.ready_timeout`
    pub fn ready_timeout(&self) -> Result<Option<Duration>, PodtunnelError> {
        self.defaults
            .ready_timeout
            .as_deref()
            .map(|s| {
                humantime::parse_duration(s)
                    .map_err(|e| PodtunnelError::Config(format!("Invalid ready_timeout '{}': {}", s, e)))
            })
            .transpose()
    }

    pub fn rule(&self, name: &str) -> Result<&PortRule, PodtunnelError> {
        self.rules
            .get(name)
            .ok_or_else(|| PodtunnelError::Config(format!("No rule named '{}'", name)))
    }

    /// Get the default config directory
    ///
    /// `PODTUNNEL_CONFIG_DIR` takes precedence over the platform directory.
    fn default_config_dir() -> PathBuf {
        if let Some(dir) = std::env::var_os("PODTUNNEL_CONFIG_DIR") {
            return PathBuf::from(dir);
        }
        dirs::config_dir()
            .map(|p| p.join("podtunnel"))
            .unwrap_or_else(|| PathBuf::from(".podtunnel"))
    }
}
