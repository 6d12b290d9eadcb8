//! Running-pod resolution
//!
//! Turns a namespace plus label selector into exactly one running pod name.
//! Ambiguity is always an error: forwarding to an arbitrary pod among several
//! candidates is never what the caller asked for.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use thiserror::Error;
use tracing::debug;

use super::selector::LabelSelector;

/// Field selector restricting a pod list to the Running phase
pub const RUNNING_PHASE_FIELD_SELECTOR: &str = "status.phase=Running";

/// Failures while resolving a pod from a selector
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("no pod labels specified")]
    InvalidSelector,

    #[error("could not find running pod for selector: labels \"{selector}\"")]
    NotFound { selector: String },

    #[error("ambiguous pod: found {count} running pods for selector: labels \"{selector}\"")]
    Ambiguous { selector: String, count: usize },

    #[error("listing pods in kubernetes: {0}")]
    ClusterQueryFailed(String),
}

/// A list request against the pods of one namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodQuery {
    pub selector: LabelSelector,
    pub field_selector: String,
}

impl PodQuery {
    /// Pods matching `selector` that are in the Running phase
    pub fn running(selector: &LabelSelector) -> Self {
        Self {
            selector: selector.clone(),
            field_selector: RUNNING_PHASE_FIELD_SELECTOR.to_string(),
        }
    }

    pub fn label_selector(&self) -> String {
        self.selector.to_string()
    }
}

/// Cluster query interface: list pod names in a namespace
#[async_trait]
pub trait PodLister: Send + Sync {
    async fn list_pods(&self, namespace: &str, query: &PodQuery) -> Result<Vec<String>, ResolveError>;
}

/// [`PodLister`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubePodLister {
    client: Client,
}

impl KubePodLister {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodLister for KubePodLister {
    async fn list_pods(&self, namespace: &str, query: &PodQuery) -> Result<Vec<String>, ResolveError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let label_selector = query.label_selector();
        let params = ListParams::default()
            .labels(&label_selector)
            .fields(&query.field_selector);

        let list = pods
            .list(&params)
            .await
            .map_err(|e| ResolveError::ClusterQueryFailed(e.to_string()))?;

        Ok(list.items.iter().map(|pod| pod.name_any()).collect())
    }
}

/// Resolve exactly one running pod matching `selector` in `namespace`
pub async fn resolve_running_pod(
    lister: &dyn PodLister,
    namespace: &str,
    selector: &LabelSelector,
) -> Result<String, ResolveError> {
    if selector.is_empty() {
        return Err(ResolveError::InvalidSelector);
    }

    let query = PodQuery::running(selector);
    let mut names = lister.list_pods(namespace, &query).await?;
    debug!(namespace, selector = %selector, matches = names.len(), "Listed running pods");

    match names.len() {
        0 => Err(ResolveError::NotFound {
            selector: selector.to_string(),
        }),
        1 => Ok(names.remove(0)),
        count => Err(ResolveError::Ambiguous {
            selector: selector.to_string(),
            count,
        }),
    }
}
