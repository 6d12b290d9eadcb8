//! Post-processing argument logic
//!
//! Merges command-line flags, saved rules and config defaults into a
//! [`ForwardTarget`] or a [`PortRule`].

use crate::cli::args::{StartArgs, TargetArgs};
use crate::config::{Config, PortRule};
use crate::errors::PodtunnelError;
use crate::k8s::{parse_selector, ForwardTarget, KubeconfigOverrides};

/// Namespace used when nothing else names one
pub const FALLBACK_NAMESPACE: &str = "default";

/// Resolve the namespace: flag, then config default, then context default
pub fn effective_namespace(flag: Option<&str>, config: &Config, context_namespace: Option<&str>) -> String {
    flag.or(config.defaults.namespace.as_deref())
        .or(context_namespace)
        .unwrap_or(FALLBACK_NAMESPACE)
        .to_string()
}

/// Kubeconfig overrides from flags, falling back to config defaults
pub fn kubeconfig_overrides(
    kubeconfig: Option<&std::path::Path>,
    context: Option<&str>,
    config: &Config,
) -> KubeconfigOverrides {
    KubeconfigOverrides {
        kubeconfig: kubeconfig
            .map(|p| p.to_path_buf())
            .or_else(|| config.defaults.kubeconfig.clone()),
        context: context
            .map(String::from)
            .or_else(|| config.defaults.context.clone()),
    }
}

/// Build the forward target for `start`
///
/// A `--rule` supplies the base; explicit flags override its fields.
pub fn process_start_args(
    args: &StartArgs,
    config: &Config,
    context_namespace: Option<&str>,
) -> Result<ForwardTarget, PodtunnelError> {
    let mut rule = match &args.rule {
        Some(name) => config.rule(name)?.clone(),
        None => PortRule {
            namespace: None,
            pod: None,
            selector: None,
            port: 0,
            listen_port: 0,
        },
    };
    apply_target_args(&mut rule, &args.target);

    if rule.port == 0 {
        return Err(PodtunnelError::Argument(
            "A destination port is required (-p/--port)".to_string(),
        ));
    }

    if rule.pod.is_none() && rule.selector.as_deref().map(str::trim).unwrap_or("").is_empty() {
        return Err(PodtunnelError::Argument(
            "Either a label selector (-l) or a pod name (--pod) is required".to_string(),
        ));
    }

    let namespace = effective_namespace(rule.namespace.as_deref(), config, context_namespace);
    let mut target = rule.to_target(&namespace)?;

    target.ready_timeout = match args.ready_timeout {
        Some(timeout) => Some(timeout),
        None => config.ready_timeout()?,
    };

    Ok(target)
}

/// Build a rule for `rule add`, validating it the way `start` would
pub fn process_rule_args(target: &TargetArgs) -> Result<PortRule, PodtunnelError> {
    let port = target.port.ok_or_else(|| {
        PodtunnelError::Argument("A destination port is required (-p/--port)".to_string())
    })?;

    if target.pod.is_none() && target.selector.is_none() {
        return Err(PodtunnelError::Argument(
            "Either a label selector (-l) or a pod name (--pod) is required".to_string(),
        ));
    }

    if let Some(ref selector) = target.selector {
        if parse_selector(selector)?.is_empty() {
            return Err(PodtunnelError::Argument("Label selector cannot be empty".to_string()));
        }
    }

    let rule = PortRule {
        namespace: target.namespace.clone(),
        pod: target.pod.clone(),
        selector: target.selector.clone(),
        port,
        listen_port: target.listen_port,
    };
    rule.to_target(FALLBACK_NAMESPACE)?.validate()?;
    Ok(rule)
}

fn apply_target_args(rule: &mut PortRule, target: &TargetArgs) {
    if let Some(ref ns) = target.namespace {
        rule.namespace = Some(ns.clone());
    }
    if let Some(ref pod) = target.pod {
        rule.pod = Some(pod.clone());
        rule.selector = None;
    }
    if let Some(ref selector) = target.selector {
        rule.selector = Some(selector.clone());
        rule.pod = None;
    }
    if let Some(port) = target.port {
        rule.port = port;
    }
    if target.listen_port != 0 {
        rule.listen_port = target.listen_port;
    }
}
