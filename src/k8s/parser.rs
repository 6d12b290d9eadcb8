//! Selector and resource-name parsing
//!
//! Parses the `kubectl -l` style selector syntax into a [`LabelSelector`] and
//! validates namespace and pod names before they reach the API server.

use crate::errors::PodtunnelError;
use super::selector::{LabelSelector, LabelSelectorRequirement, SelectorOperator};

/// Parse a selector string into a [`LabelSelector`]
///
/// # Syntax
/// ```text
/// key=value | key==value | key!=value | key in (a,b) | key notin (a,b) | key | !key
/// ```
/// Terms are separated by commas; commas inside parentheses belong to the
/// value list.
///
/// # Examples
/// ```
/// use podtunnel::k8s::parse_selector;
///
/// let selector = parse_selector("app=web,env in (prod,canary)").unwrap();
/// assert_eq!(selector.match_labels.get("app").map(String::as_str), Some("web"));
/// assert_eq!(selector.match_expressions.len(), 1);
/// assert_eq!(selector.to_string(), "app=web,env in (canary,prod)");
/// ```
pub fn parse_selector(input: &str) -> Result<LabelSelector, PodtunnelError> {
    let mut selector = LabelSelector::new();
    let input = input.trim();
    if input.is_empty() {
        return Ok(selector);
    }

    for term in split_terms(input)? {
        let term = term.trim();
        if term.is_empty() {
            return Err(PodtunnelError::Argument(format!(
                "Empty term in label selector: {}", input
            )));
        }

        if let Some(key) = term.strip_prefix('!') {
            let key = key.trim();
            validate_label_key(key)?;
            selector.match_expressions.push(LabelSelectorRequirement::new(
                key,
                SelectorOperator::DoesNotExist,
                Vec::new(),
            ));
        } else if let Some(open) = term.find('(') {
            selector.match_expressions.push(parse_set_term(term, open)?);
        } else if let Some((key, value)) = term.split_once("!=") {
            let (key, value) = (key.trim(), value.trim());
            validate_label_key(key)?;
            validate_label_value(value)?;
            selector.match_expressions.push(LabelSelectorRequirement::new(
                key,
                SelectorOperator::NotIn,
                vec![value.to_string()],
            ));
        } else if let Some((key, value)) = term.split_once('=') {
            let value = value.strip_prefix('=').unwrap_or(value);
            let (key, value) = (key.trim(), value.trim());
            validate_label_key(key)?;
            validate_label_value(value)?;
            if let Some(existing) = selector.match_labels.get(key) {
                if existing != value {
                    return Err(PodtunnelError::Argument(format!(
                        "Conflicting values for label '{}': {} and {}", key, existing, value
                    )));
                }
            }
            selector.match_labels.insert(key.to_string(), value.to_string());
        } else {
            validate_label_key(term)?;
            selector.match_expressions.push(LabelSelectorRequirement::new(
                term,
                SelectorOperator::Exists,
                Vec::new(),
            ));
        }
    }

    Ok(selector)
}

/// Split on commas that are not inside a parenthesised value list
fn split_terms(input: &str) -> Result<Vec<&str>, PodtunnelError> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (idx, c) in input.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1).ok_or_else(|| PodtunnelError::Argument(format!(
                    "Unbalanced ')' in label selector: {}", input
                )))?;
            }
            ',' if depth == 0 => {
                terms.push(&input[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err(PodtunnelError::Argument(format!(
            "Unclosed '(' in label selector: {}", input
        )));
    }
    terms.push(&input[start..]);
    Ok(terms)
}

/// Parse `key in (a,b)` / `key notin (a,b)`
fn parse_set_term(term: &str, open: usize) -> Result<LabelSelectorRequirement, PodtunnelError> {
    let head = term[..open].trim();
    let rest = term[open + 1..].trim_end();
    let list = rest.strip_suffix(')').ok_or_else(|| PodtunnelError::Argument(format!(
        "Set-based requirement must end with ')': {}", term
    )))?;

    let mut words = head.split_whitespace();
    let (key, op) = match (words.next(), words.next(), words.next()) {
        (Some(key), Some(op), None) => (key, op),
        _ => {
            return Err(PodtunnelError::Argument(format!(
                "Expected 'key in (...)' or 'key notin (...)': {}", term
            )));
        }
    };

    let operator = match op {
        "in" => SelectorOperator::In,
        "notin" => SelectorOperator::NotIn,
        other => {
            return Err(PodtunnelError::Argument(format!(
                "Unknown selector operator '{}' in: {}", other, term
            )));
        }
    };

    validate_label_key(key)?;

    let values: Vec<String> = list
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .collect();
    if values.is_empty() {
        return Err(PodtunnelError::Argument(format!(
            "Set-based requirement needs at least one value: {}", term
        )));
    }
    for value in &values {
        validate_label_value(value)?;
    }

    Ok(LabelSelectorRequirement::new(key, operator, values))
}

fn validate_label_key(key: &str) -> Result<(), PodtunnelError> {
    if key.is_empty() {
        return Err(PodtunnelError::Argument("Label key cannot be empty".to_string()));
    }

    let (prefix, name) = match key.rsplit_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };

    if let Some(prefix) = prefix {
        validate_dns_subdomain(prefix, "label prefix")?;
    }

    if name.is_empty() || name.len() > 63 {
        return Err(PodtunnelError::Argument(format!(
            "Label key name must be 1-63 characters: {}", key
        )));
    }

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.') {
        return Err(PodtunnelError::Argument(format!(
            "Label key contains invalid characters: {}", key
        )));
    }

    if !alphanumeric_ends(name) {
        return Err(PodtunnelError::Argument(format!(
            "Label key name must start and end with a letter or digit: {}", key
        )));
    }

    Ok(())
}

fn validate_label_value(value: &str) -> Result<(), PodtunnelError> {
    if value.len() > 63 {
        return Err(PodtunnelError::Argument(format!(
            "Label value too long (max 63 chars): {}", value
        )));
    }

    if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.') {
        return Err(PodtunnelError::Argument(format!(
            "Label value contains invalid characters: {}", value
        )));
    }

    // Empty values are allowed
    if !value.is_empty() && !alphanumeric_ends(value) {
        return Err(PodtunnelError::Argument(format!(
            "Label value must start and end with a letter or digit: {}", value
        )));
    }

    Ok(())
}

fn alphanumeric_ends(s: &str) -> bool {
    let bytes = s.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric(),
        _ => false,
    }
}

/// Validate a namespace name (DNS-1123 label)
pub fn validate_namespace(name: &str) -> Result<(), PodtunnelError> {
    validate_dns_label(name, "namespace")
}

/// Validate a pod name (DNS-1123 subdomain)
pub fn validate_pod_name(name: &str) -> Result<(), PodtunnelError> {
    validate_dns_subdomain(name, "pod")
}

fn validate_dns_subdomain(name: &str, kind: &str) -> Result<(), PodtunnelError> {
    if name.is_empty() {
        return Err(PodtunnelError::Argument(format!("K8s {} name cannot be empty", kind)));
    }

    if name.len() > 253 {
        return Err(PodtunnelError::Argument(format!(
            "K8s {} name too long (max 253 chars): {}", kind, name
        )));
    }

    for part in name.split('.') {
        validate_dns_label(part, kind)
            .map_err(|_| PodtunnelError::Argument(format!("Invalid K8s {} name: {}", kind, name)))?;
    }

    Ok(())
}

/// Validate a DNS-1123 label
///
/// Must be 63 characters or fewer, contain only lowercase alphanumerics or
/// '-', and start and end with an alphanumeric.
fn validate_dns_label(name: &str, kind: &str) -> Result<(), PodtunnelError> {
    if name.is_empty() {
        return Err(PodtunnelError::Argument(format!("K8s {} name cannot be empty", kind)));
    }

    if name.len() > 63 {
        return Err(PodtunnelError::Argument(format!(
            "K8s {} name too long (max 63 chars): {}", kind, name
        )));
    }

    let alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();

    if !name.chars().next().map(alnum).unwrap_or(false) {
        return Err(PodtunnelError::Argument(format!(
            "K8s {} name must start with a lowercase letter or digit: {}", kind, name
        )));
    }

    if !name.chars().last().map(alnum).unwrap_or(false) {
        return Err(PodtunnelError::Argument(format!(
            "K8s {} name must end with alphanumeric character: {}", kind, name
        )));
    }

    for c in name.chars() {
        if !alnum(c) && c != '-' {
            return Err(PodtunnelError::Argument(format!(
                "K8s {} name contains invalid character '{}': {}", kind, c, name
            )));
        }
    }

    Ok(())
}
