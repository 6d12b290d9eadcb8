//! Label selectors
//!
//! A selector is a set of exact-match labels plus a list of richer
//! requirements. Rendering follows the canonical Kubernetes form so that the
//! string sent to the API server and the one shown in error messages agree.

use std::collections::BTreeMap;
use std::fmt;

/// Operator of a match expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// A single `key operator values` requirement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSelectorRequirement {
    pub key: String,
    pub operator: SelectorOperator,
    pub values: Vec<String>,
}

impl LabelSelectorRequirement {
    pub fn new(key: impl Into<String>, operator: SelectorOperator, values: Vec<String>) -> Self {
        Self {
            key: key.into(),
            operator,
            values,
        }
    }

    /// Whether a label set satisfies this requirement
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self.operator {
            SelectorOperator::In => labels
                .get(&self.key)
                .map(|v| self.values.iter().any(|want| want == v))
                .unwrap_or(false),
            SelectorOperator::NotIn => labels
                .get(&self.key)
                .map(|v| !self.values.iter().any(|want| want == v))
                .unwrap_or(true),
            SelectorOperator::Exists => labels.contains_key(&self.key),
            SelectorOperator::DoesNotExist => !labels.contains_key(&self.key),
        }
    }

    fn render(&self) -> String {
        let mut values: Vec<&str> = self.values.iter().map(String::as_str).collect();
        values.sort_unstable();
        values.dedup();

        match self.operator {
            SelectorOperator::In => format!("{} in ({})", self.key, values.join(",")),
            SelectorOperator::NotIn => format!("{} notin ({})", self.key, values.join(",")),
            SelectorOperator::Exists => self.key.clone(),
            SelectorOperator::DoesNotExist => format!("!{}", self.key),
        }
    }
}

/// Label query over pod metadata
///
/// Either field may be empty; a selector with both empty selects nothing
/// useful and is rejected by the pod resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    /// Exact `key=value` matches, ordered by key
    pub match_labels: BTreeMap<String, String>,
    /// Set-based requirements
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

impl LabelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a selector from exact-match labels only
    pub fn from_labels<K, V, I>(labels: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            match_labels: labels.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            match_expressions: Vec::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.match_labels.insert(key.into(), value.into());
        self
    }

    pub fn with_expression(mut self, requirement: LabelSelectorRequirement) -> Self {
        self.match_expressions.push(requirement);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }

    /// Evaluate the selector against a pod's labels
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
            && self.match_expressions.iter().all(|req| req.matches(labels))
    }

    /// Rendered terms in canonical order
    ///
    /// Match-labels render as `key=value`; expressions keep their set form
    /// even with a single value. Equality sorts before expressions on the
    /// same key.
    fn terms(&self) -> Vec<String> {
        let mut terms: Vec<(&str, Option<SelectorOperator>, String)> = self
            .match_labels
            .iter()
            .map(|(k, v)| (k.as_str(), None, format!("{}={}", k, v)))
            .chain(
                self.match_expressions
                    .iter()
                    .map(|req| (req.key.as_str(), Some(req.operator), req.render())),
            )
            .collect();
        terms.sort_by(|a, b| a.0.cmp(b.0).then(a.1.cmp(&b.1)));
        terms.into_iter().map(|(_, _, term)| term).collect()
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "<none>");
        }
        write!(f, "{}", self.terms().join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_empty_selector_renders_none() {
        let selector = LabelSelector::new();
        assert!(selector.is_empty());
        assert_eq!(selector.to_string(), "<none>");
    }

    #[test]
    fn test_render_sorted_by_key() {
        let selector = LabelSelector::from_labels([("tier", "backend"), ("app", "web")]);
        assert_eq!(selector.to_string(), "app=web,tier=backend");
    }

    #[test]
    fn test_render_expressions() {
        let selector = LabelSelector::new()
            .with_label("app", "web")
            .with_expression(LabelSelectorRequirement::new(
                "env",
                SelectorOperator::In,
                vec!["prod".into(), "canary".into()],
            ))
            .with_expression(LabelSelectorRequirement::new("legacy", SelectorOperator::DoesNotExist, vec![]))
            .with_expression(LabelSelectorRequirement::new("zone", SelectorOperator::Exists, vec![]));
        assert_eq!(selector.to_string(), "app=web,env in (canary,prod),!legacy,zone");
    }

    #[test]
    fn test_render_single_value_expressions_keep_set_form() {
        let selector = LabelSelector::new()
            .with_expression(LabelSelectorRequirement::new("app", SelectorOperator::In, vec!["web".into()]))
            .with_expression(LabelSelectorRequirement::new(
                "track",
                SelectorOperator::NotIn,
                vec!["debug".into()],
            ));
        assert_eq!(selector.to_string(), "app in (web),track notin (debug)");
    }

    #[test]
    fn test_render_label_before_expression_on_same_key() {
        let selector = LabelSelector::new()
            .with_expression(LabelSelectorRequirement::new("app", SelectorOperator::Exists, vec![]))
            .with_label("app", "web");
        assert_eq!(selector.to_string(), "app=web,app");
    }

    #[test]
    fn test_matches_labels_and_expressions() {
        let selector = LabelSelector::new()
            .with_label("app", "web")
            .with_expression(LabelSelectorRequirement::new(
                "env",
                SelectorOperator::NotIn,
                vec!["dev".into()],
            ));

        assert!(selector.matches(&labels(&[("app", "web"), ("env", "prod")])));
        assert!(selector.matches(&labels(&[("app", "web")])));
        assert!(!selector.matches(&labels(&[("app", "web"), ("env", "dev")])));
        assert!(!selector.matches(&labels(&[("app", "api")])));
    }

    #[test]
    fn test_exists_and_does_not_exist() {
        let exists = LabelSelectorRequirement::new("zone", SelectorOperator::Exists, vec![]);
        let absent = LabelSelectorRequirement::new("zone", SelectorOperator::DoesNotExist, vec![]);
        let with_zone = labels(&[("zone", "a")]);
        let without = labels(&[]);

        assert!(exists.matches(&with_zone));
        assert!(!exists.matches(&without));
        assert!(!absent.matches(&with_zone));
        assert!(absent.matches(&without));
    }
}
