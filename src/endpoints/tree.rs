// Endpoint tree and path templates

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ClientError, Result};

// Path parameters left in a template after substitution
static PLACEHOLDER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(:[A-Za-z_]\w*|\{[A-Za-z_]\w*\})").unwrap());

/// A leaf URL or a nested group
///
/// Anything else (numbers, arrays, null) fails to deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EndpointNode {
    Url(String),
    Group(EndpointTree),
}

/// Logical name → URL mapping, nested to any depth
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointTree(BTreeMap<String, EndpointNode>);

impl EndpointTree {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with_url(mut self, key: &str, url: &str) -> Self {
        self.0
            .insert(key.to_string(), EndpointNode::Url(url.to_string()));
        self
    }

    pub fn with_group(mut self, key: &str, group: EndpointTree) -> Self {
        self.0.insert(key.to_string(), EndpointNode::Group(group));
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, node: EndpointNode) {
        self.0.insert(key.into(), node);
    }

    pub fn get(&self, key: &str) -> Option<&EndpointNode> {
        self.0.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Shallow merge: each top-level key of `other` replaces the whole entry
    pub fn overlay(&self, other: &EndpointTree) -> EndpointTree {
        let mut merged = self.clone();
        for (key, node) in &other.0 {
            merged.0.insert(key.clone(), node.clone());
        }
        merged
    }

    /// Walk a dot-separated path
    pub fn lookup(&self, path: &str) -> Option<&EndpointNode> {
        let mut segments = path.split('.');
        let mut node = self.0.get(segments.next()?)?;
        for segment in segments {
            match node {
                EndpointNode::Group(group) => node = group.0.get(segment)?,
                EndpointNode::Url(_) => return None,
            }
        }
        Some(node)
    }

    /// URL at `path`; groups and missing paths are `NotFound`
    pub fn resolve(&self, path: &str) -> Result<&str> {
        match self.lookup(path) {
            Some(EndpointNode::Url(url)) => Ok(url.as_str()),
            _ => Err(ClientError::NotFound(path.to_string())),
        }
    }

    /// Whether `path` names a URL
    pub fn has(&self, path: &str) -> bool {
        matches!(self.lookup(path), Some(EndpointNode::Url(_)))
    }

    /// Every URL with its dotted path, in key order
    pub fn flatten(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        self.flatten_into("", &mut out);
        out
    }

    fn flatten_into(&self, prefix: &str, out: &mut Vec<(String, String)>) {
        for (key, node) in &self.0 {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", prefix, key)
            };
            match node {
                EndpointNode::Url(url) => out.push((path, url.clone())),
                EndpointNode::Group(group) => group.flatten_into(&path, out),
            }
        }
    }
}

/// Substitute `:name` and `{name}` in a URL template
///
/// Only the first occurrence of each form is replaced. Values are inserted
/// verbatim.
pub fn fill_template<I, K, V>(template: &str, params: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut url = template.to_string();
    for (key, value) in params {
        let (key, value) = (key.as_ref(), value.as_ref());
        url = url.replacen(&format!(":{}", key), value, 1);
        url = url.replacen(&format!("{{{}}}", key), value, 1);
    }

    let leftover = placeholders(&url);
    if !leftover.is_empty() {
        tracing::debug!(url = %url, missing = ?leftover, "Unfilled path parameters");
    }

    url
}

/// Path parameters still present in `url`
pub fn placeholders(url: &str) -> Vec<String> {
    PLACEHOLDER_PATTERN
        .captures_iter(url)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}
