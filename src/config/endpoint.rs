//! Endpoint configuration — externally visible routes bound to origins

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Load balancing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadBalancingMode {
    /// Rotate through origins in configuration order
    #[default]
    RoundRobin,
    /// Pick a random eligible origin
    Random,
}

impl std::str::FromStr for LoadBalancingMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "round-robin" => Ok(Self::RoundRobin),
            "random" => Ok(Self::Random),
            other => Err(format!("unknown load balancing mode: {}", other)),
        }
    }
}

impl std::fmt::Display for LoadBalancingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RoundRobin => write!(f, "round-robin"),
            Self::Random => write!(f, "random"),
        }
    }
}

/// Route group: HTTP method to ordered URL patterns
///
/// Method keys are normalized to upper case on insertion and when the
/// router table is compiled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiEndpointGroup(pub HashMap<String, Vec<String>>);

impl ApiEndpointGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pattern under a method (builder style)
    pub fn with(mut self, method: &str, pattern: &str) -> Self {
        self.add(method, pattern);
        self
    }

    /// Register a pattern under a method
    pub fn add(&mut self, method: &str, pattern: &str) {
        self.0
            .entry(method.to_ascii_uppercase())
            .or_default()
            .push(pattern.to_string());
    }

    /// Patterns per upper-cased method, in declaration order.
    ///
    /// Keys that differ only in case are merged in ascending key order.
    pub fn normalized(&self) -> Vec<(String, Vec<String>)> {
        let mut keys: Vec<&String> = self.0.keys().collect();
        keys.sort();
        let mut merged: Vec<(String, Vec<String>)> = Vec::new();
        for key in keys {
            let upper = key.to_ascii_uppercase();
            let patterns = &self.0[key];
            match merged.iter_mut().find(|(m, _)| *m == upper) {
                Some((_, existing)) => existing.extend(patterns.iter().cloned()),
                None => merged.push((upper, patterns.clone())),
            }
        }
        merged
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(|p| p.is_empty())
    }
}

/// Path rewrite rule. Requests matching `pattern` are forwarded to `target`.
///
/// Placeholders bound by `pattern` may be referenced in `target`,
/// e.g. `/{version}/users/{id}` -> `/api/users/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewriteRule {
    pub pattern: String,
    pub target: String,
}

/// Endpoint configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Unique identifier
    pub id: String,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Record GUID (storage identity)
    #[serde(default = "Uuid::new_v4")]
    pub guid: Uuid,

    /// Load balancing mode
    #[serde(default)]
    pub load_balancing: LoadBalancingMode,

    /// Origin identifiers in rotation order
    #[serde(default)]
    pub origins: Vec<String>,

    /// Routes served without authentication
    #[serde(default)]
    pub unauthenticated: ApiEndpointGroup,

    /// Routes that pass through the auth gate
    #[serde(default)]
    pub authenticated: ApiEndpointGroup,

    /// Method -> rewrite rules, first match wins
    #[serde(default)]
    pub rewrites: HashMap<String, Vec<RewriteRule>>,

    /// Per-request deadline override in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Request body limit override in bytes
    #[serde(default)]
    pub max_request_body_bytes: Option<usize>,

    /// Additional request headers never forwarded to origins
    #[serde(default)]
    pub blocked_headers: Vec<String>,
}

impl EndpointConfig {
    /// Create an endpoint with no routes
    pub fn new(id: impl Into<String>, origins: Vec<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            guid: Uuid::new_v4(),
            load_balancing: LoadBalancingMode::default(),
            origins,
            unauthenticated: ApiEndpointGroup::new(),
            authenticated: ApiEndpointGroup::new(),
            rewrites: HashMap::new(),
            timeout_ms: None,
            max_request_body_bytes: None,
            blocked_headers: Vec::new(),
        }
    }

    /// Number of distinct origin identifiers
    pub fn distinct_origin_count(&self) -> usize {
        let mut ids: Vec<&String> = self.origins.iter().collect();
        ids.sort();
        ids.dedup();
        ids.len()
    }
}
