//! Endpoint router — parameterized URL matching
//!
//! Every endpoint registers URL patterns per HTTP method in two groups:
//! routes served without authentication and routes behind the auth gate.
//!
//! Matching rules:
//! - segment counts must be equal, literals compare exactly, a `{name}`
//!   placeholder binds one non-empty segment
//! - the most specific pattern wins: longest literal prefix first, then the
//!   most literal segments
//! - ties go to the first registered pattern (endpoint order, then
//!   unauthenticated before authenticated, then pattern order)

mod pattern;
mod rewrite;

pub use pattern::{split_path, Segment, UrlPattern};
pub use rewrite::{Rewrite, RewriteTable};

use crate::config::EndpointConfig;
use crate::error::{GatewayError, Result};
use crate::service::LoadBalancer;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Which route group of an endpoint matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteGroup {
    Unauthenticated,
    Authenticated,
}

impl RouteGroup {
    pub fn requires_auth(&self) -> bool {
        matches!(self, Self::Authenticated)
    }
}

/// An endpoint compiled for request dispatch
#[derive(Debug)]
pub struct CompiledEndpoint {
    pub config: EndpointConfig,
    pub balancer: LoadBalancer,
    pub rewrites: RewriteTable,
}

impl CompiledEndpoint {
    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// Path to request from the origin
    pub fn rewrite_path(&self, method: &str, path: &str) -> Option<String> {
        self.rewrites.rewrite(method, path)
    }
}

/// A successful match
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub endpoint: Arc<CompiledEndpoint>,
    pub group: RouteGroup,
    /// Pattern that matched, as configured
    pub pattern: String,
    /// Bound placeholder values
    pub params: HashMap<String, String>,
}

/// Result of routing a request
#[derive(Debug, Clone)]
pub enum MatchOutcome {
    Matched(RouteMatch),
    /// No pattern matches the path under any method
    NotFound,
    /// The path matches, but not under the request's method
    MethodNotAllowed,
}

struct CompiledRoute {
    endpoint: usize,
    group: RouteGroup,
    pattern: UrlPattern,
}

/// Router table. Immutable once built, replaced whole on reconfiguration.
pub struct RouterTable {
    endpoints: Vec<Arc<CompiledEndpoint>>,
    /// Upper-cased method -> routes in registration order
    routes: HashMap<String, Vec<CompiledRoute>>,
}

impl RouterTable {
    /// Compile endpoints, preserving their order for tie-breaking
    pub fn from_config(endpoints: &[EndpointConfig]) -> Result<Self> {
        let mut compiled = Vec::with_capacity(endpoints.len());
        let mut routes: HashMap<String, Vec<CompiledRoute>> = HashMap::new();

        for (idx, config) in endpoints.iter().enumerate() {
            if compiled
                .iter()
                .any(|e: &Arc<CompiledEndpoint>| e.id() == config.id)
            {
                return Err(GatewayError::Config(format!(
                    "Duplicate endpoint id '{}'",
                    config.id
                )));
            }

            for (group, routes_cfg) in [
                (RouteGroup::Unauthenticated, &config.unauthenticated),
                (RouteGroup::Authenticated, &config.authenticated),
            ] {
                for (method, patterns) in routes_cfg.normalized() {
                    for raw in patterns {
                        let pattern = UrlPattern::parse(&raw).map_err(|e| {
                            GatewayError::Config(format!("Endpoint '{}': {}", config.id, e))
                        })?;
                        routes.entry(method.clone()).or_default().push(CompiledRoute {
                            endpoint: idx,
                            group,
                            pattern,
                        });
                    }
                }
            }

            let rewrites = RewriteTable::compile(&config.rewrites).map_err(|e| {
                GatewayError::Config(format!("Endpoint '{}': {}", config.id, e))
            })?;

            compiled.push(Arc::new(CompiledEndpoint {
                balancer: LoadBalancer::new(
                    config.id.clone(),
                    config.load_balancing,
                    config.origins.clone(),
                ),
                rewrites,
                config: config.clone(),
            }));
        }

        // Registration order: endpoint, then group, then declaration order.
        // The sort is stable, so pattern order within a group is kept.
        for list in routes.values_mut() {
            list.sort_by_key(|r| (r.endpoint, r.group == RouteGroup::Authenticated));
        }

        Ok(Self {
            endpoints: compiled,
            routes,
        })
    }

    /// Route a request by method and path
    pub fn match_request(&self, method: &str, path: &str) -> MatchOutcome {
        let method = method.to_ascii_uppercase();
        let segments = split_path(path);

        if let Some(routes) = self.routes.get(&method) {
            let mut best: Option<(&CompiledRoute, HashMap<String, String>)> = None;
            for route in routes {
                let Some(params) = route.pattern.matches(&segments) else {
                    continue;
                };
                let better = match &best {
                    Some((current, _)) => {
                        route.pattern.specificity() > current.pattern.specificity()
                    }
                    None => true,
                };
                if better {
                    best = Some((route, params));
                }
            }

            if let Some((route, params)) = best {
                return MatchOutcome::Matched(RouteMatch {
                    endpoint: self.endpoints[route.endpoint].clone(),
                    group: route.group,
                    pattern: route.pattern.as_str().to_string(),
                    params,
                });
            }
        }

        let other_method_matches = self
            .routes
            .iter()
            .filter(|(m, _)| **m != method)
            .flat_map(|(_, routes)| routes.iter())
            .any(|r| r.pattern.matches(&segments).is_some());

        if other_method_matches {
            MatchOutcome::MethodNotAllowed
        } else {
            MatchOutcome::NotFound
        }
    }

    pub fn endpoint(&self, id: &str) -> Option<Arc<CompiledEndpoint>> {
        self.endpoints.iter().find(|e| e.id() == id).cloned()
    }

    pub fn endpoints(&self) -> &[Arc<CompiledEndpoint>] {
        &self.endpoints
    }

    /// Number of compiled endpoints
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Total number of registered patterns
    pub fn route_count(&self) -> usize {
        self.routes.values().map(|r| r.len()).sum()
    }
}

impl Default for RouterTable {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            routes: HashMap::new(),
        }
    }
}
