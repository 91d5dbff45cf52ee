//! URL rewriting — maps a matched request path onto an origin path

use super::pattern::UrlPattern;
use crate::config::RewriteRule;
use std::collections::HashMap;

/// A compiled rewrite rule
#[derive(Debug, Clone)]
pub struct Rewrite {
    pattern: UrlPattern,
    target: String,
}

impl Rewrite {
    /// Compile a rule, checking that the target only references bound names
    pub fn compile(rule: &RewriteRule) -> Result<Self, String> {
        let pattern = UrlPattern::parse(&rule.pattern)?;
        if !rule.target.starts_with('/') {
            return Err(format!(
                "Rewrite target must start with '/': {}",
                rule.target
            ));
        }
        for name in placeholders(&rule.target)? {
            if !pattern.param_names().any(|p| p == name) {
                return Err(format!(
                    "Rewrite target '{}' references '{{{}}}' which '{}' does not bind",
                    rule.target, name, rule.pattern
                ));
            }
        }
        Ok(Self {
            pattern,
            target: rule.target.clone(),
        })
    }

    /// Rewrite `path` if it matches this rule's pattern
    pub fn apply(&self, path: &str) -> Option<String> {
        let params = self.pattern.matches_path(path)?;
        Some(substitute(&self.target, &params))
    }
}

/// Ordered rewrite rules per upper-cased method
#[derive(Debug, Clone, Default)]
pub struct RewriteTable {
    rules: HashMap<String, Vec<Rewrite>>,
}

impl RewriteTable {
    pub fn compile(rules: &HashMap<String, Vec<RewriteRule>>) -> Result<Self, String> {
        let mut compiled: HashMap<String, Vec<Rewrite>> = HashMap::new();
        let mut methods: Vec<&String> = rules.keys().collect();
        methods.sort();
        for method in methods {
            let entry = compiled.entry(method.to_ascii_uppercase()).or_default();
            for rule in &rules[method] {
                entry.push(Rewrite::compile(rule)?);
            }
        }
        Ok(Self { rules: compiled })
    }

    /// First matching rewrite for the method, if any
    pub fn rewrite(&self, method: &str, path: &str) -> Option<String> {
        self.rules
            .get(&method.to_ascii_uppercase())?
            .iter()
            .find_map(|r| r.apply(path))
    }

    pub fn is_empty(&self) -> bool {
        self.rules.values().all(|r| r.is_empty())
    }
}

fn placeholders(target: &str) -> Result<Vec<&str>, String> {
    let mut names = Vec::new();
    let mut rest = target;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        let end = after
            .find('}')
            .ok_or_else(|| format!("Unclosed placeholder in rewrite target: {}", target))?;
        let name = &after[..end];
        if name.is_empty() {
            return Err(format!("Empty placeholder in rewrite target: {}", target));
        }
        names.push(name);
        rest = &after[end + 1..];
    }
    Ok(names)
}

fn substitute(target: &str, params: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(target.len());
    let mut rest = target;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match params.get(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
