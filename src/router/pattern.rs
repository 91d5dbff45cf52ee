//! Parameterized URL patterns
//!
//! A pattern is a `/`-separated list of segments, each either a literal or
//! a single `{name}` placeholder:
//! ```text
//! /{version}/users/{id}
//! ```

use std::collections::HashMap;

/// One pattern segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Must equal the request segment exactly
    Literal(String),
    /// Binds any single non-empty request segment
    Param(String),
}

/// A compiled URL pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl UrlPattern {
    /// Parse a pattern string
    ///
    /// # Examples
    ///
    /// ```
    /// use portico_gateway::router::UrlPattern;
    ///
    /// let pattern = UrlPattern::parse("/{version}/users/{id}").unwrap();
    /// assert_eq!(pattern.literal_count(), 1);
    /// ```
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if !raw.starts_with('/') {
            return Err(format!("Pattern must start with '/': {}", raw));
        }

        let mut segments = Vec::new();
        for part in split_path(raw) {
            if part.is_empty() {
                return Err(format!("Pattern contains an empty segment: {}", raw));
            }
            if part.contains('{') || part.contains('}') {
                let name = part
                    .strip_prefix('{')
                    .and_then(|p| p.strip_suffix('}'))
                    .ok_or_else(|| {
                        format!(
                            "Placeholder must span a whole segment, got '{}' in {}",
                            part, raw
                        )
                    })?;
                if name.is_empty() || name.contains('{') || name.contains('}') {
                    return Err(format!("Invalid placeholder '{}' in {}", part, raw));
                }
                if segments
                    .iter()
                    .any(|s| matches!(s, Segment::Param(existing) if existing == name))
                {
                    return Err(format!("Duplicate placeholder '{}' in {}", name, raw));
                }
                segments.push(Segment::Param(name.to_string()));
            } else {
                segments.push(Segment::Literal(part.to_string()));
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// Match pre-split request segments, returning bound parameters
    pub fn matches(&self, path_segments: &[&str]) -> Option<HashMap<String, String>> {
        if path_segments.len() != self.segments.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (segment, actual) in self.segments.iter().zip(path_segments) {
            match segment {
                Segment::Literal(expected) => {
                    if expected != actual {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    if actual.is_empty() {
                        return None;
                    }
                    params.insert(name.clone(), (*actual).to_string());
                }
            }
        }
        Some(params)
    }

    /// Match a raw request path (query string ignored)
    pub fn matches_path(&self, path: &str) -> Option<HashMap<String, String>> {
        self.matches(&split_path(path))
    }

    /// Number of literal segments before the first placeholder
    pub fn literal_prefix_len(&self) -> usize {
        self.segments
            .iter()
            .take_while(|s| matches!(s, Segment::Literal(_)))
            .count()
    }

    /// Total number of literal segments
    pub fn literal_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count()
    }

    /// Ordering key: higher is more specific
    pub fn specificity(&self) -> (usize, usize) {
        (self.literal_prefix_len(), self.literal_count())
    }

    /// Placeholder names in order of appearance
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl std::fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Split a request path into segments.
///
/// The query string and a single trailing slash are ignored; `/` yields no
/// segments. Interior empty segments (`/a//b`) are kept so that they can
/// never bind a placeholder.
pub fn split_path(path: &str) -> Vec<&str> {
    let path = path.split(['?', '#']).next().unwrap_or("");
    let path = path.strip_prefix('/').unwrap_or(path);
    let path = path.strip_suffix('/').unwrap_or(path);
    if path.is_empty() {
        return Vec::new();
    }
    path.split('/').collect()
}
