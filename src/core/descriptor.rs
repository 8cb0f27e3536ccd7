//! Application descriptors and route matching
//!
//! A descriptor is registered once and never mutated. Route matching is a
//! closed set of variants so matching and sub-route extraction stay exhaustive.

use std::{fmt, sync::Arc};

use regex::Regex;
use serde_json::{Map, Value};

use crate::utils::path::{join_path, normalize_route};

/// Free-form application metadata forwarded to the embedded side on mount.
pub type Meta = Map<String, Value>;

/// Predicate used by [`RouteMatch::Predicate`].
pub type RoutePredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// How a path is matched against an application.
#[derive(Clone)]
pub enum RouteMatch {
    /// Accepts the path itself and every path starting with it.
    Prefix(String),
    /// Accepts only the exact path.
    Exact(String),
    /// Accepts paths the regex finds a match in.
    Pattern(Regex),
    /// Delegates entirely to a caller-supplied predicate.
    Predicate(RoutePredicate),
}

impl RouteMatch {
    pub fn prefix(path: impl Into<String>) -> Self {
        RouteMatch::Prefix(path.into())
    }

    pub fn exact(path: impl Into<String>) -> Self {
        RouteMatch::Exact(path.into())
    }

    pub fn pattern(re: &str) -> Result<Self, regex::Error> {
        Regex::new(re).map(RouteMatch::Pattern)
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        RouteMatch::Predicate(Arc::new(f))
    }

    /// Whether `path` activates the application.
    pub fn matches(&self, path: &str) -> bool {
        match self {
            RouteMatch::Prefix(prefix) => path.starts_with(prefix.as_str()),
            RouteMatch::Exact(exact) => path == exact,
            RouteMatch::Pattern(re) => re.is_match(path),
            RouteMatch::Predicate(f) => f(path),
        }
    }

    /// The part of `path` the embedded application is responsible for.
    ///
    /// Patterns with at least one capture group forward the first group; patterns
    /// without groups forward the path with the matched span removed. Predicates
    /// forward the whole path.
    pub fn sub_route(&self, path: &str) -> String {
        match self {
            RouteMatch::Prefix(prefix) => {
                normalize_route(path.strip_prefix(prefix.as_str()).unwrap_or(path))
            }
            RouteMatch::Exact(_) => "/".to_string(),
            RouteMatch::Pattern(re) => {
                let Some(caps) = re.captures(path) else {
                    return normalize_route(path);
                };
                if re.captures_len() > 1 {
                    normalize_route(caps.get(1).map(|m| m.as_str()).unwrap_or_default())
                } else {
                    let span = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
                    let mut rest = String::with_capacity(path.len());
                    rest.push_str(&path[..span.start]);
                    rest.push_str(&path[span.end..]);
                    normalize_route(&rest)
                }
            }
            RouteMatch::Predicate(_) => path.to_string(),
        }
    }

    /// Maps a sub-route reported by the embedded side back into host path space.
    pub fn host_path(&self, sub_route: &str) -> String {
        match self {
            RouteMatch::Prefix(prefix) => join_path(prefix, sub_route),
            RouteMatch::Exact(exact) => exact.clone(),
            RouteMatch::Pattern(_) | RouteMatch::Predicate(_) => normalize_route(sub_route),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RouteMatch::Prefix(_) => "prefix",
            RouteMatch::Exact(_) => "exact",
            RouteMatch::Pattern(_) => "pattern",
            RouteMatch::Predicate(_) => "predicate",
        }
    }
}

impl fmt::Debug for RouteMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteMatch::Prefix(p) => f.debug_tuple("Prefix").field(p).finish(),
            RouteMatch::Exact(p) => f.debug_tuple("Exact").field(p).finish(),
            RouteMatch::Pattern(re) => f.debug_tuple("Pattern").field(&re.as_str()).finish(),
            RouteMatch::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Static description of one embedded application.
#[derive(Clone, Debug)]
pub struct AppDescriptor {
    pub name: String,
    pub url: String,
    pub route_match: RouteMatch,
    pub container: Option<String>,
    pub meta: Option<Meta>,
    pub cache: bool,
}

impl AppDescriptor {
    pub fn new(name: impl Into<String>, url: impl Into<String>, route_match: RouteMatch) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            route_match,
            container: None,
            meta: None,
            cache: false,
        }
    }

    pub fn with_container(mut self, selector: impl Into<String>) -> Self {
        self.container = Some(selector.into());
        self
    }

    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = Some(meta);
        self
    }

    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }
}
