use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static DUPLICATE_SLASHES: Lazy<Regex> = Lazy::new(|| Regex::new(r"/{2,}").unwrap());

/// The address-bar view of a browsing context.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Always starts with `/`.
    pub pathname: String,
    /// Empty or starts with `?`.
    pub search: String,
    /// Empty or starts with `#`.
    pub hash: String,
}

impl Location {
    /// Parses a same-origin url (`/a/b?x=1#frag`). Scheme and authority are dropped.
    pub fn parse(url: &str) -> Self {
        let rest = match url.find("://") {
            Some(idx) => {
                let after = &url[idx + 3..];
                match after.find(['/', '?', '#']) {
                    Some(pos) => &after[pos..],
                    None => "",
                }
            }
            None => url,
        };

        let (rest, hash) = match rest.find('#') {
            Some(pos) => (&rest[..pos], rest[pos..].to_string()),
            None => (rest, String::new()),
        };
        let (pathname, search) = match rest.find('?') {
            Some(pos) => (&rest[..pos], rest[pos..].to_string()),
            None => (rest, String::new()),
        };

        let pathname = if pathname.is_empty() {
            "/".to_string()
        } else if pathname.starts_with('/') {
            pathname.to_string()
        } else {
            format!("/{pathname}")
        };

        Self {
            pathname,
            search,
            hash,
        }
    }

    /// `pathname + search`
    pub fn path_and_query(&self) -> String {
        format!("{}{}", self.pathname, self.search)
    }

    /// `pathname + search + hash`
    pub fn full(&self) -> String {
        format!("{}{}{}", self.pathname, self.search, self.hash)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full())
    }
}

/// Removes the `#fragment` part of a route.
pub fn strip_fragment(route: &str) -> &str {
    match route.find('#') {
        Some(pos) => &route[..pos],
        None => route,
    }
}

/// Normalizes an extracted sub-route: empty becomes `/`, and a leading `/` is enforced.
pub fn normalize_route(route: &str) -> String {
    if route.is_empty() {
        "/".to_string()
    } else if route.starts_with('/') {
        route.to_string()
    } else {
        format!("/{route}")
    }
}

/// Joins a host prefix with a sub-route, collapsing duplicate slashes.
pub fn join_path(prefix: &str, sub: &str) -> String {
    if sub.is_empty() || sub == "/" {
        return normalize_route(prefix);
    }
    let joined = if sub.starts_with('?') || sub.starts_with('#') {
        format!("{}{}", prefix.trim_end_matches('/'), sub)
    } else {
        format!("{prefix}/{sub}")
    };
    normalize_route(&DUPLICATE_SLASHES.replace_all(&joined, "/"))
}

/// Resolves `./x`, `../x` and bare `x` against `base`, treating `base` as a directory.
/// Absolute targets are returned unchanged.
pub fn resolve_relative(base: &str, target: &str) -> String {
    if target.starts_with('/') {
        return target.to_string();
    }

    // query and fragment of the target survive, the ones of the base don't
    let split_at = target.find(['?', '#']).unwrap_or(target.len());
    let (target_path, suffix) = target.split_at(split_at);

    let base_path = Location::parse(base).pathname;
    let mut segments: Vec<&str> = base_path.split('/').filter(|s| !s.is_empty()).collect();

    for part in target_path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    format!("/{}{}", segments.join("/"), suffix)
}
