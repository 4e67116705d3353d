use std::collections::HashMap;

use portico_core::RouteEntry;
use portico_registry::Registry;

/// A resolved route together with any captured path parameters.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub entry: RouteEntry,
    pub params: HashMap<String, String>,
}

/// Resolve a request against the routing table.
///
/// An exact `(method, path)` hit always wins. Otherwise every entry with a
/// matching method is tried as a pattern; among overlapping patterns the
/// winner follows table iteration order, which is unspecified.
pub async fn match_route(registry: &Registry, method: &str, path: &str) -> Option<RouteMatch> {
    let routes = registry.all_routes().await;

    let exact_key = format!("{method}:{path}");
    if let Some(entry) = routes.get(&exact_key) {
        return Some(RouteMatch {
            entry: entry.clone(),
            params: HashMap::new(),
        });
    }

    for (key, entry) in &routes {
        let Some((route_method, pattern)) = key.split_once(':') else {
            continue;
        };
        if route_method != method {
            continue;
        }
        if let Some(params) = match_path_with_params(pattern, path) {
            return Some(RouteMatch {
                entry: entry.clone(),
                params,
            });
        }
    }

    None
}

/// Match a concrete path against a pattern, capturing `:name` and `{name}`
/// segments. A trailing `*` captures the rest of the path, slashes
/// included, under the `*` key.
pub(crate) fn match_path_with_params(
    pattern: &str,
    path: &str,
) -> Option<HashMap<String, String>> {
    let pattern_segments: Vec<&str> = pattern.trim_matches('/').split('/').collect();
    let path_segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    if pattern_segments.len() != path_segments.len() {
        // Only a trailing wildcard may absorb a length difference, and it
        // still needs every preceding segment present.
        match pattern_segments.last() {
            Some(&"*") if path_segments.len() >= pattern_segments.len() - 1 => {}
            _ => return None,
        }
    }

    let mut params = HashMap::new();

    for (i, pattern_seg) in pattern_segments.iter().enumerate() {
        if *pattern_seg == "*" {
            params.insert("*".to_owned(), path_segments[i..].join("/"));
            return Some(params);
        }

        if i >= path_segments.len() {
            return None;
        }
        let path_seg = path_segments[i];

        if let Some(name) = pattern_seg.strip_prefix(':') {
            params.insert(name.to_owned(), path_seg.to_owned());
            continue;
        }
        if pattern_seg.len() > 2 && pattern_seg.starts_with('{') && pattern_seg.ends_with('}') {
            let name = &pattern_seg[1..pattern_seg.len() - 1];
            params.insert(name.to_owned(), path_seg.to_owned());
            continue;
        }

        if *pattern_seg != path_seg {
            return None;
        }
    }

    Some(params)
}
