use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use portico_core::{CollisionKind, Route, RouteCollision, RouteEntry};

static PARAM_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":[^/]+|\{[^}]+\}").expect("param segment regex"));

/// Replace every `:name` or `{name}` segment with `*` so patterns can be
/// compared structurally.
pub(crate) fn normalize_path(path: &str) -> String {
    PARAM_SEGMENT.replace_all(path, "*").into_owned()
}

/// Two normalised paths overlap iff they have the same segment count and
/// every position is either literal-equal or a wildcard on at least one
/// side.
pub(crate) fn paths_overlap(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }

    let seg_a: Vec<&str> = a.trim_matches('/').split('/').collect();
    let seg_b: Vec<&str> = b.trim_matches('/').split('/').collect();

    if seg_a.len() != seg_b.len() {
        return false;
    }

    seg_a
        .iter()
        .zip(&seg_b)
        .all(|(sa, sb)| *sa == "*" || *sb == "*" || sa == sb)
}

/// Compute the collisions an incoming route set would cause against the
/// installed routing table. Same-service overwrites never collide, which
/// lets a service re-register after a crash.
pub(crate) fn collisions_for(
    routes: &HashMap<String, RouteEntry>,
    service_name: &str,
    base_path: &str,
    incoming: &[Route],
    strict_pattern_matching: bool,
) -> Vec<RouteCollision> {
    let mut collisions = Vec::new();

    for route in incoming {
        let full_path = route.full_path(base_path);

        if let Some(collision) = exact_collision(routes, service_name, &route.method, &full_path) {
            collisions.push(collision);
            // An exact hit already rejects this route; the pattern scan
            // would only duplicate it.
            continue;
        }

        if strict_pattern_matching {
            collisions.extend(pattern_collisions(
                routes,
                service_name,
                &route.method,
                &full_path,
            ));
        }
    }

    collisions
}

fn exact_collision(
    routes: &HashMap<String, RouteEntry>,
    service_name: &str,
    method: &str,
    path: &str,
) -> Option<RouteCollision> {
    let key = format!("{method}:{path}");
    let entry = routes.get(&key)?;
    if entry.service_name == service_name {
        return None;
    }
    Some(RouteCollision {
        method: method.to_owned(),
        path: path.to_owned(),
        kind: CollisionKind::Exact,
        registered_by: entry.service_name.clone(),
        registered_at: entry.registered_at,
    })
}

fn pattern_collisions(
    routes: &HashMap<String, RouteEntry>,
    service_name: &str,
    method: &str,
    path: &str,
) -> Vec<RouteCollision> {
    let normalized_new = normalize_path(path);
    let mut collisions = Vec::new();

    for (key, entry) in routes {
        if entry.service_name == service_name {
            continue;
        }

        let Some((existing_method, existing_path)) = key.split_once(':') else {
            continue;
        };
        if existing_method != method {
            continue;
        }

        if paths_overlap(&normalized_new, &normalize_path(existing_path)) {
            collisions.push(RouteCollision {
                method: method.to_owned(),
                path: path.to_owned(),
                kind: CollisionKind::Pattern,
                registered_by: entry.service_name.clone(),
                registered_at: entry.registered_at,
            });
        }
    }

    collisions
}
