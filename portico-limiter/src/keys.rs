//! Bucket key derivation for rate limiting.
//!
//! Authenticated callers are counted per user id, anonymous callers per
//! client IP. Routes carrying their own limit get a dedicated bucket so a
//! hot endpoint cannot drain the caller's global budget.

pub fn user_key(user_id: &str) -> String {
    format!("ratelimit:user:{user_id}")
}

pub fn ip_key(client_ip: &str) -> String {
    format!("ratelimit:ip:{client_ip}")
}

pub fn route_user_key(route: &str, user_id: &str) -> String {
    format!("ratelimit:route:{route}:user:{user_id}")
}

pub fn route_ip_key(route: &str, client_ip: &str) -> String {
    format!("ratelimit:route:{route}:ip:{client_ip}")
}
