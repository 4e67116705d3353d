use std::sync::LazyLock;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{HeaderValue, Request};
use axum::response::Response;
use regex::Regex;
use tower::{Layer, Service};
use uuid::Uuid;

pub const TRACEPARENT_HEADER: &str = "traceparent";
pub const TRACESTATE_HEADER: &str = "tracestate";

static TRACEPARENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^00-([0-9a-f]{32})-([0-9a-f]{16})-([0-9a-f]{2})$").expect("traceparent regex")
});

const ZERO_TRACE_ID: &str = "00000000000000000000000000000000";
const ZERO_SPAN_ID: &str = "0000000000000000";

/// W3C Trace Context propagation.
///
/// A valid incoming `traceparent` is continued with a fresh span id; an
/// invalid or missing one (wrong version, bad charset, all-zero ids) starts
/// a new trace. The rewritten header is placed back on the request so the
/// proxy forwards the child context, and the response always carries the
/// `traceparent` that was used. `tracestate` passes through untouched.
#[derive(Clone, Default)]
pub struct TraceContextLayer;

impl TraceContextLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for TraceContextLayer {
    type Service = TraceContextMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TraceContextMiddleware { inner }
    }
}

#[derive(Clone)]
pub struct TraceContextMiddleware<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for TraceContextMiddleware<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let incoming = req
            .headers()
            .get(TRACEPARENT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_traceparent);

        let (trace_id, flags) = match incoming {
            Some((trace_id, _span_id, flags)) => (trace_id, flags),
            None => (generate_trace_id(), "01".to_owned()),
        };
        let span_id = generate_span_id();
        let traceparent = format!("00-{trace_id}-{span_id}-{flags}");

        if let Ok(value) = HeaderValue::from_str(&traceparent) {
            req.headers_mut().insert(TRACEPARENT_HEADER, value);
        }
        let tracestate = req.headers().get(TRACESTATE_HEADER).cloned();

        let mut inner = self.inner.clone();
        Box::pin(async move {
            let mut response = inner.call(req).await?;
            if let Ok(value) = HeaderValue::from_str(&traceparent) {
                response.headers_mut().insert(TRACEPARENT_HEADER, value);
            }
            if let Some(state) = tracestate {
                response.headers_mut().insert(TRACESTATE_HEADER, state);
            }
            Ok(response)
        })
    }
}

/// Parse a `traceparent` value; `None` for anything W3C Trace Context says
/// to discard.
fn parse_traceparent(value: &str) -> Option<(String, String, String)> {
    let captures = TRACEPARENT_RE.captures(value)?;
    let trace_id = captures.get(1)?.as_str();
    let span_id = captures.get(2)?.as_str();
    let flags = captures.get(3)?.as_str();

    if trace_id == ZERO_TRACE_ID || span_id == ZERO_SPAN_ID {
        return None;
    }
    Some((trace_id.to_owned(), span_id.to_owned(), flags.to_owned()))
}

fn generate_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn generate_span_id() -> String {
    Uuid::new_v4().simple().to_string()[..16].to_owned()
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::routing::get;
    use tower::ServiceExt;

    use super::*;

    fn app() -> Router {
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(TraceContextLayer::new())
    }

    async fn traceparent_for(header: Option<&str>) -> String {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header(TRACEPARENT_HEADER, value);
        }
        let response = app()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        response
            .headers()
            .get(TRACEPARENT_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_owned()
    }

    #[tokio::test]
    async fn response_always_carries_traceparent() {
        let value = traceparent_for(None).await;
        assert!(TRACEPARENT_RE.is_match(&value), "got {value}");
    }

    #[tokio::test]
    async fn valid_trace_is_continued_with_new_span() {
        let incoming = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";
        let value = traceparent_for(Some(incoming)).await;

        let captures = TRACEPARENT_RE.captures(&value).unwrap();
        assert_eq!(
            captures.get(1).unwrap().as_str(),
            "4bf92f3577b34da6a3ce929d0e0e4736",
            "trace id must be preserved"
        );
        assert_ne!(
            captures.get(2).unwrap().as_str(),
            "00f067aa0ba902b7",
            "span id must be regenerated"
        );
        assert_eq!(captures.get(3).unwrap().as_str(), "01");
    }

    #[tokio::test]
    async fn zero_trace_id_starts_a_fresh_trace() {
        let incoming = format!("00-{ZERO_TRACE_ID}-00f067aa0ba902b7-01");
        let value = traceparent_for(Some(&incoming)).await;
        let captures = TRACEPARENT_RE.captures(&value).unwrap();
        assert_ne!(captures.get(1).unwrap().as_str(), ZERO_TRACE_ID);
    }

    #[tokio::test]
    async fn zero_span_id_starts_a_fresh_trace() {
        let incoming = format!("00-4bf92f3577b34da6a3ce929d0e0e4736-{ZERO_SPAN_ID}-01");
        let value = traceparent_for(Some(&incoming)).await;
        let captures = TRACEPARENT_RE.captures(&value).unwrap();
        assert_ne!(
            captures.get(1).unwrap().as_str(),
            "4bf92f3577b34da6a3ce929d0e0e4736"
        );
    }

    #[tokio::test]
    async fn malformed_values_start_a_fresh_trace() {
        for bad in [
            "01-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            "00-SHORT-00f067aa0ba902b7-01",
            "00-4BF92F3577B34DA6A3CE929D0E0E4736-00f067aa0ba902b7-01",
            "garbage",
        ] {
            let value = traceparent_for(Some(bad)).await;
            assert!(TRACEPARENT_RE.is_match(&value), "got {value} for {bad}");
        }
    }

    #[tokio::test]
    async fn tracestate_passes_through() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header(TRACESTATE_HEADER, "vendor=opaque")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers().get(TRACESTATE_HEADER).unwrap(),
            "vendor=opaque"
        );
    }
}
