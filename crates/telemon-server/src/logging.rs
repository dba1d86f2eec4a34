use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use std::time::{Duration, Instant};
use telemon_common::wire::http;

/// Per-request trace id, stored in request extensions.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl std::ops::Deref for TraceId {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

/// Short random id tying the request and response log lines together.
fn generate_trace_id() -> String {
    hex::encode(rand::random::<[u8; 8]>())
}

/// Request latency in the coarsest unit that keeps it readable.
fn format_elapsed(elapsed: Duration) -> String {
    match elapsed.as_micros() {
        us @ 0..=999 => format!("{us}µs"),
        us @ 1_000..=999_999 => format!("{}ms", us / 1_000),
        _ => format!("{:.1}s", elapsed.as_secs_f64()),
    }
}

/// Logs method, path, source and outcome of every request and echoes the
/// trace id in `X-Trace-Id`. Bodies are never logged: they may be
/// encrypted, signed or simply large.
pub async fn request_logging(mut req: Request, next: Next) -> Response {
    let trace_id = generate_trace_id();
    req.extensions_mut().insert(TraceId(trace_id.clone()));

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let real_ip = req
        .headers()
        .get(http::REAL_IP)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    tracing::info!(
        trace_id = %trace_id,
        method = %method,
        path = %path,
        real_ip = %real_ip,
        "--> request"
    );

    let start = Instant::now();
    let mut response = next.run(req).await;
    let elapsed = format_elapsed(start.elapsed());
    let status = response.status().as_u16();

    if response.status().is_server_error() {
        tracing::error!(trace_id = %trace_id, status, elapsed = %elapsed, "<-- response");
    } else if response.status().is_client_error() {
        tracing::warn!(trace_id = %trace_id, status, elapsed = %elapsed, "<-- response");
    } else {
        tracing::info!(trace_id = %trace_id, status, elapsed = %elapsed, "<-- response");
    }

    if let Ok(val) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(http::TRACE_ID, val);
    }
    response
}
