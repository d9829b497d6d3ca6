// Request logging middleware
use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::Instrument;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Tag each request with an id, log method, URI, status and latency
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().simple().to_string();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let started = Instant::now();

    let short_id = &request_id[..8];
    let span = tracing::info_span!("request", id = %short_id);
    tracing::info!(parent: &span, "Request: {} {}", method, uri);

    let mut response = next.run(request).instrument(span.clone()).await;

    tracing::info!(
        parent: &span,
        "Response: {} {} -> {} ({} ms)",
        method,
        uri,
        response.status().as_u16(),
        started.elapsed().as_millis()
    );

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
