//! Request handlers.

pub mod debian;
pub mod docker;
pub mod helm;

use axum::body::Body;
use axum::http::header::HeaderMap;
use axum::response::Response;
use futures::StreamExt;
use larder_upstream::is_dropped_header;

/// Relay an upstream response downstream: status and end-to-end headers
/// are copied, the body is streamed without buffering.
pub(crate) fn proxy_response(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let mut headers = HeaderMap::new();
    for (name, value) in upstream.headers() {
        if !is_dropped_header(name.as_str()) {
            headers.append(name.clone(), value.clone());
        }
    }

    let stream = upstream
        .bytes_stream()
        .map(|chunk| chunk.map_err(std::io::Error::other));
    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
