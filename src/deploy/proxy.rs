//! Reverse proxy to the backend service.

use std::time::Duration;

use axum::{
    body::{Body, HttpBody},
    extract::Request,
    http::{HeaderMap, HeaderName, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use tracing::{debug, error};

use crate::errors::ProxyError;

/// Connection-scoped headers that must not be forwarded in either direction.
const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
}

/// Forwards requests to `http://localhost:<port>`, preserving method, path,
/// query, headers and body.
#[derive(Debug, Clone)]
pub struct BackendProxy {
    client: reqwest::Client,
    base_url: String,
}

impl BackendProxy {
    pub fn new(port: u16, timeout: Duration) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            base_url: format!("http://localhost:{}", port),
        })
    }

    pub async fn forward(&self, req: Request) -> Result<Response, ProxyError> {
        let (parts, body) = req.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = format!("{}{}", self.base_url, path_and_query);

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);

        debug!(method = %parts.method, url = %url, "proxying request");

        let mut upstream = self.client.request(parts.method, &url).headers(headers);
        if !body.is_end_stream() {
            upstream = upstream.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }
        let upstream = upstream.send().await?;

        let status = upstream.status();
        let mut response_headers = upstream.headers().clone();
        strip_hop_by_hop(&mut response_headers);

        let stream = upstream
            .bytes_stream()
            .map_err(|e| std::io::Error::other(e.to_string()));
        let mut response = Response::new(Body::from_stream(stream));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }

    /// Forward and turn any failure into a `502 Bad Gateway` carrying the
    /// reason.
    pub async fn forward_or_bad_gateway(&self, req: Request) -> Response {
        match self.forward(req).await {
            Ok(response) => response,
            Err(e) => {
                error!("Proxy error: {}", e);
                (StatusCode::BAD_GATEWAY, format!("Bad Gateway: {}", e)).into_response()
            }
        }
    }
}

/// Whether `path` falls under `prefix` on a segment boundary.
pub fn is_api_path(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
