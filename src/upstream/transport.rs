//! A single HTTP round trip to one upstream host (§4.2).
//!
//! Grounded on `examples/original_source/httpservice.go`'s `HttpService.Serve`:
//! rewrite scheme/Host/authority only if they differ from the target, reset
//! the request body, perform the round trip, shallow-copy the response, and
//! optionally cache the response body. A materialization failure is logged,
//! not propagated as an attempt error — the response headers already
//! succeeded.

use crate::body::ReplayableBody;
use bytes::Bytes;
use http::header::{HOST, CONTENT_LENGTH};
use http::uri::{Authority, Scheme, Uri};
use http::{Request, Response};
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::fmt;

#[derive(Debug)]
pub enum TransportError {
    /// The round trip itself failed (connect refused, reset, etc).
    Connect(hyper_util::client::legacy::Error),
    /// The per-attempt timeout elapsed.
    Timeout,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Connect(e) => write!(f, "connect error: {e}"),
            TransportError::Timeout => write!(f, "attempt timed out"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Connect(e) => Some(e),
            TransportError::Timeout => None,
        }
    }
}

/// A response body that may or may not have been buffered, depending on the
/// cluster's `cache_response_body` setting.
pub enum UpstreamBody {
    Buffered(ReplayableBody),
    Streaming(Incoming),
}

pub fn build_client() -> Client<HttpConnector, ReplayableBody> {
    let mut connector = HttpConnector::new();
    connector.set_nodelay(true);
    connector.enforce_http(true);
    Client::builder(TokioExecutor::new()).build(connector)
}

pub struct UpstreamTransport {
    client: Client<HttpConnector, ReplayableBody>,
    cache_response_body: bool,
}

impl UpstreamTransport {
    pub fn new(client: Client<HttpConnector, ReplayableBody>, cache_response_body: bool) -> Self {
        Self { client, cache_response_body }
    }

    /// Performs one round trip against `target_host_port` (plain
    /// `host:port`, no scheme — this crate only speaks plaintext HTTP/1.x
    /// both inbound and outbound per §6). Rewrites `req`'s authority and
    /// `Host` header in place only if they differ from the target, matching
    /// the Go original's `if httpReq.URL.Host != h.HostPort`.
    pub async fn serve(
        &self,
        req: &mut Request<ReplayableBody>,
        target_host_port: &str,
    ) -> Result<Response<UpstreamBody>, TransportError> {
        let current_authority = req.uri().authority().map(|a| a.as_str());
        if current_authority != Some(target_host_port) {
            rewrite_authority(req, target_host_port);
        }
        req.body().reset();

        let owned = clone_for_send(req);

        let response = self
            .client
            .request(owned)
            .await
            .map_err(TransportError::Connect)?;

        let (parts, incoming) = response.into_parts();
        let body = if self.cache_response_body {
            match ReplayableBody::drain(incoming).await {
                Ok(buffered) => UpstreamBody::Buffered(buffered),
                Err(e) => {
                    tracing::warn!("transport: failed to materialize response body, error={e}");
                    UpstreamBody::Buffered(ReplayableBody::empty())
                }
            }
        } else {
            UpstreamBody::Streaming(incoming)
        };

        Ok(Response::from_parts(parts, body))
    }
}

fn rewrite_authority(req: &mut Request<ReplayableBody>, target_host_port: &str) {
    let authority: Authority = match target_host_port.parse() {
        Ok(a) => a,
        Err(_) => return,
    };
    let mut parts = req.uri().clone().into_parts();
    parts.scheme = Some(Scheme::HTTP);
    parts.authority = Some(authority);
    if let Ok(new_uri) = Uri::from_parts(parts) {
        *req.uri_mut() = new_uri;
    }
    if let Ok(value) = http::HeaderValue::from_str(target_host_port) {
        req.headers_mut().insert(HOST, value);
    }
}

fn clone_for_send(req: &Request<ReplayableBody>) -> Request<ReplayableBody> {
    let mut builder = Request::builder()
        .method(req.method().clone())
        .uri(req.uri().clone())
        .version(req.version());
    for (name, value) in req.headers() {
        builder = builder.header(name.clone(), value.clone());
    }
    builder
        .body(req.body().clone())
        .expect("cloning a well-formed request cannot fail")
}

pub fn response_size(resp: &Response<UpstreamBody>) -> Option<u64> {
    match resp.body() {
        UpstreamBody::Buffered(b) => Some(b.len() as u64),
        UpstreamBody::Streaming(_) => resp
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_authority_changes_scheme_host_and_authority() {
        let mut req = Request::builder()
            .uri("/v1/foo")
            .header(HOST, "original:1")
            .body(ReplayableBody::empty())
            .unwrap();
        rewrite_authority(&mut req, "10.0.0.5:8080");
        assert_eq!(req.uri().authority().unwrap().as_str(), "10.0.0.5:8080");
        assert_eq!(req.uri().scheme_str(), Some("http"));
        assert_eq!(req.headers().get(HOST).unwrap(), "10.0.0.5:8080");
        assert_eq!(req.uri().path(), "/v1/foo");
    }

    #[test]
    fn response_size_prefers_buffered_length_over_header() {
        let resp = Response::builder()
            .header(CONTENT_LENGTH, "999")
            .body(UpstreamBody::Buffered(ReplayableBody::from_bytes(Bytes::from_static(b"abc"))))
            .unwrap();
        assert_eq!(response_size(&resp), Some(3));
    }
}
