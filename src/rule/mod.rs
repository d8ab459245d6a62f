//! Routing rules: predicate, request/response transforms, and the upstream
//! cluster a matching request is dispatched to (§4.6).
//!
//! Grounded on `examples/original_source/tfe.go`'s `Rule` interface and its
//! sole implementation, `PrefixRewriteRule` — carried over almost verbatim,
//! with `Service rpcx.Service` narrowed to `Option<Arc<Cluster>>` since this
//! crate has exactly one rule kind and exactly one upstream abstraction.

pub mod registry;

use crate::stats::HttpStatsReporter;
use crate::upstream::Cluster;
use http::request::Parts as RequestParts;
use http::response::Parts as ResponseParts;
use http::{HeaderName, HeaderValue};
use std::collections::HashMap;
use std::sync::Arc;

/// A routing rule. An enum rather than a trait object since the spec defines
/// exactly one rule kind; kept as an enum (instead of collapsing
/// `PrefixRewriteRule` into `Rule` directly) so a second kind could be added
/// later without disturbing callers that match on `Rule`.
pub enum Rule {
    PrefixRewrite(PrefixRewriteRule),
}

impl Rule {
    pub fn name(&self) -> &str {
        match self {
            Rule::PrefixRewrite(r) => &r.name,
        }
    }

    pub fn handles_request(&self, parts: &RequestParts) -> bool {
        match self {
            Rule::PrefixRewrite(r) => r.handles_request(parts),
        }
    }

    pub fn transform_request(&self, parts: &mut RequestParts) {
        match self {
            Rule::PrefixRewrite(r) => r.transform_request(parts),
        }
    }

    pub fn transform_response(&self, parts: &mut ResponseParts) {
        match self {
            Rule::PrefixRewrite(r) => r.transform_response(parts),
        }
    }

    pub fn cluster(&self) -> Option<&Arc<Cluster>> {
        match self {
            Rule::PrefixRewrite(r) => r.cluster.as_ref(),
        }
    }

    pub fn reporter(&self) -> Option<&Arc<HttpStatsReporter>> {
        match self {
            Rule::PrefixRewrite(r) => r.reporter.as_ref(),
        }
    }
}

/// Filters by `Host` and path prefix, rewrites the path prefix, and attaches
/// fixed headers — the single rule kind this crate supports (§4.6).
pub struct PrefixRewriteRule {
    name: String,
    /// Empty matches any `Host`.
    source_host: String,
    source_path_prefix: String,
    proxied_path_prefix: String,
    /// Headers merged into the request on a match, overwriting any header
    /// of the same name already present (matches the Go original's
    /// `r.Header[k] = v`, a plain map assignment, not an append).
    attach_headers: Vec<(HeaderName, HeaderValue)>,
    cluster: Option<Arc<Cluster>>,
    reporter: Option<Arc<HttpStatsReporter>>,
}

impl PrefixRewriteRule {
    pub fn new(
        name: impl Into<String>,
        source_host: impl Into<String>,
        source_path_prefix: impl Into<String>,
        proxied_path_prefix: impl Into<String>,
        attach_headers: HashMap<String, String>,
        cluster: Option<Arc<Cluster>>,
        reporter: Option<Arc<HttpStatsReporter>>,
    ) -> Self {
        let attach_headers = attach_headers
            .into_iter()
            .filter_map(|(k, v)| {
                let name = HeaderName::try_from(k.as_str()).ok()?;
                let value = HeaderValue::from_str(&v).ok()?;
                Some((name, value))
            })
            .collect();

        Self {
            name: name.into(),
            source_host: source_host.into(),
            source_path_prefix: source_path_prefix.into(),
            proxied_path_prefix: proxied_path_prefix.into(),
            attach_headers,
            cluster,
            reporter,
        }
    }

    fn handles_request(&self, parts: &RequestParts) -> bool {
        let host_matches = self.source_host.is_empty()
            || parts
                .headers
                .get(http::header::HOST)
                .and_then(|h| h.to_str().ok())
                == Some(self.source_host.as_str());

        host_matches && parts.uri.path().starts_with(&self.source_path_prefix)
    }

    fn transform_request(&self, parts: &mut RequestParts) {
        let path = parts.uri.path();
        let rest = &path[self.source_path_prefix.len()..];
        let new_path = format!("{}{}", self.proxied_path_prefix, rest);

        let mut uri_parts = parts.uri.clone().into_parts();
        let new_path_and_query = match parts.uri.query() {
            Some(q) => format!("{new_path}?{q}"),
            None => new_path,
        };
        if let Ok(pq) = http::uri::PathAndQuery::try_from(new_path_and_query.as_str()) {
            uri_parts.path_and_query = Some(pq);
        }
        if let Ok(new_uri) = http::Uri::from_parts(uri_parts) {
            parts.uri = new_uri;
        }

        for (name, value) in &self.attach_headers {
            parts.headers.insert(name.clone(), value.clone());
        }
    }

    fn transform_response(&self, _parts: &mut ResponseParts) {
        // No-op, matching the Go original's unimplemented TransformResponse.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request;

    fn parts_for(uri: &str, host: Option<&str>) -> RequestParts {
        let mut builder = Request::builder().uri(uri);
        if let Some(h) = host {
            builder = builder.header(http::header::HOST, h);
        }
        builder.body(()).unwrap().into_parts().0
    }

    fn rule(source_host: &str, source_prefix: &str, proxied_prefix: &str) -> PrefixRewriteRule {
        PrefixRewriteRule::new(
            "test",
            source_host,
            source_prefix,
            proxied_prefix,
            HashMap::new(),
            None,
            None,
        )
    }

    #[test]
    fn empty_source_host_matches_any_host() {
        let r = rule("", "/tco/", "/");
        assert!(r.handles_request(&parts_for("/tco/abc", Some("anything"))));
        assert!(r.handles_request(&parts_for("/tco/abc", None)));
    }

    #[test]
    fn non_empty_source_host_requires_exact_match() {
        let r = rule("t.co", "/tco/", "/");
        assert!(r.handles_request(&parts_for("/tco/abc", Some("t.co"))));
        assert!(!r.handles_request(&parts_for("/tco/abc", Some("other.com"))));
    }

    #[test]
    fn path_must_start_with_source_prefix() {
        let r = rule("", "/tco/", "/");
        assert!(!r.handles_request(&parts_for("/other/abc", None)));
    }

    #[test]
    fn transform_request_rewrites_prefix_and_preserves_suffix_and_query() {
        let r = rule("", "/tco/", "/v2/");
        let mut parts = parts_for("/tco/abc?x=1", None);
        r.transform_request(&mut parts);
        assert_eq!(parts.uri.path(), "/v2/abc");
        assert_eq!(parts.uri.query(), Some("x=1"));
    }

    #[test]
    fn transform_request_overwrites_existing_header_of_same_name() {
        let mut headers = HashMap::new();
        headers.insert("X-Forwarded-For".to_string(), "attached".to_string());
        let r = PrefixRewriteRule::new(
            "test", "", "/tco/", "/", headers, None, None,
        );
        let mut parts = parts_for("/tco/abc", None);
        parts.headers.insert(
            HeaderName::try_from("X-Forwarded-For").unwrap(),
            HeaderValue::from_static("original"),
        );
        r.transform_request(&mut parts);
        assert_eq!(parts.headers.get("X-Forwarded-For").unwrap(), "attached");
    }
}
