//! Per-request orchestration: match a rule, transform, dispatch to its
//! cluster, transform the response, write it out (§4.7).
//!
//! Grounded on `examples/original_source/tfe.go`'s `Rules.ServeHTTP`,
//! carried over step for step including its quirks: `Content-Length` is set
//! from the buffered body length *before* the redirect short-circuit check
//! (so a cached 3xx response still gets a correct header even though its
//! body is never copied), and every exit path — 404, body-read failure,
//! upstream failure, success — reports exactly one summary outcome.

use crate::body::{BoxBody, ReplayableBody};
use crate::rule::Rule;
use crate::stats::{HttpStatsReporter, Outcome};
use crate::upstream::{TransportError, UpstreamBody};
use bytes::Bytes;
use http::header::CONTENT_LENGTH;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn empty_body() -> BoxBody {
    Full::new(Bytes::new()).map_err(|never| match never {}).boxed()
}

/// Builds a zero-length response with the given status, matching the Go
/// original's `headers["Content-Length"] = contentLength0` convention for
/// every synthetic error path.
fn empty_response(status: u16) -> Response<BoxBody> {
    Response::builder()
        .status(status)
        .header(CONTENT_LENGTH, "0")
        .body(empty_body())
        .expect("building a well-formed response cannot fail")
}

/// Reports a synthetic zero-length outcome — used on every 404/503 exit
/// path, where no real response body was ever produced (§3's "synthetic
/// {statusCode, contentLength}" OutcomeRecord shape).
fn report_synthetic(reporter: Option<&Arc<HttpStatsReporter>>, status: u16, elapsed: Duration) {
    report(reporter, status, Some(0), elapsed);
}

fn report(
    reporter: Option<&Arc<HttpStatsReporter>>,
    status: u16,
    size: Option<u64>,
    elapsed: Duration,
) {
    if let Some(reporter) = reporter {
        reporter.report(&Outcome::Response { status, size }, elapsed);
    }
}

/// Wall-clock cap on the cumulative cluster call. Vestigial per the Go
/// original's own `//TODO: better interface, timeout's not used here` —
/// the real per-attempt timeout lives on the Supervisor; this is a last
/// line of defense against a misbehaving cluster.
const DISPATCH_TIMEOUT: Duration = Duration::from_secs(1);

/// Scans `rules` in order for the first match, then runs it to completion.
/// Returns a 404 if nothing matches, matching `ServeHTTP`'s fallthrough.
pub async fn dispatch(
    req: Request<Incoming>,
    rules: &[Arc<Rule>],
) -> Result<Response<BoxBody>, std::convert::Infallible> {
    let start = Instant::now();
    let (parts, body) = req.into_parts();

    for rule in rules {
        if !rule.handles_request(&parts) {
            continue;
        }
        return Ok(dispatch_matched(rule, parts, body, start).await);
    }

    Ok(empty_response(404))
}

async fn dispatch_matched(
    rule: &Arc<Rule>,
    mut parts: http::request::Parts,
    body: Incoming,
    start: Instant,
) -> Response<BoxBody> {
    rule.transform_request(&mut parts);

    let Some(cluster) = rule.cluster() else {
        tracing::warn!(rule = rule.name(), "no cluster configured for rule");
        report_synthetic(rule.reporter(), 404, start.elapsed());
        return empty_response(404);
    };

    let replayable = match ReplayableBody::drain(body).await {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(rule = rule.name(), error = %e, "failed to read request body");
            report_synthetic(rule.reporter(), 503, start.elapsed());
            return empty_response(503);
        }
    };

    let upstream_req = Request::from_parts(parts, replayable);

    let result = crate::upstream::timeout::bounded(
        DISPATCH_TIMEOUT,
        cluster.serve(upstream_req),
        || TransportError::Timeout,
    )
    .await;

    let upstream_resp = match result {
        Ok(resp) => resp,
        Err(e) => {
            tracing::warn!(rule = rule.name(), error = %e, "upstream dispatch failed");
            report_synthetic(rule.reporter(), 503, start.elapsed());
            return empty_response(503);
        }
    };

    let (mut resp_parts, upstream_body) = upstream_resp.into_parts();
    rule.transform_response(&mut resp_parts);

    let status = resp_parts.status.as_u16();

    let (body, size): (BoxBody, Option<u64>) = match upstream_body {
        UpstreamBody::Buffered(buffered) => {
            // Set Content-Length from the exact buffered size before the
            // redirect check below — matching the Go original, which sets
            // this header unconditionally ahead of the `StatusCode >= 300`
            // branch that skips the body copy.
            let len = buffered.len();
            let value = http::HeaderValue::from_str(&len.to_string())
                .expect("decimal length is always a valid header value");
            resp_parts.headers.insert(CONTENT_LENGTH, value);
            (buffered.into_box_body(), Some(len as u64))
        }
        UpstreamBody::Streaming(incoming) => {
            let size = resp_parts
                .headers
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            (incoming.boxed(), size)
        }
    };

    if (300..400).contains(&status) {
        // Redirects: headers (including the Content-Length just computed
        // from the real body) are sent, but the body itself is never
        // streamed — matching `ServeHTTP`'s early return on 3xx, which
        // calls `WriteHeader` but returns before `io.Copy`. This preserves
        // the original's framing quirk (Content-Length may claim a body
        // that never arrives) rather than "fixing" it.
        report(rule.reporter(), status, size, start.elapsed());
        return Response::from_parts(resp_parts, empty_body());
    }

    let response = Response::from_parts(resp_parts, body);
    report(rule.reporter(), status, size, start.elapsed());
    response
}
