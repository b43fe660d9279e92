//! One configured upstream origin: address, weight, liveness, and a reused proxy transport.
//!
//! See §4.1 of SPEC_FULL.md. The transport properties (dial timeout, TCP keep-alive, TLS
//! handshake timeout, connection pooling) are built into the per-[`Target`] `reqwest::Client`
//! once at construction and then reused across every forwarded request.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use axum::body::Body;
use http::{HeaderMap, HeaderName, Request, Response, StatusCode};
use tracing::warn;
use url::Url;

use crate::error::DispatchError;

/// `net.Dialer{Timeout, KeepAlive}` from the original Go source, applied to every Target's
/// transport.
const DIAL_TIMEOUT: Duration = Duration::from_secs(300);
const TCP_KEEPALIVE: Duration = Duration::from_secs(300);

/// Matches the Go original's separate `TLSHandshakeTimeout` on its `http.Transport`. reqwest's
/// `ClientBuilder` has no standalone hook for the handshake phase — `connect_timeout` already
/// spans TCP connect through TLS handshake for an `https://` target, and nothing shorter is
/// exposed. Rather than silently drop this bound, [`Target::forward`] wraps the whole
/// request/response round trip in a `tokio::time::timeout` of this length, which is a
/// best-effort stand-in: it also covers the time the upstream spends producing its response,
/// not just connecting.
const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(180);

/// Headers that must not be forwarded verbatim between hops, per RFC 7230 §6.1 plus the
/// de-facto `Connection`-listed extensions.
const HOP_BY_HOP: &[&str] = &[
	"connection",
	"keep-alive",
	"proxy-authenticate",
	"proxy-authorization",
	"te",
	"trailers",
	"transfer-encoding",
	"upgrade",
	"host",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
	Delivered,
	UpstreamFailed,
}

pub struct Target {
	address: Url,
	weight: u32,
	live: AtomicBool,
	in_flight: AtomicI64,
	client: reqwest::Client,
}

impl std::fmt::Debug for Target {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Target")
			.field("address", &self.address)
			.field("weight", &self.weight)
			.field("live", &self.is_alive())
			.field("in_flight", &self.in_flight_count())
			.finish()
	}
}

impl Target {
	pub fn new(address: Url, weight: u32) -> anyhow::Result<Arc<Self>> {
		let client = reqwest::Client::builder()
			.connect_timeout(DIAL_TIMEOUT)
			.tcp_keepalive(TCP_KEEPALIVE)
			.redirect(reqwest::redirect::Policy::none())
			.build()?;
		Ok(Arc::new(Self {
			address,
			weight,
			live: AtomicBool::new(false),
			in_flight: AtomicI64::new(0),
			client,
		}))
	}

	pub fn address(&self) -> &Url {
		&self.address
	}

	pub fn weight(&self) -> u32 {
		self.weight
	}

	pub fn is_alive(&self) -> bool {
		self.live.load(Ordering::Acquire)
	}

	pub fn mark_reachable(&self) {
		self.live.store(true, Ordering::Release);
	}

	pub fn mark_unreachable(&self) {
		self.live.store(false, Ordering::Release);
	}

	pub fn in_flight_count(&self) -> i64 {
		self.in_flight.load(Ordering::Relaxed)
	}

	/// Streams `req` to the upstream and returns the upstream's response for the caller to
	/// stream back to the client. Increments the in-flight counter on entry and decrements it
	/// on every exit path via an RAII guard.
	pub async fn forward(&self, req: Request<Body>) -> Result<(ForwardOutcome, Response<Body>), DispatchError> {
		let _guard = InFlightGuard::new(&self.in_flight);

		let upstream_url = self.rewrite_url(req.uri())?;
		let (parts, body) = req.into_parts();
		let method = parts.method.clone();
		let headers = forwardable_headers(&parts.headers);
		let body_stream = body.into_data_stream();

		let send = self
			.client
			.request(method, upstream_url)
			.headers(headers)
			.body(reqwest::Body::wrap_stream(body_stream))
			.send();

		let response = tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, send)
			.await
			.map_err(|_| DispatchError::ConnectTimeout {
				address: self.address.to_string(),
			})?
			.map_err(|source| DispatchError::Transport {
				address: self.address.to_string(),
				source,
			})?;

		let status = response.status();
		let outcome = if status == StatusCode::BAD_GATEWAY || status == StatusCode::SERVICE_UNAVAILABLE {
			warn!(address = %self.address, %status, "target is unreachable");
			self.mark_unreachable();
			ForwardOutcome::UpstreamFailed
		} else {
			ForwardOutcome::Delivered
		};

		let axum_response = into_axum_response(response);
		Ok((outcome, axum_response))
	}

	fn rewrite_url(&self, incoming: &http::Uri) -> Result<Url, DispatchError> {
		let mut target = self.address.clone();
		target.set_path(incoming.path());
		target.set_query(incoming.query());
		Ok(target)
	}
}

struct InFlightGuard<'a> {
	counter: &'a AtomicI64,
}

impl<'a> InFlightGuard<'a> {
	fn new(counter: &'a AtomicI64) -> Self {
		counter.fetch_add(1, Ordering::AcqRel);
		Self { counter }
	}
}

impl Drop for InFlightGuard<'_> {
	fn drop(&mut self) {
		self.counter.fetch_sub(1, Ordering::AcqRel);
	}
}

fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
	let mut out = HeaderMap::with_capacity(headers.len());
	for (name, value) in headers.iter() {
		if HOP_BY_HOP.contains(&name.as_str()) {
			continue;
		}
		out.append(name.clone(), value.clone());
	}
	out
}

fn into_axum_response(resp: reqwest::Response) -> Response<Body> {
	let status = resp.status();
	let headers = resp.headers().clone();
	let stream = resp.bytes_stream();
	let mut response = Response::new(Body::from_stream(stream));
	*response.status_mut() = status;
	for (name, value) in headers.iter() {
		if HOP_BY_HOP.contains(&name.as_str()) {
			continue;
		}
		response.headers_mut().append(name.clone(), value.clone());
	}
	response
}

#[allow(dead_code)]
fn is_hop_by_hop(name: &HeaderName) -> bool {
	HOP_BY_HOP.contains(&name.as_str())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fresh_target_starts_unreachable() {
		let target = Target::new(Url::parse("http://127.0.0.1:9").unwrap(), 1).unwrap();
		assert!(!target.is_alive());
		target.mark_reachable();
		assert!(target.is_alive());
		target.mark_unreachable();
		assert!(!target.is_alive());
	}

	#[test]
	fn in_flight_guard_decrements_on_drop() {
		let target = Target::new(Url::parse("http://127.0.0.1:9").unwrap(), 1).unwrap();
		assert_eq!(target.in_flight_count(), 0);
		{
			let _guard = InFlightGuard::new(&target.in_flight);
			assert_eq!(target.in_flight_count(), 1);
		}
		assert_eq!(target.in_flight_count(), 0);
	}

	#[test]
	fn rewrite_url_preserves_path_and_query() {
		let target = Target::new(Url::parse("http://upstream.internal:9000/").unwrap(), 1).unwrap();
		let uri: http::Uri = "/foo/bar?x=1".parse().unwrap();
		let rewritten = target.rewrite_url(&uri).unwrap();
		assert_eq!(rewritten.as_str(), "http://upstream.internal:9000/foo/bar?x=1");
	}
}
