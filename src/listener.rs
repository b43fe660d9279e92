//! A bound socket, its TLS material (if any), and the balancers reachable through it
//! (§4.1, §4.4 of SPEC_FULL.md).
//!
//! Routing is longest-prefix match over `routeprefix`, first-declared-wins on ties (mirrors
//! the original source's linear scan, just without relying on declaration order alone to break
//! every tie).

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use http::{Response, StatusCode};
use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::balancer::Balancer;
use crate::config::Protocol;
use crate::error::{DispatchError, ListenerBindError};
use crate::header::TemplateContext;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State_ {
	Init = 0,
	Active = 1,
	Closing = 2,
	Closed = 3,
}

impl From<u8> for State_ {
	fn from(v: u8) -> Self {
		match v {
			0 => Self::Init,
			1 => Self::Active,
			2 => Self::Closing,
			_ => Self::Closed,
		}
	}
}

pub struct Listener {
	pub protocol: Protocol,
	pub port: String,
	tls: Option<ServerConfig>,
	balancers: Vec<Arc<Balancer>>,
	state: AtomicU8,
	shutdown: CancellationToken,
}

impl Listener {
	pub fn new(
		protocol: Protocol,
		port: String,
		ssl_certificate: Option<String>,
		ssl_certificate_key: Option<String>,
		balancers: Vec<Arc<Balancer>>,
	) -> Result<Arc<Self>, ListenerBindError> {
		let tls = match (protocol, ssl_certificate, ssl_certificate_key) {
			(Protocol::Https, Some(cert), Some(key)) => Some(build_tls_config(&cert, &key, &port)?),
			_ => None,
		};
		Ok(Arc::new(Self {
			protocol,
			port,
			tls,
			balancers,
			state: AtomicU8::new(State_::Init as u8),
			shutdown: CancellationToken::new(),
		}))
	}

	pub fn is_active(&self) -> bool {
		State_::from(self.state.load(Ordering::Acquire)) == State_::Active
	}

	fn protocol_label(&self) -> &'static str {
		match self.protocol {
			Protocol::Http => "http",
			Protocol::Https => "https",
		}
	}

	/// Binds the socket and serves until `close` is called or the process-wide shutdown
	/// signal fires. Resolves once every accepted connection has finished (axum's graceful
	/// shutdown), at which point the caller should also await [`Listener::close`] to drain
	/// each balancer's own in-flight counter.
	pub async fn start(self: Arc<Self>) -> Result<(), ListenerBindError> {
		let addr = format!("0.0.0.0:{}", self.port);
		let tcp = TcpListener::bind(&addr)
			.await
			.map_err(|source| ListenerBindError::Io {
				protocol: self.protocol_label(),
				port: self.port.clone(),
				source,
			})?;
		self.state.store(State_::Active as u8, Ordering::Release);
		info!(port = %self.port, protocol = self.protocol_label(), "listener bound");

		let app: Router = Router::new()
			.fallback(handle_request)
			.with_state(self.clone());
		let make_service = app.into_make_service();
		let shutdown = self.shutdown.clone();
		let graceful = async move { shutdown.cancelled().await };

		let result = match &self.tls {
			None => axum::serve(tcp, make_service).with_graceful_shutdown(graceful).await,
			Some(server_config) => {
				let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(server_config.clone()));
				let tls_listener = tls_listener::TlsListener::new(acceptor, tcp);
				axum::serve(tls_listener, make_service)
					.with_graceful_shutdown(graceful)
					.await
			},
		};

		result.map_err(|source| ListenerBindError::Io {
			protocol: self.protocol_label(),
			port: self.port.clone(),
			source,
		})
	}

	/// Stops accepting new connections and drains every balancer before returning.
	pub async fn close(&self) {
		self.state.store(State_::Closing as u8, Ordering::Release);
		self.shutdown.cancel();
		for balancer in &self.balancers {
			balancer.close().await;
		}
		self.state.store(State_::Closed as u8, Ordering::Release);
		info!(port = %self.port, "listener closed");
	}

	fn route(self: &Arc<Self>, req: Request<Body>) -> impl std::future::Future<Output = Response<Body>> + Send + 'static {
		let listener = self.clone();
		async move {
			let path = req.uri().path().to_string();
			let Some(balancer) = match_balancer(&listener.balancers, &path) else {
				return error_response(&DispatchError::NoRouteMatch { path });
			};

			let ctx = TemplateContext {
				protocol: format_http_version(req.version()),
				client_host: request_host(&req),
				tls_version: if listener.tls.is_some() { "TLS1.3".to_string() } else { String::new() },
				balancer_id: balancer.id.clone(),
			};

			match balancer.serve(req, ctx).await {
				Ok(response) => response,
				Err(err) => error_response(&err),
			}
		}
	}
}

/// `[[protocol]]`'s value: the request's HTTP version, e.g. `"HTTP/1.1"`.
fn format_http_version(version: http::Version) -> String {
	match version {
		http::Version::HTTP_09 => "HTTP/0.9".to_string(),
		http::Version::HTTP_10 => "HTTP/1.0".to_string(),
		http::Version::HTTP_11 => "HTTP/1.1".to_string(),
		http::Version::HTTP_2 => "HTTP/2.0".to_string(),
		http::Version::HTTP_3 => "HTTP/3.0".to_string(),
		other => format!("{other:?}"),
	}
}

/// `[[client.host]]`'s value: the request's `Host` header (falling back to the URI's
/// authority, which is where HTTP/2's `:authority` pseudo-header ends up).
fn request_host(req: &Request<Body>) -> String {
	req.headers()
		.get(http::header::HOST)
		.and_then(|v| v.to_str().ok())
		.map(str::to_string)
		.or_else(|| req.uri().authority().map(|a| a.to_string()))
		.unwrap_or_default()
}

fn match_balancer<'a>(balancers: &'a [Arc<Balancer>], path: &str) -> Option<&'a Arc<Balancer>> {
	let mut best: Option<&Arc<Balancer>> = None;
	for balancer in balancers {
		if !balancer.is_active() || !path.starts_with(balancer.routeprefix.as_str()) {
			continue;
		}
		match best {
			None => best = Some(balancer),
			Some(current) if balancer.routeprefix.len() > current.routeprefix.len() => best = Some(balancer),
			_ => {},
		}
	}
	best
}

fn error_response(err: &DispatchError) -> Response<Body> {
	warn!(%err, "request failed");
	Response::builder()
		.status(err.status_code())
		.body(Body::from(err.to_string()))
		.unwrap_or_else(|_| {
			let mut resp = Response::new(Body::empty());
			*resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
			resp
		})
}

async fn handle_request(State(listener): State<Arc<Listener>>, req: Request) -> Response<Body> {
	listener.route(req).await
}

fn build_tls_config(cert_path: &str, key_path: &str, port: &str) -> Result<ServerConfig, ListenerBindError> {
	let inner = || -> anyhow::Result<ServerConfig> {
		let cert_file = File::open(cert_path)?;
		let certs: Vec<CertificateDer<'static>> =
			rustls_pemfile::certs(&mut BufReader::new(cert_file)).collect::<Result<_, _>>()?;

		let key_file = File::open(key_path)?;
		let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut BufReader::new(key_file))?
			.ok_or_else(|| anyhow::anyhow!("no private key found in {key_path}"))?;

		let mut config = ServerConfig::builder()
			.with_no_client_auth()
			.with_single_cert(certs, key)?;
		config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
		Ok(config)
	};
	inner().map_err(|source| ListenerBindError::Tls {
		port: port.to_string(),
		source,
	})
}
