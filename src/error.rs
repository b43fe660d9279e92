/// Errors surfaced while loading or validating the declarative configuration document.
///
/// Every variant is fatal at startup: the process refuses to assemble a [`crate::service::Service`]
/// until the document is fully valid (see REDESIGN FLAGS in SPEC_FULL.md for why this tightens the
/// original source's "log and continue" behavior).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("failed to read configuration file {path}: {source}")]
	Read {
		path: String,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to parse configuration document: {0}")]
	Parse(#[from] serde_yaml::Error),

	#[error("listener {index} has unsupported protocol {protocol:?}")]
	UnsupportedProtocol { index: usize, protocol: String },

	#[error("listener {index} ({protocol}:{port}) requires ssl_certificate and ssl_certificate_key")]
	MissingTlsMaterial {
		index: usize,
		protocol: String,
		port: String,
	},

	#[error("duplicate listener for {protocol}:{port}")]
	DuplicateListener { protocol: String, port: String },

	#[error("route {id} has unsupported selection mode {mode:?}")]
	UnsupportedMode { id: String, mode: String },

	#[error("route {id} has no targets")]
	NoTargets { id: String },

	#[error("duplicate route id {id}")]
	DuplicateRouteId { id: String },

	#[error("route {id} has invalid routeprefix {prefix:?}: prefix must start with '/'")]
	InvalidRoutePrefix { id: String, prefix: String },

	#[error("target address {address:?} on route {id} is not a valid URL: {source}")]
	InvalidTargetUrl {
		id: String,
		address: String,
		#[source]
		source: url::ParseError,
	},
}

/// Errors binding a single [`crate::listener::Listener`] to its socket. Fatal for that listener only;
/// other listeners in the [`crate::service::Service`] continue starting.
#[derive(Debug, thiserror::Error)]
pub enum ListenerBindError {
	#[error("failed to bind {protocol}:{port}: {source}")]
	Io {
		protocol: &'static str,
		port: String,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to build TLS server config for {port}: {source}")]
	Tls {
		port: String,
		#[source]
		source: anyhow::Error,
	},
}

/// Per-request dispatch failures. These never escalate past the request that produced them.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
	#[error("no balancer matches path {path:?}")]
	NoRouteMatch { path: String },

	#[error("route {id} is not accepting requests")]
	RouteUnavailable { id: String },

	#[error("no live target became available within the wait timeout")]
	SelectionTimeout,

	#[error("upstream {address} returned failure status {status}")]
	UpstreamFailed { address: String, status: u16 },

	#[error("transport error reaching {address}: {source}")]
	Transport {
		address: String,
		#[source]
		source: reqwest::Error,
	},

	#[error("{address} did not respond within the connect/handshake deadline")]
	ConnectTimeout { address: String },
}

impl DispatchError {
	/// Status code to send to the client. Matches the original source's behavior of surfacing
	/// selection and transport failures as 502s rather than leaking internal detail.
	pub fn status_code(&self) -> http::StatusCode {
		match self {
			Self::NoRouteMatch { .. } => http::StatusCode::NOT_FOUND,
			Self::RouteUnavailable { .. } => http::StatusCode::SERVICE_UNAVAILABLE,
			Self::SelectionTimeout => http::StatusCode::SERVICE_UNAVAILABLE,
			Self::UpstreamFailed { .. } => http::StatusCode::BAD_GATEWAY,
			Self::Transport { .. } => http::StatusCode::BAD_GATEWAY,
			Self::ConnectTimeout { .. } => http::StatusCode::GATEWAY_TIMEOUT,
		}
	}
}
