//! Top-level orchestrator: assembles listeners and balancers from a validated configuration
//! document, starts them, and coordinates graceful shutdown (§5 of SPEC_FULL.md).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::balancer::Balancer;
use crate::config::ValidatedDocument;
use crate::error::ListenerBindError;
use crate::listener::Listener;
use crate::metrics::Metrics;

const READY_POLL_INTERVAL: Duration = Duration::from_millis(20);
const READY_POLL_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Service {
	listeners: Vec<Arc<Listener>>,
	ready: Arc<AtomicBool>,
	metrics: Arc<Metrics>,
}

impl Service {
	/// Builds every [`Listener`] (and the [`Balancer`]s reachable through it) from a validated
	/// document. Nothing is bound to a socket yet; call [`Service::run`] for that.
	pub fn assemble(document: ValidatedDocument) -> anyhow::Result<Self> {
		let metrics = Arc::new(Metrics::new());
		let mut listeners = Vec::with_capacity(document.listeners.len());
		for listener_config in document.listeners {
			let mut balancers = Vec::with_capacity(listener_config.routes.len());
			for route in listener_config.routes {
				let mut targets = Vec::with_capacity(route.targets.len());
				for target_config in route.targets {
					targets.push(crate::target::Target::new(target_config.address, target_config.weight)?);
				}
				balancers.push(Balancer::new(
					route.id,
					route.routeprefix,
					route.mode,
					Duration::from_secs(route.target_wait_timeout_secs),
					route.custom_headers,
					targets,
					metrics.clone(),
				));
			}
			let listener = Listener::new(
				listener_config.protocol,
				listener_config.port,
				listener_config.ssl_certificate,
				listener_config.ssl_certificate_key,
				balancers,
			)?;
			listeners.push(listener);
		}
		Ok(Self {
			listeners,
			ready: Arc::new(AtomicBool::new(false)),
			metrics,
		})
	}

	pub fn ready_flag(&self) -> Arc<AtomicBool> {
		self.ready.clone()
	}

	/// The shared gauge set every [`Balancer`] built from this document updates. The caller
	/// registers it into the process-wide Prometheus registry before serving `/metrics`.
	pub fn metrics(&self) -> Arc<Metrics> {
		self.metrics.clone()
	}

	/// Starts every listener in parallel, waits for a shutdown signal, then drains every
	/// listener (which in turn drains every balancer) before returning. If any listener fails
	/// to bind, that error is propagated here rather than only logged, so the process can exit
	/// non-zero.
	pub async fn run(&self, shutdown: impl std::future::Future<Output = ()>) -> anyhow::Result<()> {
		let mut join_set: JoinSet<Result<(), ListenerBindError>> = JoinSet::new();
		for listener in &self.listeners {
			let listener = listener.clone();
			join_set.spawn(async move {
				let port = listener.port.clone();
				let result = listener.start().await;
				if let Err(err) = &result {
					error!(port = %port, %err, "listener exited with error");
				}
				result
			});
		}

		self.wait_until_ready().await;

		let early_failure = tokio::select! {
			_ = shutdown => {
				info!("shutdown signal received, draining listeners");
				None
			}
			failure = wait_for_failure(&mut join_set) => failure,
		};

		for listener in &self.listeners {
			listener.close().await;
		}

		let mut first_err = early_failure;
		while let Some(result) = join_set.join_next().await {
			match result {
				Ok(Err(err)) if first_err.is_none() => first_err = Some(err),
				Ok(_) => {},
				Err(err) => warn!(%err, "listener task panicked"),
			}
		}

		match first_err {
			Some(err) => Err(err.into()),
			None => {
				info!("service shut down cleanly");
				Ok(())
			},
		}
	}

	async fn wait_until_ready(&self) {
		let deadline = tokio::time::Instant::now() + READY_POLL_TIMEOUT;
		while tokio::time::Instant::now() < deadline {
			if self.listeners.iter().all(|l| l.is_active()) {
				self.ready.store(true, Ordering::Release);
				return;
			}
			tokio::time::sleep(READY_POLL_INTERVAL).await;
		}
		warn!("not all listeners became active before the readiness timeout");
		self.ready.store(true, Ordering::Release);
	}
}

/// Resolves with the first listener's bind error, or never resolves if every listener task
/// only ever exits `Ok` (the normal case: a listener only returns once [`Listener::close`] has
/// cancelled it, which happens after the shutdown signal).
async fn wait_for_failure(join_set: &mut JoinSet<Result<(), ListenerBindError>>) -> Option<ListenerBindError> {
	while let Some(result) = join_set.join_next().await {
		match result {
			Ok(Err(err)) => return Some(err),
			Ok(Ok(())) => continue,
			Err(err) => {
				warn!(%err, "listener task panicked");
				continue;
			},
		}
	}
	None
}
