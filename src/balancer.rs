//! A single route's selection policy, target set, and custom header rules (§4.1, §4.3).
//!
//! A `Balancer` owns its [`Target`]s one-way: the listener holds an `Arc<Balancer>`, the
//! balancer holds `Arc<Target>`s, and nothing points back up the chain.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use axum::body::Body;
use http::{Request, Response};
use prometheus_client::metrics::gauge::Gauge;
use tracing::{debug, info};

use crate::error::DispatchError;
use crate::header::{self, HeaderRule, TemplateContext};
use crate::metrics::{BalancerLabels, Metrics, TargetLabels};
use crate::policy::{Mode, SelectionPolicy};
use crate::target::Target;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
	Init = 0,
	Active = 1,
	Closing = 2,
	Closed = 3,
}

impl From<u8> for State {
	fn from(v: u8) -> Self {
		match v {
			0 => Self::Init,
			1 => Self::Active,
			2 => Self::Closing,
			_ => Self::Closed,
		}
	}
}

pub struct Balancer {
	pub id: String,
	pub routeprefix: String,
	wait_timeout: Duration,
	policy: SelectionPolicy,
	targets: Vec<Arc<Target>>,
	custom_headers: Vec<HeaderRule>,
	state: AtomicU8,
	metrics: Arc<Metrics>,
	in_flight_gauge: Gauge,
}

impl std::fmt::Debug for Balancer {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Balancer")
			.field("id", &self.id)
			.field("routeprefix", &self.routeprefix)
			.field("targets", &self.targets.len())
			.field("state", &State::from(self.state.load(Ordering::Acquire)))
			.finish()
	}
}

impl Balancer {
	/// Builds a balancer already holding its full target set. Unlike the original source, which
	/// adds targets one at a time after construction, the configuration document is fully
	/// validated up front, so every target is known before the balancer transitions out of
	/// `Init`.
	pub fn new(
		id: String,
		routeprefix: String,
		mode: Mode,
		wait_timeout: Duration,
		custom_headers: Vec<HeaderRule>,
		targets: Vec<Arc<Target>>,
		metrics: Arc<Metrics>,
	) -> Arc<Self> {
		let policy = SelectionPolicy::new(mode, &targets);
		let state = if targets.is_empty() { State::Init } else { State::Active };
		for target in &targets {
			target.mark_reachable();
			metrics
				.target_reachable
				.get_or_create(&TargetLabels {
					balancer_id: id.clone(),
					target_address: target.address().to_string(),
				})
				.set(1);
		}
		let in_flight_gauge = metrics
			.balancer_in_flight
			.get_or_create(&BalancerLabels { balancer_id: id.clone() })
			.clone();
		Arc::new(Self {
			id,
			routeprefix,
			wait_timeout,
			policy,
			targets,
			custom_headers,
			state: AtomicU8::new(state as u8),
			metrics,
			in_flight_gauge,
		})
	}

	fn state(&self) -> State {
		State::from(self.state.load(Ordering::Acquire))
	}

	pub fn is_active(&self) -> bool {
		self.state() == State::Active
	}

	/// Selects a live target, applies this route's custom headers, and forwards the request.
	pub async fn serve(&self, mut req: Request<Body>, ctx: TemplateContext) -> Result<Response<Body>, DispatchError> {
		if self.state() != State::Active {
			return Err(DispatchError::RouteUnavailable { id: self.id.clone() });
		}

		let _guard = InFlightGuard::new(&self.in_flight_gauge);
		let method = req.method().clone();
		header::apply_custom_headers(&self.custom_headers, &method, &ctx, req.headers_mut());

		let target = self.policy.next(&self.targets, self.wait_timeout).await?;
		debug!(balancer = %self.id, target = %target.address(), "dispatching request");
		let (outcome, response) = target.forward(req).await?;
		if outcome == crate::target::ForwardOutcome::UpstreamFailed {
			self.metrics
				.target_reachable
				.get_or_create(&TargetLabels {
					balancer_id: self.id.clone(),
					target_address: target.address().to_string(),
				})
				.set(0);
			return Err(DispatchError::UpstreamFailed {
				address: target.address().to_string(),
				status: response.status().as_u16(),
			});
		}
		Ok(response)
	}

	/// Transitions `Active -> Closing` immediately, then blocks until every in-flight request
	/// has finished before transitioning `Closing -> Closed`.
	pub async fn close(&self) {
		let previous = self.state.swap(State::Closing as u8, Ordering::AcqRel);
		if State::from(previous) == State::Closed {
			self.state.store(State::Closed as u8, Ordering::Release);
			return;
		}
		while self.in_flight_gauge.get() > 0 {
			tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
		}
		self.state.store(State::Closed as u8, Ordering::Release);
		info!(balancer = %self.id, "balancer drained");
	}
}

struct InFlightGuard {
	gauge: Gauge,
}

impl InFlightGuard {
	fn new(gauge: &Gauge) -> Self {
		gauge.inc();
		Self { gauge: gauge.clone() }
	}
}

impl Drop for InFlightGuard {
	fn drop(&mut self) {
		self.gauge.dec();
	}
}

#[cfg(test)]
mod tests {
	use url::Url;

	use super::*;

	fn live_target() -> Arc<Target> {
		let t = Target::new(Url::parse("http://127.0.0.1:65535").unwrap(), 1).unwrap();
		t.mark_reachable();
		t
	}

	#[tokio::test]
	async fn close_on_idle_balancer_completes_immediately() {
		let balancer = Balancer::new(
			"r1".into(),
			"/".into(),
			Mode::RoundRobin,
			Duration::from_millis(50),
			Vec::new(),
			vec![live_target()],
			Arc::new(Metrics::new()),
		);
		assert!(balancer.is_active());
		balancer.close().await;
		assert_eq!(balancer.state(), State::Closed);
	}

	#[tokio::test]
	async fn serve_rejects_requests_once_closing() {
		let balancer = Balancer::new(
			"r1".into(),
			"/".into(),
			Mode::RoundRobin,
			Duration::from_millis(50),
			Vec::new(),
			vec![live_target()],
			Arc::new(Metrics::new()),
		);
		balancer.close().await;
		let req = Request::builder().uri("/").body(Body::empty()).unwrap();
		let result = balancer.serve(req, TemplateContext::default()).await;
		assert!(matches!(result, Err(DispatchError::RouteUnavailable { .. })));
	}
}
