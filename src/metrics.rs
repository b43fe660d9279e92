// Copyright Istio Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Admin surface: `/metrics` (Prometheus text exposition) and `/healthz` (§4.6 of
//! SPEC_FULL.md). Readiness reflects the service's start barrier, not individual listener
//! liveness.
//!
//! [`Metrics`] holds the per-balancer and per-target gauges required by §2/§4.6: in-flight
//! request counts per balancer and reachability per target. [`Balancer`](crate::balancer::Balancer)
//! updates both at the same points where it already tracks this state internally.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::{Router, extract::State, http::StatusCode, routing::get};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use tracing::error;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct BalancerLabels {
	pub balancer_id: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TargetLabels {
	pub balancer_id: String,
	pub target_address: String,
}

/// Dynamic gauges, registered once into the process-wide [`Registry`] and then shared with
/// every [`Balancer`](crate::balancer::Balancer) built from the configuration document.
#[derive(Clone, Default)]
pub struct Metrics {
	pub balancer_in_flight: Family<BalancerLabels, Gauge>,
	pub target_reachable: Family<TargetLabels, Gauge>,
}

impl Metrics {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&self, registry: &mut Registry) {
		registry.register(
			"balancer_in_flight_requests",
			"Requests currently in flight for a balancer",
			self.balancer_in_flight.clone(),
		);
		registry.register(
			"target_reachable",
			"Whether a target is currently considered reachable (1) or unreachable (0)",
			self.target_reachable.clone(),
		);
	}
}

#[derive(Clone)]
pub struct App {
	registry: Arc<Registry>,
	ready: Arc<AtomicBool>,
}

impl App {
	pub fn new(registry: Arc<Registry>, ready: Arc<AtomicBool>) -> Self {
		Self { registry, ready }
	}

	pub fn router(&self) -> Router {
		Router::new()
			.route("/metrics", get(metrics_handler))
			.route("/healthz", get(healthz_handler))
			.with_state(self.clone())
	}
}

async fn metrics_handler(State(app): State<App>) -> Result<String, StatusCode> {
	let mut buffer = String::new();
	encode(&mut buffer, &app.registry).map_err(|err| {
		error!(%err, "failed to encode metrics");
		StatusCode::INTERNAL_SERVER_ERROR
	})?;
	Ok(buffer)
}

async fn healthz_handler(State(app): State<App>) -> StatusCode {
	if app.ready.load(Ordering::Acquire) {
		StatusCode::OK
	} else {
		StatusCode::SERVICE_UNAVAILABLE
	}
}
