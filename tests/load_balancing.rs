//! End-to-end tests: a real bound [`Listener`] forwarding to mocked upstreams.

use std::sync::Arc;
use std::time::Duration;

use edge_lb::balancer::Balancer;
use edge_lb::config::Protocol;
use edge_lb::listener::Listener;
use edge_lb::metrics::Metrics;
use edge_lb::policy::Mode;
use edge_lb::target::Target;
use wiremock::matchers::path;
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn start_listener(balancers: Vec<Arc<Balancer>>) -> (Arc<Listener>, u16) {
	let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
	let port = probe.local_addr().unwrap().port();
	drop(probe);

	let listener = Listener::new(Protocol::Http, port.to_string(), None, None, balancers).unwrap();
	let spawned = listener.clone();
	tokio::spawn(async move {
		let _ = spawned.start().await;
	});
	for _ in 0..50 {
		if listener.is_active() {
			break;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	(listener, port)
}

#[tokio::test]
async fn round_robin_alternates_across_targets() {
	let upstream_a = MockServer::start().await;
	let upstream_b = MockServer::start().await;
	Mock::given(path("/"))
		.respond_with(ResponseTemplate::new(200).set_body_string("a"))
		.mount(&upstream_a)
		.await;
	Mock::given(path("/"))
		.respond_with(ResponseTemplate::new(200).set_body_string("b"))
		.mount(&upstream_b)
		.await;

	let target_a = Target::new(upstream_a.uri().parse().unwrap(), 1).unwrap();
	let target_b = Target::new(upstream_b.uri().parse().unwrap(), 1).unwrap();
	let balancer = Balancer::new(
		"r1".into(),
		"/".into(),
		Mode::RoundRobin,
		Duration::from_secs(1),
		Vec::new(),
		vec![target_a, target_b],
		Arc::new(Metrics::new()),
	);
	let (listener, port) = start_listener(vec![balancer]).await;

	let client = reqwest::Client::new();
	let mut bodies = Vec::new();
	for _ in 0..4 {
		let resp = client.get(format!("http://127.0.0.1:{port}/")).send().await.unwrap();
		bodies.push(resp.text().await.unwrap());
	}
	assert_eq!(bodies, vec!["a", "b", "a", "b"]);

	listener.close().await;
}

#[tokio::test]
async fn failing_upstream_is_marked_unreachable_and_excluded() {
	let healthy = MockServer::start().await;
	let failing = MockServer::start().await;
	Mock::given(path("/"))
		.respond_with(ResponseTemplate::new(200).set_body_string("ok"))
		.mount(&healthy)
		.await;
	Mock::given(path("/"))
		.respond_with(ResponseTemplate::new(503))
		.mount(&failing)
		.await;

	let target_healthy = Target::new(healthy.uri().parse().unwrap(), 1).unwrap();
	let target_failing = Target::new(failing.uri().parse().unwrap(), 1).unwrap();
	let balancer = Balancer::new(
		"r1".into(),
		"/".into(),
		Mode::RoundRobin,
		Duration::from_millis(200),
		Vec::new(),
		vec![target_failing.clone(), target_healthy.clone()],
		Arc::new(Metrics::new()),
	);
	let (listener, port) = start_listener(vec![balancer]).await;

	let client = reqwest::Client::new();
	// First request hits the failing target (declared first) and gets a 502 surfaced to the
	// client, which also marks it unreachable.
	let first = client.get(format!("http://127.0.0.1:{port}/")).send().await.unwrap();
	assert_eq!(first.status(), reqwest::StatusCode::BAD_GATEWAY);
	assert!(!target_failing.is_alive());

	// Every subsequent request is served by the still-live target.
	for _ in 0..3 {
		let resp = client.get(format!("http://127.0.0.1:{port}/")).send().await.unwrap();
		assert_eq!(resp.status(), reqwest::StatusCode::OK);
		assert_eq!(resp.text().await.unwrap(), "ok");
	}

	listener.close().await;
}

#[tokio::test]
async fn longest_prefix_match_prefers_more_specific_route() {
	let general = MockServer::start().await;
	let specific = MockServer::start().await;
	Mock::given(path("/api/v2/widgets"))
		.respond_with(ResponseTemplate::new(200).set_body_string("general"))
		.mount(&general)
		.await;
	Mock::given(path("/api/v2/widgets"))
		.respond_with(ResponseTemplate::new(200).set_body_string("specific"))
		.mount(&specific)
		.await;

	let target_general = Target::new(general.uri().parse().unwrap(), 1).unwrap();
	let target_specific = Target::new(specific.uri().parse().unwrap(), 1).unwrap();
	let metrics = Arc::new(Metrics::new());
	let general_balancer = Balancer::new(
		"general".into(),
		"/api".into(),
		Mode::RoundRobin,
		Duration::from_secs(1),
		Vec::new(),
		vec![target_general],
		metrics.clone(),
	);
	let specific_balancer = Balancer::new(
		"specific".into(),
		"/api/v2".into(),
		Mode::RoundRobin,
		Duration::from_secs(1),
		Vec::new(),
		vec![target_specific],
		metrics,
	);
	let (listener, port) = start_listener(vec![general_balancer, specific_balancer]).await;

	let client = reqwest::Client::new();
	let resp = client
		.get(format!("http://127.0.0.1:{port}/api/v2/widgets"))
		.send()
		.await
		.unwrap();
	assert_eq!(resp.text().await.unwrap(), "specific");

	listener.close().await;
}

#[tokio::test]
async fn unmatched_path_returns_404() {
	let (listener, port) = start_listener(Vec::new()).await;
	let client = reqwest::Client::new();
	let resp = client.get(format!("http://127.0.0.1:{port}/anything")).send().await.unwrap();
	assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
	listener.close().await;
}
