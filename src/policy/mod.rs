//! Target-selection policies (§4.2 of SPEC_FULL.md).
//!
//! A [`SelectionPolicy`] is built once per balancer from its [`Mode`] and target list, then
//! reused for every request. Selection never blocks the caller indefinitely: [`SelectionPolicy::next`]
//! races a policy-specific, non-busy-spin pick loop against the route's configured wait timeout.

mod least_connections_random;
mod least_connections_round_robin;
mod random;
mod round_robin;
mod weighted_round_robin;

use std::sync::Arc;
use std::time::Duration;

use least_connections_random::LeastConnectionsRandomPolicy;
use least_connections_round_robin::LeastConnectionsRoundRobinPolicy;
use random::RandomPolicy;
use round_robin::RoundRobinPolicy;
use weighted_round_robin::WeightedRoundRobinPolicy;

use crate::error::DispatchError;
use crate::target::Target;

/// Interval between pick attempts while waiting for a live target to appear. Short enough to
/// stay responsive, long enough to avoid busy-spinning the selection loop.
const RETRY_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
	Random,
	RoundRobin,
	WeightedRoundRobin,
	LeastConnectionsRandom,
	LeastConnectionsRoundRobin,
}

impl Mode {
	/// Parses a configuration document's `mode` string. Returns `None` for anything unrecognized
	/// so the caller can surface `ConfigError::UnsupportedMode`.
	pub fn parse(s: &str) -> Option<Self> {
		match s {
			"Random" => Some(Self::Random),
			"RoundRobin" => Some(Self::RoundRobin),
			"WeightedRoundRobin" => Some(Self::WeightedRoundRobin),
			"LeastConnectionsRandom" => Some(Self::LeastConnectionsRandom),
			"LeastConnectionsRoundRobin" => Some(Self::LeastConnectionsRoundRobin),
			_ => None,
		}
	}
}

#[derive(Debug)]
pub enum SelectionPolicy {
	Random(RandomPolicy),
	RoundRobin(RoundRobinPolicy),
	WeightedRoundRobin(WeightedRoundRobinPolicy),
	LeastConnectionsRandom(LeastConnectionsRandomPolicy),
	LeastConnectionsRoundRobin(LeastConnectionsRoundRobinPolicy),
}

impl SelectionPolicy {
	pub fn new(mode: Mode, targets: &[Arc<Target>]) -> Self {
		match mode {
			Mode::Random => Self::Random(RandomPolicy::new()),
			Mode::RoundRobin => Self::RoundRobin(RoundRobinPolicy::new()),
			Mode::WeightedRoundRobin => Self::WeightedRoundRobin(WeightedRoundRobinPolicy::new(targets)),
			Mode::LeastConnectionsRandom => Self::LeastConnectionsRandom(LeastConnectionsRandomPolicy::new()),
			Mode::LeastConnectionsRoundRobin => {
				Self::LeastConnectionsRoundRobin(LeastConnectionsRoundRobinPolicy::new())
			},
		}
	}

	fn try_pick(&self, targets: &[Arc<Target>]) -> Option<Arc<Target>> {
		match self {
			Self::Random(p) => p.try_pick(targets),
			Self::RoundRobin(p) => p.try_pick(targets),
			Self::WeightedRoundRobin(p) => p.try_pick(targets),
			Self::LeastConnectionsRandom(p) => p.try_pick(targets),
			Self::LeastConnectionsRoundRobin(p) => p.try_pick(targets),
		}
	}

	/// Races this policy's pick loop against `wait_timeout`. Returns
	/// [`DispatchError::SelectionTimeout`] if no live target was ever available in that window.
	pub async fn next(&self, targets: &[Arc<Target>], wait_timeout: Duration) -> Result<Arc<Target>, DispatchError> {
		let poll = async {
			loop {
				if let Some(target) = self.try_pick(targets) {
					return target;
				}
				tokio::time::sleep(RETRY_INTERVAL).await;
			}
		};
		tokio::time::timeout(wait_timeout, poll)
			.await
			.map_err(|_| DispatchError::SelectionTimeout)
	}
}

#[cfg(test)]
mod tests {
	use url::Url;

	use super::*;

	fn target(weight: u32, alive: bool) -> Arc<Target> {
		let t = Target::new(Url::parse("http://127.0.0.1:9").unwrap(), weight).unwrap();
		if alive {
			t.mark_reachable();
		}
		t
	}

	#[tokio::test]
	async fn round_robin_cycles_in_order() {
		let targets = vec![target(1, true), target(1, true), target(1, true)];
		let policy = SelectionPolicy::new(Mode::RoundRobin, &targets);
		let mut picks = Vec::new();
		for _ in 0..6 {
			let picked = policy.next(&targets, Duration::from_millis(50)).await.unwrap();
			picks.push(targets.iter().position(|t| Arc::ptr_eq(t, &picked)).unwrap());
		}
		assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
	}

	#[tokio::test]
	async fn weighted_round_robin_honors_weights() {
		let targets = vec![target(3, true), target(2, true), target(1, true)];
		let policy = SelectionPolicy::new(Mode::WeightedRoundRobin, &targets);
		let mut picks = Vec::new();
		for _ in 0..6 {
			let picked = policy.next(&targets, Duration::from_millis(50)).await.unwrap();
			picks.push(targets.iter().position(|t| Arc::ptr_eq(t, &picked)).unwrap());
		}
		assert_eq!(picks, vec![0, 0, 0, 1, 1, 2]);
	}

	#[tokio::test]
	async fn least_connections_round_robin_rotates_among_ties() {
		// All targets have an equal (zero) in-flight count, so the tie-break must rotate
		// through declaration order rather than always returning the first live target.
		let targets = vec![target(1, true), target(1, true), target(1, true)];
		let policy = SelectionPolicy::new(Mode::LeastConnectionsRoundRobin, &targets);
		let mut picks = Vec::new();
		for _ in 0..3 {
			let picked = policy.next(&targets, Duration::from_millis(50)).await.unwrap();
			picks.push(targets.iter().position(|t| Arc::ptr_eq(t, &picked)).unwrap());
		}
		assert_eq!(picks, vec![0, 1, 2]);
	}

	#[tokio::test]
	async fn selection_times_out_when_nothing_is_alive() {
		let targets = vec![target(1, false)];
		let policy = SelectionPolicy::new(Mode::Random, &targets);
		let result = policy.next(&targets, Duration::from_millis(20)).await;
		assert!(matches!(result, Err(DispatchError::SelectionTimeout)));
	}
}
