use std::sync::Arc;

use rand::seq::IndexedRandom;

use crate::target::Target;

/// Picks uniformly at random among the live targets tied for the lowest in-flight count.
#[derive(Debug, Default)]
pub struct LeastConnectionsRandomPolicy;

impl LeastConnectionsRandomPolicy {
	pub fn new() -> Self {
		Self
	}

	pub fn try_pick(&self, targets: &[Arc<Target>]) -> Option<Arc<Target>> {
		let live: Vec<&Arc<Target>> = targets.iter().filter(|t| t.is_alive()).collect();
		let min = live.iter().map(|t| t.in_flight_count()).min()?;
		let tied: Vec<&Arc<Target>> = live
			.into_iter()
			.filter(|t| t.in_flight_count() == min)
			.collect();
		tied.choose(&mut rand::rng()).map(|t| Arc::clone(*t))
	}
}
