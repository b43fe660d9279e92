use std::sync::Arc;

use rand::seq::IndexedRandom;

use crate::target::Target;

/// Picks uniformly at random among currently-live targets. Stateless between calls.
#[derive(Debug, Default)]
pub struct RandomPolicy;

impl RandomPolicy {
	pub fn new() -> Self {
		Self
	}

	pub fn try_pick(&self, targets: &[Arc<Target>]) -> Option<Arc<Target>> {
		let live: Vec<&Arc<Target>> = targets.iter().filter(|t| t.is_alive()).collect();
		live.choose(&mut rand::rng()).map(|t| Arc::clone(*t))
	}
}
