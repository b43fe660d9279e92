use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::target::Target;

/// Cycles through a schedule built once at construction by repeating each target's index
/// `weight` times, in declaration order (target A weight 3, target B weight 2 produces
/// `A,A,A,B,B,A,A,A,B,B,...`). This mirrors the original source's simple repeat-expansion
/// rather than a smooth interleaving scheme.
#[derive(Debug)]
pub struct WeightedRoundRobinPolicy {
	schedule: Vec<usize>,
	cursor: AtomicUsize,
}

impl WeightedRoundRobinPolicy {
	pub fn new(targets: &[Arc<Target>]) -> Self {
		let mut schedule = Vec::new();
		for (idx, target) in targets.iter().enumerate() {
			for _ in 0..target.weight().max(1) {
				schedule.push(idx);
			}
		}
		Self {
			schedule,
			cursor: AtomicUsize::new(0),
		}
	}

	pub fn try_pick(&self, targets: &[Arc<Target>]) -> Option<Arc<Target>> {
		let len = self.schedule.len();
		if len == 0 {
			return None;
		}
		for _ in 0..len {
			let slot = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
			let idx = self.schedule[slot];
			if targets[idx].is_alive() {
				return Some(Arc::clone(&targets[idx]));
			}
		}
		None
	}
}
