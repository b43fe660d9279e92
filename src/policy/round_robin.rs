use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::target::Target;

/// Cycles through targets in declaration order, skipping dead ones, never resetting the
/// cursor between calls so that fairness holds across an unbounded request stream.
#[derive(Debug, Default)]
pub struct RoundRobinPolicy {
	cursor: AtomicUsize,
}

impl RoundRobinPolicy {
	pub fn new() -> Self {
		Self {
			cursor: AtomicUsize::new(0),
		}
	}

	pub fn try_pick(&self, targets: &[Arc<Target>]) -> Option<Arc<Target>> {
		let len = targets.len();
		if len == 0 {
			return None;
		}
		for _ in 0..len {
			let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
			if targets[idx].is_alive() {
				return Some(Arc::clone(&targets[idx]));
			}
		}
		None
	}
}
