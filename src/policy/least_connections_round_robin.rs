use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::target::Target;

/// Among the live targets tied for the lowest in-flight count, breaks the tie by rotating
/// a cursor over declaration order rather than choosing randomly.
#[derive(Debug, Default)]
pub struct LeastConnectionsRoundRobinPolicy {
	cursor: AtomicUsize,
}

impl LeastConnectionsRoundRobinPolicy {
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
		let min = targets
			.iter()
			.filter(|t| t.is_alive())
			.map(|t| t.in_flight_count())
			.min()?;
		for _ in 0..len {
			let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
			let target = &targets[idx];
			if target.is_alive() && target.in_flight_count() == min {
				return Some(Arc::clone(target));
			}
		}
		None
	}
}
