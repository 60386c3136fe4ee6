//! Per-index circuit breakers guarding approximate vector search.
//!
//! After a run of consecutive HNSW failures the breaker opens and search
//! falls back to the exact flat scan. Once the cooldown elapses the graph
//! is retried; a bounded retry budget can pin an index to the fallback
//! path permanently.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// The health of one index's graph search path
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakerState {
	Healthy,
	Failed,
	Retrying,
}

#[derive(Clone, Debug)]
struct Breaker {
	state: BreakerState,
	consecutive_failures: u32,
	successes: u64,
	failures: u64,
	last_failure: Option<Instant>,
	retries: u32,
}

impl Default for Breaker {
	fn default() -> Self {
		Self {
			state: BreakerState::Healthy,
			consecutive_failures: 0,
			successes: 0,
			failures: 0,
			last_failure: None,
			retries: 0,
		}
	}
}

/// Counters and breaker state per index. The lock is only held for the
/// state bookkeeping itself, never across store I/O.
pub struct IndexMonitor {
	breakers: Mutex<HashMap<String, Breaker>>,
	failure_threshold: u32,
	retry_delay: Duration,
	/// Zero means unbounded retries
	max_retries: u32,
}

impl IndexMonitor {
	pub fn new(failure_threshold: u32, retry_delay: Duration, max_retries: u32) -> Self {
		Self {
			breakers: Mutex::new(HashMap::new()),
			failure_threshold: failure_threshold.max(1),
			retry_delay,
			max_retries,
		}
	}

	/// Whether the graph path should be attempted for this index
	pub fn should_attempt(&self, index: &str) -> bool {
		let mut breakers = self.breakers.lock().unwrap();
		let b = breakers.entry(index.to_string()).or_default();
		match b.state {
			BreakerState::Healthy | BreakerState::Retrying => true,
			BreakerState::Failed => {
				if self.max_retries > 0 && b.retries >= self.max_retries {
					return false;
				}
				let cooled = b
					.last_failure
					.map(|at| at.elapsed() >= self.retry_delay)
					.unwrap_or(true);
				if cooled {
					b.state = BreakerState::Retrying;
					b.retries += 1;
					true
				} else {
					false
				}
			}
		}
	}

	/// Records a successful graph search
	pub fn success(&self, index: &str) {
		let mut breakers = self.breakers.lock().unwrap();
		let b = breakers.entry(index.to_string()).or_default();
		b.successes += 1;
		b.consecutive_failures = 0;
		b.retries = 0;
		b.state = BreakerState::Healthy;
	}

	/// Records a failed graph search, possibly opening the breaker
	pub fn failure(&self, index: &str) {
		let mut breakers = self.breakers.lock().unwrap();
		let b = breakers.entry(index.to_string()).or_default();
		b.failures += 1;
		b.consecutive_failures += 1;
		b.last_failure = Some(Instant::now());
		if b.consecutive_failures >= self.failure_threshold || b.state == BreakerState::Retrying {
			if b.state != BreakerState::Failed {
				warn!(
					target: "tupledb::core::idx",
					index,
					failures = b.consecutive_failures,
					"vector search circuit opened, falling back to flat scan"
				);
			}
			b.state = BreakerState::Failed;
		}
	}

	/// The current state of one index's breaker
	pub fn state(&self, index: &str) -> BreakerState {
		self.breakers
			.lock()
			.unwrap()
			.get(index)
			.map(|b| b.state)
			.unwrap_or(BreakerState::Healthy)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn opens_after_threshold_and_cools_down() {
		let monitor = IndexMonitor::new(2, Duration::from_millis(0), 0);
		assert!(monitor.should_attempt("v"));
		monitor.failure("v");
		assert!(monitor.should_attempt("v"));
		monitor.failure("v");
		assert_eq!(monitor.state("v"), BreakerState::Failed);
		// Zero cooldown: the next attempt retries the graph
		assert!(monitor.should_attempt("v"));
		assert_eq!(monitor.state("v"), BreakerState::Retrying);
		monitor.success("v");
		assert_eq!(monitor.state("v"), BreakerState::Healthy);
	}

	#[test]
	fn cooldown_blocks_attempts() {
		let monitor = IndexMonitor::new(1, Duration::from_secs(3600), 0);
		monitor.failure("v");
		assert_eq!(monitor.state("v"), BreakerState::Failed);
		assert!(!monitor.should_attempt("v"));
	}

	#[test]
	fn retry_budget_pins_the_fallback() {
		let monitor = IndexMonitor::new(1, Duration::from_millis(0), 1);
		monitor.failure("v");
		assert!(monitor.should_attempt("v"));
		monitor.failure("v");
		assert!(!monitor.should_attempt("v"));
	}
}
