//! Per-peer circuit breaker for the fan-out pipeline (spec.md §4.6, §5).
//! Three explicit states: `Closed` delivers normally; `Open` skips delivery
//! until the cooldown elapses; `HalfOpen` admits exactly one probe delivery
//! and decides the next state from its outcome. A sharded map with a mutex
//! per entry, not a global lock, so one peer's breaker never blocks another's
//! (spec.md §5 "Shared resources").

use dashmap::DashMap;
use parking_lot::Mutex;

use actingweb_types::prelude::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
	Closed,
	Open,
	HalfOpen,
}

#[derive(Debug)]
struct BreakerEntry {
	state: CircuitState,
	consecutive_failures: u32,
	opened_at: Option<i64>,
	/// Set while the single `HalfOpen` probe is outstanding, so concurrent
	/// fan-out tasks for the same peer don't all try to probe at once.
	probe_in_flight: bool,
}

impl BreakerEntry {
	fn closed() -> Self {
		Self { state: CircuitState::Closed, consecutive_failures: 0, opened_at: None, probe_in_flight: false }
	}
}

#[derive(Debug)]
pub struct PeerCircuitBreaker {
	state: DashMap<PeerId, Mutex<BreakerEntry>>,
	failure_threshold: u32,
	cooldown_seconds: i64,
}

impl PeerCircuitBreaker {
	pub fn new(failure_threshold: u32, cooldown_seconds: i64) -> Self {
		Self { state: DashMap::new(), failure_threshold, cooldown_seconds }
	}

	/// Returns `true` if delivery to `peer` should be attempted right now.
	/// Transitions `Open` -> `HalfOpen` and admits the probe as a side
	/// effect once the cooldown has elapsed.
	pub fn allow(&self, peer: &PeerId) -> bool {
		let entry = self.state.entry(peer.clone()).or_insert_with(|| Mutex::new(BreakerEntry::closed()));
		let mut guard = entry.lock();
		match guard.state {
			CircuitState::Closed => true,
			CircuitState::HalfOpen => {
				if guard.probe_in_flight {
					false
				} else {
					guard.probe_in_flight = true;
					true
				}
			}
			CircuitState::Open => {
				let elapsed = guard.opened_at.map(|at| Timestamp::now().0 - at).unwrap_or(i64::MAX);
				if elapsed >= self.cooldown_seconds {
					guard.state = CircuitState::HalfOpen;
					guard.probe_in_flight = true;
					tracing::info!(peer = %peer, "circuit breaker half-open, admitting probe");
					true
				} else {
					false
				}
			}
		}
	}

	/// Closes the breaker (from `Closed` or a successful `HalfOpen` probe).
	pub fn record_success(&self, peer: &PeerId) {
		if let Some(entry) = self.state.get(peer) {
			let mut guard = entry.lock();
			if guard.state != CircuitState::Closed {
				tracing::info!(peer = %peer, "circuit breaker closed after successful probe");
			}
			*guard = BreakerEntry::closed();
		}
	}

	/// Records a failed delivery. A failed `HalfOpen` probe reopens
	/// immediately; a `Closed` breaker opens once the streak crosses
	/// `failure_threshold`.
	pub fn record_failure(&self, peer: &PeerId) {
		let entry = self.state.entry(peer.clone()).or_insert_with(|| Mutex::new(BreakerEntry::closed()));
		let mut guard = entry.lock();
		match guard.state {
			CircuitState::HalfOpen => {
				guard.state = CircuitState::Open;
				guard.opened_at = Some(Timestamp::now().0);
				guard.probe_in_flight = false;
				tracing::warn!(peer = %peer, "circuit breaker reopened, probe failed");
			}
			CircuitState::Closed | CircuitState::Open => {
				guard.consecutive_failures += 1;
				if guard.consecutive_failures >= self.failure_threshold && guard.state == CircuitState::Closed {
					guard.state = CircuitState::Open;
					guard.opened_at = Some(Timestamp::now().0);
					tracing::warn!(peer = %peer, failures = guard.consecutive_failures, "circuit breaker opened");
				}
			}
		}
	}

	pub fn current_state(&self, peer: &PeerId) -> CircuitState {
		self.state.get(peer).map(|e| e.lock().state).unwrap_or(CircuitState::Closed)
	}

	pub fn is_open(&self, peer: &PeerId) -> bool {
		self.current_state(peer) == CircuitState::Open
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn peer() -> PeerId {
		PeerId { base_url: "https://peer.example".into(), actor_id: "bob".into() }
	}

	#[test]
	fn opens_after_threshold() {
		let breaker = PeerCircuitBreaker::new(3, 60);
		let p = peer();
		assert!(breaker.allow(&p));
		breaker.record_failure(&p);
		breaker.record_failure(&p);
		assert!(breaker.allow(&p));
		breaker.record_failure(&p);
		assert!(!breaker.allow(&p));
		assert_eq!(breaker.current_state(&p), CircuitState::Open);
	}

	#[test]
	fn success_resets_streak() {
		let breaker = PeerCircuitBreaker::new(2, 60);
		let p = peer();
		breaker.record_failure(&p);
		breaker.record_success(&p);
		breaker.record_failure(&p);
		assert!(breaker.allow(&p));
	}

	#[test]
	fn half_open_admits_single_probe() {
		let breaker = PeerCircuitBreaker::new(1, 0);
		let p = peer();
		breaker.record_failure(&p);
		assert_eq!(breaker.current_state(&p), CircuitState::Open);
		// cooldown is zero, so the next allow() transitions to half-open
		// and admits exactly one probe.
		assert!(breaker.allow(&p));
		assert_eq!(breaker.current_state(&p), CircuitState::HalfOpen);
		assert!(!breaker.allow(&p));
	}

	#[test]
	fn half_open_success_closes() {
		let breaker = PeerCircuitBreaker::new(1, 0);
		let p = peer();
		breaker.record_failure(&p);
		assert!(breaker.allow(&p));
		breaker.record_success(&p);
		assert_eq!(breaker.current_state(&p), CircuitState::Closed);
	}

	#[test]
	fn half_open_failure_reopens() {
		let breaker = PeerCircuitBreaker::new(1, 0);
		let p = peer();
		breaker.record_failure(&p);
		assert!(breaker.allow(&p));
		breaker.record_failure(&p);
		assert_eq!(breaker.current_state(&p), CircuitState::Open);
	}
}

// vim: ts=4
