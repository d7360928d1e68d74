//! Fan-out manager (spec.md §4.6): delivers queued diffs to subscribers in
//! parallel, bounded by a worker pool, behind a per-peer circuit breaker with
//! exponential-backoff retry. Never prunes a diff on a successful delivery -
//! only a subscriber's confirming `PUT` does that (spec.md §4.6 "Diff
//! retention rule").

use rand::RngExt;
use std::sync::Arc;
use std::time::Duration;

use actingweb_core::circuit_breaker::PeerCircuitBreaker;
use actingweb_types::prelude::*;

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF_MS: u64 = 200;

/// The wire shape of a delivered callback (spec.md §6 "Callback payload
/// format"). `sequence` is always an integer, never a boolean.
#[derive(Clone, Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
	pub id: String,
	pub subscriptionid: String,
	pub sequence: i64,
	pub target: String,
	pub subtarget: Option<String>,
	pub data: serde_json::Value,
	pub timestamp: i64,
	#[serde(rename = "type", skip_serializing_if = "Option::is_none")]
	pub kind: Option<String>,
}

/// How a delivery attempt resolved, classifying which responses are
/// terminal vs. worth retrying (spec.md §4.6: "4xx (except 429) are
/// terminal; 429 pauses the peer").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryOutcome {
	Success,
	RateLimited,
	TerminalRejection,
	Transient,
}

#[async_trait::async_trait]
pub trait CallbackSender: Send + Sync {
	async fn send(&self, peer: &PeerId, subscription_id: &str, payload: &CallbackPayload) -> DeliveryOutcome;
}

pub struct FanOutTask {
	pub actor_id: ActorId,
	pub peer: PeerId,
	pub subscription_id: String,
	pub diff: DiffEntry,
}

pub struct FanOutManager {
	circuit_breaker: Arc<PeerCircuitBreaker>,
	sender: Arc<dyn CallbackSender>,
}

impl FanOutManager {
	pub fn new(circuit_breaker: Arc<PeerCircuitBreaker>, sender: Arc<dyn CallbackSender>) -> Self {
		Self { circuit_breaker, sender }
	}

	/// Spawns `worker_count` tokio tasks draining `receiver` concurrently -
	/// spec.md §5 "per-peer callbacks are delivered in parallel from a
	/// bounded pool".
	pub fn spawn_workers(self: Arc<Self>, receiver: flume::Receiver<FanOutTask>, worker_count: usize) {
		for _ in 0..worker_count {
			let manager = self.clone();
			let receiver = receiver.clone();
			tokio::spawn(async move {
				while let Ok(task) = receiver.recv_async().await {
					manager.deliver(task).await;
				}
			});
		}
	}

	/// Delivers one task, respecting the peer's circuit breaker and retrying
	/// transient failures with jittered exponential backoff. Never prunes the
	/// diff - that happens only via the subscriber's confirming `PUT`.
	pub async fn deliver(&self, task: FanOutTask) {
		if !self.circuit_breaker.allow(&task.peer) {
			tracing::debug!(peer = %task.peer, "circuit breaker open, skipping delivery");
			return;
		}

		let payload = CallbackPayload {
			id: task.actor_id.to_string(),
			subscriptionid: task.subscription_id.clone(),
			sequence: task.diff.sequence.0,
			target: task.diff.target.clone(),
			subtarget: task.diff.subtarget.clone(),
			data: task.diff.blob.clone(),
			timestamp: task.diff.created_at.0,
			kind: task.diff.resync.then(|| "resync".to_string()),
		};

		let mut attempt = 0;
		loop {
			attempt += 1;
			match self.sender.send(&task.peer, &task.subscription_id, &payload).await {
				DeliveryOutcome::Success => {
					self.circuit_breaker.record_success(&task.peer);
					return;
				}
				DeliveryOutcome::TerminalRejection => {
					self.circuit_breaker.record_success(&task.peer);
					tracing::warn!(peer = %task.peer, "callback terminally rejected, not retrying");
					return;
				}
				DeliveryOutcome::RateLimited => {
					self.circuit_breaker.record_failure(&task.peer);
					tracing::debug!(peer = %task.peer, "peer rate-limited delivery");
					return;
				}
				DeliveryOutcome::Transient if attempt < MAX_ATTEMPTS => {
					let backoff = BASE_BACKOFF_MS * 2u64.pow(attempt - 1);
					let jitter = rand::rng().random_range(0..BASE_BACKOFF_MS);
					tokio::time::sleep(Duration::from_millis(backoff + jitter)).await;
				}
				DeliveryOutcome::Transient => {
					self.circuit_breaker.record_failure(&task.peer);
					tracing::warn!(peer = %task.peer, attempts = attempt, "callback delivery exhausted retries");
					return;
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicU32, Ordering};

	fn peer() -> PeerId {
		PeerId { base_url: "https://b.example".into(), actor_id: "b".into() }
	}

	fn diff() -> DiffEntry {
		DiffEntry { sequence: SequenceId(1), target: "status".into(), subtarget: None, blob: serde_json::json!("online"), resync: false, created_at: Timestamp::now() }
	}

	struct AlwaysSucceeds;
	#[async_trait::async_trait]
	impl CallbackSender for AlwaysSucceeds {
		async fn send(&self, _peer: &PeerId, _subscription_id: &str, _payload: &CallbackPayload) -> DeliveryOutcome {
			DeliveryOutcome::Success
		}
	}

	struct FailsNTimesThenSucceeds {
		remaining_failures: AtomicU32,
	}
	#[async_trait::async_trait]
	impl CallbackSender for FailsNTimesThenSucceeds {
		async fn send(&self, _peer: &PeerId, _subscription_id: &str, _payload: &CallbackPayload) -> DeliveryOutcome {
			if self.remaining_failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| if n > 0 { Some(n - 1) } else { None }).is_ok() {
				DeliveryOutcome::Transient
			} else {
				DeliveryOutcome::Success
			}
		}
	}

	struct AlwaysFails;
	#[async_trait::async_trait]
	impl CallbackSender for AlwaysFails {
		async fn send(&self, _peer: &PeerId, _subscription_id: &str, _payload: &CallbackPayload) -> DeliveryOutcome {
			DeliveryOutcome::Transient
		}
	}

	#[tokio::test]
	async fn successful_delivery_closes_the_breaker() {
		let breaker = Arc::new(PeerCircuitBreaker::new(5, 60));
		let manager = FanOutManager::new(breaker.clone(), Arc::new(AlwaysSucceeds));
		manager.deliver(FanOutTask { actor_id: ActorId::new("a"), peer: peer(), subscription_id: "sub1".into(), diff: diff() }).await;
		assert_eq!(breaker.current_state(&peer()), actingweb_core::circuit_breaker::CircuitState::Closed);
	}

	#[tokio::test]
	async fn transient_failure_retries_then_succeeds() {
		let breaker = Arc::new(PeerCircuitBreaker::new(5, 60));
		let sender = Arc::new(FailsNTimesThenSucceeds { remaining_failures: AtomicU32::new(2) });
		let manager = FanOutManager::new(breaker.clone(), sender);
		manager.deliver(FanOutTask { actor_id: ActorId::new("a"), peer: peer(), subscription_id: "sub1".into(), diff: diff() }).await;
		assert_eq!(breaker.current_state(&peer()), actingweb_core::circuit_breaker::CircuitState::Closed);
	}

	#[tokio::test]
	async fn exhausted_retries_records_a_failure() {
		let breaker = Arc::new(PeerCircuitBreaker::new(1, 60));
		let manager = FanOutManager::new(breaker.clone(), Arc::new(AlwaysFails));
		manager.deliver(FanOutTask { actor_id: ActorId::new("a"), peer: peer(), subscription_id: "sub1".into(), diff: diff() }).await;
		assert!(breaker.is_open(&peer()));
	}

	#[tokio::test]
	async fn open_breaker_skips_delivery_entirely() {
		let breaker = Arc::new(PeerCircuitBreaker::new(1, 3600));
		breaker.record_failure(&peer());
		assert!(breaker.is_open(&peer()));
		let manager = FanOutManager::new(breaker.clone(), Arc::new(AlwaysSucceeds));
		manager.deliver(FanOutTask { actor_id: ActorId::new("a"), peer: peer(), subscription_id: "sub1".into(), diff: diff() }).await;
		// still open: allow() never returned true, so the sender was never invoked.
		assert!(breaker.is_open(&peer()));
	}
}

// vim: ts=4
