//! Subscriber-side pull sync (spec.md §4.6 "Peer Sync"). Fetches the diff
//! backlog for one outbound subscription, replays it through
//! [`crate::callback::CallbackProcessor`], falls back to a full baseline
//! fetch when nothing usable came back, and confirms progress with the
//! publisher so it can prune. This is the concrete [`crate::callback::ResyncTrigger`]
//! that the gap-timeout path in `callback.rs` hands control to.

use std::sync::Arc;

use actingweb_types::prelude::*;

use crate::callback::{CallbackProcessor, Classification, InboundCallback, ResyncTrigger};

/// One page of a publisher's `GET /subscriptions/<subscriber>/<sub_id>`
/// response (spec.md §6).
#[derive(Clone, Debug, serde::Deserialize)]
pub struct SubscriptionFeed {
	pub last_sequence_applied: i64,
	#[serde(default)]
	pub diffs: Vec<FeedDiff>,
}

#[derive(Clone, Debug, serde::Deserialize)]
pub struct FeedDiff {
	pub sequence: i64,
	pub target: String,
	pub subtarget: Option<String>,
	pub data: serde_json::Value,
	#[serde(default, rename = "type")]
	pub kind: Option<String>,
}

/// Outbound HTTP seam for the subscriber side, analogous to [`crate::trust::PeerClient`]
/// on the trust side - keeps `sync_subscription`'s control flow testable
/// without a real network call.
#[async_trait::async_trait]
pub trait SyncPeerClient: Send + Sync {
	async fn fetch_feed(&self, publisher: &PeerId, subscriber: &ActorId, subscription_id: &str) -> ClResult<SubscriptionFeed>;
	async fn fetch_baseline(&self, publisher: &PeerId, target: &str, subtarget: Option<&str>) -> ClResult<serde_json::Value>;
	async fn confirm(&self, publisher: &PeerId, subscriber: &ActorId, subscription_id: &str, sequence: i64) -> ClResult<()>;
}

pub struct SyncEngine {
	storage: Arc<dyn StorageBackend>,
	processor: Arc<CallbackProcessor>,
	peer_client: Arc<dyn SyncPeerClient>,
}

impl SyncEngine {
	pub fn new(storage: Arc<dyn StorageBackend>, processor: Arc<CallbackProcessor>, peer_client: Arc<dyn SyncPeerClient>) -> Self {
		Self { storage, processor, peer_client }
	}

	/// Pulls and replays one outbound subscription (spec.md §4.6 steps 1-4):
	/// fetch diffs, replay any through the processor, fall back to a full
	/// baseline when the feed had nothing new, then confirm with the
	/// publisher so it can prune.
	pub async fn sync_subscription(&self, actor_id: &ActorId, publisher: &PeerId, subscription_id: &str) -> ClResult<()> {
		let sub = self.storage.read_subscription(actor_id, subscription_id).await?;
		let feed = self.peer_client.fetch_feed(publisher, actor_id, subscription_id).await?;

		let mut diffs = feed.diffs;
		diffs.sort_by_key(|d| d.sequence);
		let diffs_fetched = diffs.len();
		let mut diffs_processed = 0usize;

		for diff in diffs {
			let classification = self
				.processor
				.process(
					actor_id,
					publisher,
					subscription_id,
					InboundCallback { sequence: diff.sequence, target: diff.target, subtarget: diff.subtarget, data: diff.data, kind: diff.kind },
				)
				.await?;
			if matches!(classification, Classification::Valid | Classification::FullReset) {
				diffs_processed += 1;
			}
		}

		let last_sequence_applied = if diffs_fetched == 0 || diffs_processed == 0 {
			// Nothing usable came back - either the publisher had nothing, or
			// everything we got was already applied. Fall back to a full
			// baseline fetch and adopt the publisher's notion of progress.
			let baseline = self.peer_client.fetch_baseline(publisher, &sub.target, sub.subtarget.as_deref()).await?;
			self.processor
				.process(
					actor_id,
					publisher,
					subscription_id,
					InboundCallback { sequence: feed.last_sequence_applied, target: sub.target.clone(), subtarget: sub.subtarget.clone(), data: baseline, kind: Some("resync".into()) },
				)
				.await?;
			feed.last_sequence_applied
		} else {
			feed.last_sequence_applied
		};

		self.peer_client.confirm(publisher, actor_id, subscription_id, last_sequence_applied).await
	}
}

#[async_trait::async_trait]
impl ResyncTrigger for SyncEngine {
	async fn resync(&self, actor_id: &ActorId, publisher: &PeerId, subscription_id: &str) -> ClResult<()> {
		self.sync_subscription(actor_id, publisher, subscription_id).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::callback::CallbackHandler;
	use actingweb_storage_memory::MemoryStorage;
	use std::sync::Mutex;

	#[derive(Default)]
	struct RecordingHandler {
		applied: Mutex<Vec<serde_json::Value>>,
	}

	#[async_trait::async_trait]
	impl CallbackHandler for RecordingHandler {
		async fn apply(&self, _actor_id: &ActorId, _publisher: &PeerId, _target: &str, _subtarget: Option<&str>, data: serde_json::Value) -> ClResult<()> {
			self.applied.lock().unwrap_or_else(|e| e.into_inner()).push(data);
			Ok(())
		}
	}

	struct StubResync;
	#[async_trait::async_trait]
	impl ResyncTrigger for StubResync {
		async fn resync(&self, _actor_id: &ActorId, _publisher: &PeerId, _subscription_id: &str) -> ClResult<()> {
			Ok(())
		}
	}

	struct FeedWithDiffs(Vec<FeedDiff>);
	#[async_trait::async_trait]
	impl SyncPeerClient for FeedWithDiffs {
		async fn fetch_feed(&self, _publisher: &PeerId, _subscriber: &ActorId, _subscription_id: &str) -> ClResult<SubscriptionFeed> {
			Ok(SubscriptionFeed { last_sequence_applied: self.0.last().map_or(0, |d| d.sequence), diffs: self.0.clone() })
		}
		async fn fetch_baseline(&self, _publisher: &PeerId, _target: &str, _subtarget: Option<&str>) -> ClResult<serde_json::Value> {
			Ok(serde_json::json!("baseline should not be needed"))
		}
		async fn confirm(&self, _publisher: &PeerId, _subscriber: &ActorId, _subscription_id: &str, _sequence: i64) -> ClResult<()> {
			Ok(())
		}
	}

	struct EmptyFeed;
	#[async_trait::async_trait]
	impl SyncPeerClient for EmptyFeed {
		async fn fetch_feed(&self, _publisher: &PeerId, _subscriber: &ActorId, _subscription_id: &str) -> ClResult<SubscriptionFeed> {
			Ok(SubscriptionFeed { last_sequence_applied: 7, diffs: Vec::new() })
		}
		async fn fetch_baseline(&self, _publisher: &PeerId, _target: &str, _subtarget: Option<&str>) -> ClResult<serde_json::Value> {
			Ok(serde_json::json!("fresh baseline"))
		}
		async fn confirm(&self, _publisher: &PeerId, _subscriber: &ActorId, _subscription_id: &str, sequence: i64) -> ClResult<()> {
			assert_eq!(sequence, 7);
			Ok(())
		}
	}

	fn publisher() -> PeerId {
		PeerId { base_url: "https://b.example".into(), actor_id: "b".into() }
	}

	async fn seeded_subscription(storage: &Arc<dyn StorageBackend>, actor: &ActorId) -> SubscriptionRecord {
		let record = SubscriptionRecord {
			subscription_id: "sub1".into(),
			peer: publisher(),
			callback: true,
			target: "status".into(),
			subtarget: None,
			resource: None,
			granularity: SubscriptionGranularity::High,
			sequence: SequenceId(0),
			last_sequence_applied: SequenceId(0),
			created_at: Timestamp::now(),
		};
		storage.create_subscription(actor, &record).await.expect("seed subscription");
		record
	}

	#[tokio::test]
	async fn replays_fetched_diffs_in_order_and_confirms() {
		let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
		let actor = ActorId::new("a");
		seeded_subscription(&storage, &actor).await;

		let handler = Arc::new(RecordingHandler::default());
		let processor = Arc::new(CallbackProcessor::new(storage.clone(), handler.clone(), Arc::new(StubResync)));
		let diffs = vec![
			FeedDiff { sequence: 2, target: "status".into(), subtarget: None, data: serde_json::json!("away"), kind: None },
			FeedDiff { sequence: 1, target: "status".into(), subtarget: None, data: serde_json::json!("online"), kind: None },
		];
		let sync = SyncEngine::new(storage, processor, Arc::new(FeedWithDiffs(diffs)));

		sync.sync_subscription(&actor, &publisher(), "sub1").await.expect("sync");
		assert_eq!(*handler.applied.lock().unwrap(), vec![serde_json::json!("online"), serde_json::json!("away")]);
	}

	#[tokio::test]
	async fn empty_feed_falls_back_to_baseline() {
		let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
		let actor = ActorId::new("a");
		seeded_subscription(&storage, &actor).await;

		let handler = Arc::new(RecordingHandler::default());
		let processor = Arc::new(CallbackProcessor::new(storage.clone(), handler.clone(), Arc::new(StubResync)));
		let sync = SyncEngine::new(storage, processor, Arc::new(EmptyFeed));

		sync.sync_subscription(&actor, &publisher(), "sub1").await.expect("sync");
		assert_eq!(*handler.applied.lock().unwrap(), vec![serde_json::json!("fresh baseline")]);
	}
}

// vim: ts=4
