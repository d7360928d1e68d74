//! Publisher-side subscription engine (spec.md §4.4, §6 subscription routes).
//! Tracks who is subscribed to what, advances the per-subscription sequence
//! counter, and appends diffs for the fan-out pipeline to deliver. Delivery
//! itself, retries, and the circuit breaker live in [`crate::fanout`].

use dashmap::DashSet;
use std::sync::Arc;

use actingweb_types::prelude::*;

use crate::trust::TrustRegistry;
use crate::utils::random_id;

/// `(target, subtarget)` pairs currently suspended from publishing - used
/// while an application is rebuilding a large property tree so subscribers
/// get one resync instead of a storm of individual diffs (spec.md §4.4, §9).
type SuspensionKey = (Box<str>, Option<Box<str>>);

pub struct SubscriptionEngine {
	storage: Arc<dyn StorageBackend>,
	trust: Arc<TrustRegistry>,
	suspended: DashSet<(String, SuspensionKey)>,
}

impl SubscriptionEngine {
	pub fn new(storage: Arc<dyn StorageBackend>, trust: Arc<TrustRegistry>) -> Self {
		Self { storage, trust, suspended: DashSet::new() }
	}

	/// Registers a subscription record on this actor's storage. `callback`
	/// follows the GLOSSARY convention: `true` marks an outbound subscription
	/// (this actor watching `peer`, driving pull-sync), `false` an inbound
	/// one (`peer` watching this actor, fed by [`publish`]).
	pub async fn subscribe(
		&self,
		actor_id: &ActorId,
		peer: PeerId,
		target: impl Into<String>,
		subtarget: Option<String>,
		resource: Option<String>,
		granularity: SubscriptionGranularity,
		callback: bool,
	) -> ClResult<SubscriptionRecord> {
		let record = SubscriptionRecord {
			subscription_id: random_id(),
			peer,
			callback,
			target: target.into(),
			subtarget,
			resource,
			granularity,
			sequence: SequenceId(0),
			last_sequence_applied: SequenceId(0),
			created_at: Timestamp::now(),
		};
		self.storage.create_subscription(actor_id, &record).await?;
		Ok(record)
	}

	pub async fn unsubscribe(&self, actor_id: &ActorId, subscription_id: &str) -> ClResult<()> {
		self.storage.delete_subscription(actor_id, subscription_id).await
	}

	pub async fn list(&self, actor_id: &ActorId) -> ClResult<Vec<SubscriptionRecord>> {
		self.storage.list_subscriptions(actor_id).await
	}

	pub async fn get(&self, actor_id: &ActorId, subscription_id: &str) -> ClResult<SubscriptionRecord> {
		self.storage.read_subscription(actor_id, subscription_id).await
	}

	/// Subscriber confirms it applied everything up to `seq` (spec.md §6
	/// confirming `PUT`). Diffs at or below `seq` are pruned; nothing is
	/// pruned on the plain `204` poll path (spec.md §9 Open Question: diff
	/// retention is prune-on-confirming-PUT only).
	pub async fn confirm(&self, actor_id: &ActorId, subscription_id: &str, seq: SequenceId) -> ClResult<()> {
		let mut sub = self.storage.read_subscription(actor_id, subscription_id).await?;
		if seq > sub.last_sequence_applied {
			sub.last_sequence_applied = seq;
			self.storage.update_subscription(actor_id, &sub).await?;
		}
		self.storage.prune_diffs(actor_id, subscription_id, seq).await
	}

	pub fn suspend(&self, actor_id: &ActorId, target: &str, subtarget: Option<&str>) {
		self.suspended.insert((actor_id.as_str().to_string(), (target.into(), subtarget.map(Into::into))));
	}

	pub fn resume(&self, actor_id: &ActorId, target: &str, subtarget: Option<&str>) {
		self.suspended.remove(&(actor_id.as_str().to_string(), (target.into(), subtarget.map(Into::into))));
	}

	fn is_suspended(&self, actor_id: &ActorId, target: &str, subtarget: Option<&str>) -> bool {
		self.suspended.contains(&(actor_id.as_str().to_string(), (target.into(), subtarget.map(Into::into))))
	}

	/// Publishes one change to every matching subscriber, advancing each
	/// subscription's sequence and appending a diff entry. Suspended targets
	/// are silently skipped - the caller is expected to resume and then
	/// publish a `resync: true` diff (spec.md §4.4, §9).
	///
	/// Walks **inbound** subscriptions (`callback == false`, per GLOSSARY
	/// "Subscription": others watching us) - our own outbound subscriptions
	/// (`callback == true`, us watching a peer) never receive pushes here,
	/// they drive pull-sync instead (see `crate::sync`).
	pub async fn publish(&self, actor_id: &ActorId, target: &str, subtarget: Option<&str>, blob: serde_json::Value) -> ClResult<()> {
		if self.is_suspended(actor_id, target, subtarget) {
			return Ok(());
		}
		let subs = self.storage.list_subscriptions(actor_id).await?;
		for sub in subs.into_iter().filter(|s| !s.callback && s.target == target && s.subtarget.as_deref() == subtarget) {
			if !self.trust.check_permission(actor_id, &sub.peer, Category::Properties, target, Some(Operation::Read)).await {
				continue;
			}
			self.emit(actor_id, &sub.subscription_id, target, subtarget, blob.clone(), false).await?;
		}
		Ok(())
	}

	/// Forces every callback subscriber on `target` to resync from scratch -
	/// used after a suspended bulk rewrite (spec.md §4.4).
	pub async fn publish_resync(&self, actor_id: &ActorId, target: &str, subtarget: Option<&str>) -> ClResult<()> {
		let subs = self.storage.list_subscriptions(actor_id).await?;
		for sub in subs.into_iter().filter(|s| !s.callback && s.target == target && s.subtarget.as_deref() == subtarget) {
			if !self.trust.check_permission(actor_id, &sub.peer, Category::Properties, target, Some(Operation::Read)).await {
				continue;
			}
			self.emit(actor_id, &sub.subscription_id, target, subtarget, serde_json::Value::Null, true).await?;
		}
		Ok(())
	}

	async fn emit(&self, actor_id: &ActorId, subscription_id: &str, target: &str, subtarget: Option<&str>, blob: serde_json::Value, resync: bool) -> ClResult<()> {
		let seq = self.storage.increase_seq(actor_id, subscription_id).await?;
		self.storage
			.append_diff(
				actor_id,
				subscription_id,
				DiffEntry { sequence: SequenceId(seq), target: target.to_string(), subtarget: subtarget.map(str::to_string), blob, resync, created_at: Timestamp::now() },
			)
			.await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::permission::PermissionEvaluator;
	use crate::trust::PeerClient;
	use crate::trust_types::TrustTypeCatalog;
	use actingweb_storage_memory::MemoryStorage;

	struct NoPeerContact;
	#[async_trait::async_trait]
	impl PeerClient for NoPeerContact {
		async fn initiate(&self, _peer_base_url: &str, _relationship: &str, _req: &crate::trust::TrustHandshakeRequest) -> ClResult<()> {
			Ok(())
		}
		async fn verify(&self, _peer_base_url: &str, _relationship: &str, _local_actor_id: &str, _verification_token: &str) -> ClResult<bool> {
			Ok(true)
		}
		async fn notify_approved(&self, _peer_base_url: &str, _relationship: &str, _local_actor_id: &str) -> ClResult<()> {
			Ok(())
		}
	}

	/// Builds an engine backed by `storage`, with an active `friend` (read-only)
	/// trust relationship already established toward `peer` so `publish`'s
	/// permission filter lets diffs through in tests that don't exercise it.
	async fn engine_with_trusted_peer(storage: Arc<dyn StorageBackend>, actor: &ActorId, peer: &PeerId) -> SubscriptionEngine {
		let trust = Arc::new(TrustRegistry::new(
			storage.clone(),
			Arc::new(TrustTypeCatalog::with_defaults()),
			Arc::new(PermissionEvaluator::new(64)),
			Arc::new(NoPeerContact),
			"https://a.example",
		));
		storage
			.create_trust(
				actor,
				&TrustRecord {
					peer: peer.clone(),
					peer_identifier: peer.actor_id.clone(),
					trust_type: "friend".into(),
					secret: "s".into(),
					peer_secret: None,
					verification_token: None,
					approved: true,
					peer_approved: true,
					established_via: EstablishedVia::Actingweb,
					desc: None,
					created_at: Timestamp::now(),
					last_accessed: Timestamp::now(),
				},
			)
			.await
			.expect("seed trust");
		SubscriptionEngine::new(storage, trust)
	}

	async fn engine() -> SubscriptionEngine {
		let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
		let actor = ActorId::new("a");
		engine_with_trusted_peer(storage, &actor, &peer()).await
	}

	fn peer() -> PeerId {
		PeerId { base_url: "https://b.example".into(), actor_id: "b".into() }
	}

	#[tokio::test]
	async fn publish_appends_diff_with_monotonic_sequence() {
		let engine = engine().await;
		let actor = ActorId::new("a");
		let sub = engine.subscribe(&actor, peer(), "status", None, None, SubscriptionGranularity::High, false).await.expect("subscribe");
		engine.publish(&actor, "status", None, serde_json::json!("online")).await.expect("publish 1");
		engine.publish(&actor, "status", None, serde_json::json!("away")).await.expect("publish 2");

		let diffs = engine.storage.read_diffs(&actor, &sub.subscription_id).await.expect("read");
		assert_eq!(diffs.len(), 2);
		assert_eq!(diffs[0].sequence, SequenceId(1));
		assert_eq!(diffs[1].sequence, SequenceId(2));
	}

	#[tokio::test]
	async fn confirming_put_prunes_but_204_poll_does_not() {
		let engine = engine().await;
		let actor = ActorId::new("a");
		let sub = engine.subscribe(&actor, peer(), "status", None, None, SubscriptionGranularity::High, false).await.expect("subscribe");
		engine.publish(&actor, "status", None, serde_json::json!("online")).await.expect("publish");

		let diffs_before = engine.storage.read_diffs(&actor, &sub.subscription_id).await.expect("read");
		assert_eq!(diffs_before.len(), 1);

		engine.confirm(&actor, &sub.subscription_id, SequenceId(1)).await.expect("confirm");
		let diffs_after = engine.storage.read_diffs(&actor, &sub.subscription_id).await.expect("read");
		assert!(diffs_after.is_empty());
	}

	#[tokio::test]
	async fn suspended_target_is_skipped_until_resumed() {
		let engine = engine().await;
		let actor = ActorId::new("a");
		let sub = engine.subscribe(&actor, peer(), "status", None, None, SubscriptionGranularity::High, false).await.expect("subscribe");
		engine.suspend(&actor, "status", None);
		engine.publish(&actor, "status", None, serde_json::json!("online")).await.expect("publish while suspended");
		assert!(engine.storage.read_diffs(&actor, &sub.subscription_id).await.expect("read").is_empty());

		engine.resume(&actor, "status", None);
		engine.publish_resync(&actor, "status", None).await.expect("resync");
		let diffs = engine.storage.read_diffs(&actor, &sub.subscription_id).await.expect("read");
		assert_eq!(diffs.len(), 1);
		assert!(diffs[0].resync);
	}

	/// spec.md §4.4 step 2: a subscriber with no active (or insufficient)
	/// trust on the affected path must not receive the diff at all.
	#[tokio::test]
	async fn publish_skips_subscribers_without_permission() {
		let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
		let actor = ActorId::new("a");
		let trust = Arc::new(TrustRegistry::new(
			storage.clone(),
			Arc::new(TrustTypeCatalog::with_defaults()),
			Arc::new(PermissionEvaluator::new(64)),
			Arc::new(NoPeerContact),
			"https://a.example",
		));
		// No trust relationship is ever created toward `peer()` here.
		let engine = SubscriptionEngine::new(storage, trust);
		let sub = engine.subscribe(&actor, peer(), "status", None, None, SubscriptionGranularity::High, false).await.expect("subscribe");
		engine.publish(&actor, "status", None, serde_json::json!("online")).await.expect("publish");

		let diffs = engine.storage.read_diffs(&actor, &sub.subscription_id).await.expect("read");
		assert!(diffs.is_empty(), "an untrusted subscriber must not receive a diff");
	}
}

// vim: ts=4
