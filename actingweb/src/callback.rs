//! Callback processor (subscriber side, spec.md §4.5). Validates inbound
//! callback sequencing against per-subscription state held as an opaque JSON
//! blob under the generic CAS primitive (spec.md §9 "optimistic-lock loops ->
//! CAS API"), retrying on version conflict per spec.md §5.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use actingweb_types::prelude::*;

const NAMESPACE: &str = "callback_processor";
const DEFAULT_MAX_PENDING: usize = 100;
const DEFAULT_GAP_TIMEOUT_SECONDS: i64 = 5;
const CAS_RETRY_LIMIT: u32 = 3;
const CAS_BACKOFF_MS: [u64; 3] = [10, 20, 40];

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
struct ProcessorState {
	last_sequence_applied: i64,
	pending: Vec<PendingCallback>,
	gap_deadline: Option<i64>,
	/// Set while a resync handoff is in flight for this subscription
	/// (spec.md §4.5 "mark `resync_pending`"), so a concurrent `process()`
	/// call reading this record mid-resync can tell one is outstanding.
	/// Cleared by the next state this subscription persists.
	#[serde(default)]
	resync_pending: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
struct PendingCallback {
	sequence: i64,
	target: String,
	subtarget: Option<String>,
	data: serde_json::Value,
}

/// The classification a single inbound callback resolves to (spec.md §4.5
/// table), carrying the exact HTTP status the route handler must return.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Classification {
	Valid,
	Gap,
	GapQueueFull,
	Duplicate,
	ResyncTriggered,
	FullReset,
}

impl Classification {
	pub fn status_code(self) -> u16 {
		match self {
			Classification::Valid | Classification::Gap | Classification::Duplicate | Classification::FullReset => 204,
			Classification::GapQueueFull => 429,
			Classification::ResyncTriggered => 200,
		}
	}
}

#[derive(Clone, Debug)]
pub struct InboundCallback {
	pub sequence: i64,
	pub target: String,
	pub subtarget: Option<String>,
	pub data: serde_json::Value,
	pub kind: Option<String>,
}

/// Invoked once per callback that the state machine decides to apply, in
/// sequence order (spec.md §4.5 "process them in the same manner" for any
/// contiguous pending run). Returning `Err` aborts that callback's apply
/// without advancing `last_sequence_applied` past it.
#[async_trait::async_trait]
pub trait CallbackHandler: Send + Sync {
	async fn apply(&self, actor_id: &ActorId, publisher: &PeerId, target: &str, subtarget: Option<&str>, data: serde_json::Value) -> ClResult<()>;
}

/// Runs `crate::sync::sync_subscription` synchronously once a gap has aged
/// past `gap_timeout` (spec.md §4.5 RESYNC_TRIGGERED, §4.6). A trait so
/// `callback.rs` doesn't depend on `sync.rs`'s HTTP client wiring directly.
#[async_trait::async_trait]
pub trait ResyncTrigger: Send + Sync {
	async fn resync(&self, actor_id: &ActorId, publisher: &PeerId, subscription_id: &str) -> ClResult<()>;
}

pub struct CallbackProcessor {
	storage: Arc<dyn StorageBackend>,
	handler: Arc<dyn CallbackHandler>,
	resync: Arc<dyn ResyncTrigger>,
	max_pending: usize,
	gap_timeout_seconds: i64,
}

impl CallbackProcessor {
	pub fn new(storage: Arc<dyn StorageBackend>, handler: Arc<dyn CallbackHandler>, resync: Arc<dyn ResyncTrigger>) -> Self {
		Self { storage, handler, resync, max_pending: DEFAULT_MAX_PENDING, gap_timeout_seconds: DEFAULT_GAP_TIMEOUT_SECONDS }
	}

	pub fn max_pending(mut self, n: usize) -> Self {
		self.max_pending = n;
		self
	}

	pub fn gap_timeout_seconds(mut self, s: i64) -> Self {
		self.gap_timeout_seconds = s;
		self
	}

	fn key(publisher: &PeerId, subscription_id: &str) -> String {
		format!("{}|{subscription_id}", publisher.base_url)
	}

	async fn load(&self, actor_id: &ActorId, key: &str) -> ClResult<(ProcessorState, Option<u64>)> {
		match self.storage.read_versioned(actor_id, NAMESPACE, key).await? {
			Some(versioned) => {
				let state: ProcessorState = serde_json::from_value(versioned.value)?;
				Ok((state, Some(versioned.version)))
			}
			None => Ok((ProcessorState::default(), None)),
		}
	}

	/// Persists the result of `mutate` via CAS, retrying up to
	/// [`CAS_RETRY_LIMIT`] times with backoff on version conflict (spec.md §5
	/// "retry limit 3 + exponential backoff"). `mutate` is reapplied against
	/// the freshly-reloaded state on every retry rather than being discarded,
	/// so a conflicted write never silently drops the caller's intended
	/// transition (spec.md §4.5 "Ordering invariant").
	async fn save<F>(&self, actor_id: &ActorId, key: &str, initial: (ProcessorState, Option<u64>), mutate: F) -> ClResult<ProcessorState>
	where
		F: Fn(ProcessorState) -> ProcessorState,
	{
		let (mut state, mut expected_version) = initial;
		for attempt in 0..CAS_RETRY_LIMIT {
			let candidate = mutate(state);
			match self
				.storage
				.compare_and_swap(actor_id, NAMESPACE, key, expected_version, serde_json::to_value(&candidate)?)
				.await
			{
				Ok(_) => return Ok(candidate),
				Err(Error::Conflict(_, _)) => {
					tokio::time::sleep(std::time::Duration::from_millis(CAS_BACKOFF_MS[attempt as usize])).await;
					let (fresh, version) = self.load(actor_id, key).await?;
					state = fresh;
					expected_version = version;
				}
				Err(other) => return Err(other),
			}
		}
		Err(Error::ServiceUnavailable("callback processor CAS retries exhausted".into()))
	}

	/// Processes one inbound callback for `actor_id` as subscriber of
	/// `publisher`'s `subscription_id`, returning the classification whose
	/// `status_code()` the HTTP handler must answer with.
	pub async fn process(&self, actor_id: &ActorId, publisher: &PeerId, subscription_id: &str, callback: InboundCallback) -> ClResult<Classification> {
		let key = Self::key(publisher, subscription_id);

		if callback.kind.as_deref() == Some("resync") {
			let (_, version) = self.load(actor_id, &key).await?;
			self.handler.apply(actor_id, publisher, &callback.target, callback.subtarget.as_deref(), callback.data).await?;
			let sequence = callback.sequence;
			self.save(actor_id, &key, (ProcessorState::default(), version), move |_| ProcessorState {
				last_sequence_applied: sequence,
				pending: Vec::new(),
				gap_deadline: None,
				resync_pending: false,
			})
			.await?;
			return Ok(Classification::FullReset);
		}

		let (state, version) = self.load(actor_id, &key).await?;
		let l = state.last_sequence_applied;
		let s = callback.sequence;

		if s <= l {
			return Ok(Classification::Duplicate);
		}

		if s > l + 1 {
			let gap_expired = state.gap_deadline.is_some_and(|deadline| Timestamp::now().0 >= deadline);
			if gap_expired {
				// Clear pending, reset last_sequence_applied and mark
				// resync_pending *before* handing control to the resync
				// handler (spec.md §4.5). The handler re-enters `process`/
				// `save` on this same record one or more times, so the reset
				// must already be durable before that happens - persisting it
				// afterward would race the handler's own writes with a stale
				// version.
				let reset = ProcessorState { last_sequence_applied: 0, pending: Vec::new(), gap_deadline: None, resync_pending: true };
				self.save(actor_id, &key, (state, version), move |_| reset.clone()).await?;
				self.resync.resync(actor_id, publisher, subscription_id).await?;
				return Ok(Classification::ResyncTriggered);
			}
			if state.pending.len() >= self.max_pending {
				return Ok(Classification::GapQueueFull);
			}
			let pending_entry = PendingCallback { sequence: s, target: callback.target, subtarget: callback.subtarget, data: callback.data };
			let deadline = Timestamp::from_now(self.gap_timeout_seconds).0;
			self.save(actor_id, &key, (state, version), move |mut fresh| {
				if !fresh.pending.iter().any(|p| p.sequence == pending_entry.sequence) {
					fresh.pending.push(pending_entry.clone());
					fresh.pending.sort_by_key(|p| p.sequence);
				}
				if fresh.gap_deadline.is_none() {
					fresh.gap_deadline = Some(deadline);
				}
				fresh
			})
			.await?;
			return Ok(Classification::Gap);
		}

		// VALID: S == L + 1. Handler runs BEFORE the sequence advances -
		// `last_sequence_applied` must only move after a successful apply, or
		// a retried delivery after a handler failure would be misclassified
		// as DUPLICATE instead of being retried (spec.md §4.5 "Ordering
		// invariant").
		self.handler.apply(actor_id, publisher, &callback.target, callback.subtarget.as_deref(), callback.data).await?;

		// Drain any contiguous run already queued in pending, against our
		// local view. The delta this produces (new last_sequence_applied,
		// the set of sequences just applied) is reapplied against whatever
		// is actually current at save time, so a conflicting concurrent
		// write never gets its own pending entries silently discarded.
		let mut drain_state = state.clone();
		drain_state.last_sequence_applied = s;
		let mut applied_sequences = vec![s];
		while let Some(pos) = drain_state.pending.iter().position(|p| p.sequence == drain_state.last_sequence_applied + 1) {
			let next = drain_state.pending.remove(pos);
			self.handler.apply(actor_id, publisher, &next.target, next.subtarget.as_deref(), next.data).await?;
			drain_state.last_sequence_applied = next.sequence;
			applied_sequences.push(next.sequence);
		}
		let final_sequence = drain_state.last_sequence_applied;

		self.save(actor_id, &key, (state, version), move |mut fresh| {
			if fresh.last_sequence_applied < final_sequence {
				fresh.last_sequence_applied = final_sequence;
			}
			fresh.pending.retain(|p| !applied_sequences.contains(&p.sequence));
			if fresh.pending.is_empty() {
				fresh.gap_deadline = None;
			}
			fresh.resync_pending = false;
			fresh
		})
		.await?;
		Ok(Classification::Valid)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use actingweb_storage_memory::MemoryStorage;
	use async_trait::async_trait;
	use std::collections::HashMap;
	use std::sync::Mutex;

	#[derive(Default)]
	struct RecordingHandler {
		applied: Mutex<Vec<i64>>,
		fail_once_for: Mutex<Option<i64>>,
	}

	#[async_trait::async_trait]
	impl CallbackHandler for RecordingHandler {
		async fn apply(&self, _actor_id: &ActorId, _publisher: &PeerId, _target: &str, _subtarget: Option<&str>, data: serde_json::Value) -> ClResult<()> {
			let seq = data.get("seq").and_then(serde_json::Value::as_i64).unwrap_or_default();
			let mut fail_once = self.fail_once_for.lock().unwrap_or_else(|e| e.into_inner());
			if *fail_once == Some(seq) {
				*fail_once = None;
				return Err(Error::Internal("forced handler failure".into()));
			}
			self.applied.lock().unwrap_or_else(|e| e.into_inner()).push(seq);
			Ok(())
		}
	}

	struct NeverResync;
	#[async_trait::async_trait]
	impl ResyncTrigger for NeverResync {
		async fn resync(&self, _actor_id: &ActorId, _publisher: &PeerId, _subscription_id: &str) -> ClResult<()> {
			Ok(())
		}
	}

	/// Wraps a [`StorageBackend`] so the first `compare_and_swap` call on a
	/// given `(namespace, key)` fails with `Error::Conflict`, simulating a
	/// concurrent writer winning the race, while every other call and every
	/// other method passes straight through (spec.md §4.5 line 129 requires
	/// the ordering invariant to be verified under a forced CAS conflict).
	#[derive(Debug)]
	struct ConflictOnceStorage {
		inner: MemoryStorage,
		armed: Mutex<HashMap<String, bool>>,
	}

	impl ConflictOnceStorage {
		fn new() -> Self {
			Self { inner: MemoryStorage::new(), armed: Mutex::new(HashMap::new()) }
		}
	}

	#[async_trait]
	impl AttributeBuckets for ConflictOnceStorage {
		async fn bucket_get(&self, actor_id: &ActorId, bucket: &str, key: &str) -> ClResult<Option<serde_json::Value>> {
			self.inner.bucket_get(actor_id, bucket, key).await
		}
		async fn bucket_put(&self, actor_id: &ActorId, bucket: &str, key: &str, value: serde_json::Value) -> ClResult<()> {
			self.inner.bucket_put(actor_id, bucket, key, value).await
		}
		async fn bucket_delete(&self, actor_id: &ActorId, bucket: &str, key: &str) -> ClResult<()> {
			self.inner.bucket_delete(actor_id, bucket, key).await
		}
		async fn bucket_list(&self, actor_id: &ActorId, bucket: &str) -> ClResult<HashMap<String, serde_json::Value>> {
			self.inner.bucket_list(actor_id, bucket).await
		}
		async fn bucket_delete_all(&self, actor_id: &ActorId, bucket: &str) -> ClResult<()> {
			self.inner.bucket_delete_all(actor_id, bucket).await
		}
	}

	#[async_trait]
	impl StorageBackend for ConflictOnceStorage {
		async fn create_actor(&self, actor: &ActorRecord) -> ClResult<()> {
			self.inner.create_actor(actor).await
		}
		async fn read_actor(&self, actor_id: &ActorId) -> ClResult<ActorRecord> {
			self.inner.read_actor(actor_id).await
		}
		async fn find_actor_by_creator(&self, actor_type: &str, creator: &str) -> ClResult<Option<ActorRecord>> {
			self.inner.find_actor_by_creator(actor_type, creator).await
		}
		async fn delete_actor(&self, actor_id: &ActorId) -> ClResult<()> {
			self.inner.delete_actor(actor_id).await
		}
		async fn list_actors_by_type(&self, actor_type: &str) -> ClResult<Vec<ActorRecord>> {
			self.inner.list_actors_by_type(actor_type).await
		}

		async fn read_property(&self, actor_id: &ActorId, name: &str) -> ClResult<Option<PropertyRecord>> {
			self.inner.read_property(actor_id, name).await
		}
		async fn read_properties(&self, actor_id: &ActorId) -> ClResult<HashMap<String, PropertyRecord>> {
			self.inner.read_properties(actor_id).await
		}
		async fn write_property(
			&self,
			actor_id: &ActorId,
			name: &str,
			value: serde_json::Value,
			expected_version: Option<u64>,
		) -> ClResult<PropertyRecord> {
			self.inner.write_property(actor_id, name, value, expected_version).await
		}
		async fn delete_property(&self, actor_id: &ActorId, name: &str) -> ClResult<()> {
			self.inner.delete_property(actor_id, name).await
		}
		async fn delete_all_properties(&self, actor_id: &ActorId) -> ClResult<()> {
			self.inner.delete_all_properties(actor_id).await
		}

		async fn list_property_items(&self, actor_id: &ActorId, list_name: &str) -> ClResult<Vec<ListPropertyItem>> {
			self.inner.list_property_items(actor_id, list_name).await
		}
		async fn list_append(&self, actor_id: &ActorId, list_name: &str, value: serde_json::Value) -> ClResult<ListPropertyItem> {
			self.inner.list_append(actor_id, list_name, value).await
		}
		async fn list_update(&self, actor_id: &ActorId, list_name: &str, item_id: &str, value: serde_json::Value) -> ClResult<()> {
			self.inner.list_update(actor_id, list_name, item_id, value).await
		}
		async fn list_delete(&self, actor_id: &ActorId, list_name: &str, item_id: &str) -> ClResult<()> {
			self.inner.list_delete(actor_id, list_name, item_id).await
		}

		async fn read_versioned(&self, actor_id: &ActorId, namespace: &str, key: &str) -> ClResult<Option<VersionedRecord<serde_json::Value>>> {
			self.inner.read_versioned(actor_id, namespace, key).await
		}

		async fn compare_and_swap(
			&self,
			actor_id: &ActorId,
			namespace: &str,
			key: &str,
			expected_version: Option<u64>,
			new_value: serde_json::Value,
		) -> ClResult<VersionedRecord<serde_json::Value>> {
			let slot = format!("{namespace}|{key}");
			let should_conflict = {
				let mut armed = self.armed.lock().unwrap_or_else(|e| e.into_inner());
				let first_call = !armed.contains_key(&slot);
				armed.insert(slot, true);
				first_call
			};
			if should_conflict {
				return Err(Error::Conflict(Domain::Core, "forced test conflict".into()));
			}
			self.inner.compare_and_swap(actor_id, namespace, key, expected_version, new_value).await
		}

		async fn create_trust(&self, actor_id: &ActorId, trust: &TrustRecord) -> ClResult<()> {
			self.inner.create_trust(actor_id, trust).await
		}
		async fn read_trust(&self, actor_id: &ActorId, peer: &PeerId) -> ClResult<TrustRecord> {
			self.inner.read_trust(actor_id, peer).await
		}
		async fn update_trust(&self, actor_id: &ActorId, trust: &TrustRecord) -> ClResult<()> {
			self.inner.update_trust(actor_id, trust).await
		}
		async fn delete_trust(&self, actor_id: &ActorId, peer: &PeerId) -> ClResult<()> {
			self.inner.delete_trust(actor_id, peer).await
		}
		async fn list_trusts(&self, actor_id: &ActorId, trust_type: Option<&str>) -> ClResult<Vec<TrustRecord>> {
			self.inner.list_trusts(actor_id, trust_type).await
		}

		async fn read_override(&self, actor_id: &ActorId, peer: &PeerId) -> ClResult<Option<PermissionOverrideRecord>> {
			self.inner.read_override(actor_id, peer).await
		}
		async fn write_override(&self, actor_id: &ActorId, record: &PermissionOverrideRecord) -> ClResult<()> {
			self.inner.write_override(actor_id, record).await
		}
		async fn delete_override(&self, actor_id: &ActorId, peer: &PeerId) -> ClResult<()> {
			self.inner.delete_override(actor_id, peer).await
		}

		async fn create_subscription(&self, actor_id: &ActorId, sub: &SubscriptionRecord) -> ClResult<()> {
			self.inner.create_subscription(actor_id, sub).await
		}
		async fn read_subscription(&self, actor_id: &ActorId, subscription_id: &str) -> ClResult<SubscriptionRecord> {
			self.inner.read_subscription(actor_id, subscription_id).await
		}
		async fn update_subscription(&self, actor_id: &ActorId, sub: &SubscriptionRecord) -> ClResult<()> {
			self.inner.update_subscription(actor_id, sub).await
		}
		async fn delete_subscription(&self, actor_id: &ActorId, subscription_id: &str) -> ClResult<()> {
			self.inner.delete_subscription(actor_id, subscription_id).await
		}
		async fn list_subscriptions(&self, actor_id: &ActorId) -> ClResult<Vec<SubscriptionRecord>> {
			self.inner.list_subscriptions(actor_id).await
		}
		async fn increase_seq(&self, actor_id: &ActorId, subscription_id: &str) -> ClResult<i64> {
			self.inner.increase_seq(actor_id, subscription_id).await
		}

		async fn append_diff(&self, actor_id: &ActorId, subscription_id: &str, diff: DiffEntry) -> ClResult<()> {
			self.inner.append_diff(actor_id, subscription_id, diff).await
		}
		async fn read_diffs(&self, actor_id: &ActorId, subscription_id: &str) -> ClResult<Vec<DiffEntry>> {
			self.inner.read_diffs(actor_id, subscription_id).await
		}
		async fn prune_diffs(&self, actor_id: &ActorId, subscription_id: &str, seq: SequenceId) -> ClResult<()> {
			self.inner.prune_diffs(actor_id, subscription_id, seq).await
		}

		async fn read_delivery_cursor(&self, actor_id: &ActorId, peer: &PeerId) -> ClResult<Option<DeliveryCursor>> {
			self.inner.read_delivery_cursor(actor_id, peer).await
		}
		async fn write_delivery_cursor(&self, actor_id: &ActorId, cursor: &DeliveryCursor) -> ClResult<()> {
			self.inner.write_delivery_cursor(actor_id, cursor).await
		}

		async fn create_oauth_client(&self, client: &OAuth2ClientRecord) -> ClResult<()> {
			self.inner.create_oauth_client(client).await
		}
		async fn read_oauth_client(&self, client_id: &str) -> ClResult<OAuth2ClientRecord> {
			self.inner.read_oauth_client(client_id).await
		}
		async fn delete_oauth_client(&self, client_id: &str) -> ClResult<()> {
			self.inner.delete_oauth_client(client_id).await
		}
		async fn create_oauth_token(&self, token: &OAuth2TokenRecord) -> ClResult<()> {
			self.inner.create_oauth_token(token).await
		}
		async fn read_oauth_token(&self, access_token: &str) -> ClResult<OAuth2TokenRecord> {
			self.inner.read_oauth_token(access_token).await
		}
		async fn delete_oauth_token(&self, access_token: &str) -> ClResult<()> {
			self.inner.delete_oauth_token(access_token).await
		}

		async fn create_login_session(&self, session: &LoginSessionRecord) -> ClResult<()> {
			self.inner.create_login_session(session).await
		}
		async fn read_login_session(&self, session_id: &str) -> ClResult<Option<LoginSessionRecord>> {
			self.inner.read_login_session(session_id).await
		}
		async fn delete_login_session(&self, session_id: &str) -> ClResult<()> {
			self.inner.delete_login_session(session_id).await
		}
	}

	fn publisher() -> PeerId {
		PeerId { base_url: "https://b.example".into(), actor_id: "b".into() }
	}

	fn callback(seq: i64) -> InboundCallback {
		InboundCallback { sequence: seq, target: "status".into(), subtarget: None, data: serde_json::json!({"seq": seq}), kind: None }
	}

	#[tokio::test]
	async fn in_order_sequence_is_valid_and_applies() {
		let handler = Arc::new(RecordingHandler::default());
		let processor = CallbackProcessor::new(Arc::new(MemoryStorage::new()), handler.clone(), Arc::new(NeverResync));
		let actor = ActorId::new("a");
		let class = processor.process(&actor, &publisher(), "sub1", callback(1)).await.expect("process");
		assert_eq!(class, Classification::Valid);
		assert_eq!(class.status_code(), 204);
		assert_eq!(*handler.applied.lock().unwrap(), vec![1]);
	}

	#[tokio::test]
	async fn out_of_order_then_recovered_processes_contiguous_run() {
		let handler = Arc::new(RecordingHandler::default());
		let processor = CallbackProcessor::new(Arc::new(MemoryStorage::new()), handler.clone(), Arc::new(NeverResync));
		let actor = ActorId::new("a");

		let c1 = processor.process(&actor, &publisher(), "sub1", callback(1)).await.expect("1");
		let c3 = processor.process(&actor, &publisher(), "sub1", callback(3)).await.expect("3");
		assert_eq!(c1, Classification::Valid);
		assert_eq!(c3, Classification::Gap);
		assert_eq!(*handler.applied.lock().unwrap(), vec![1]);

		let c2 = processor.process(&actor, &publisher(), "sub1", callback(2)).await.expect("2");
		assert_eq!(c2, Classification::Valid);
		assert_eq!(*handler.applied.lock().unwrap(), vec![1, 2, 3]);
	}

	#[tokio::test]
	async fn duplicate_is_ignored() {
		let handler = Arc::new(RecordingHandler::default());
		let processor = CallbackProcessor::new(Arc::new(MemoryStorage::new()), handler.clone(), Arc::new(NeverResync));
		let actor = ActorId::new("a");
		processor.process(&actor, &publisher(), "sub1", callback(1)).await.expect("1");
		let dup = processor.process(&actor, &publisher(), "sub1", callback(1)).await.expect("dup");
		assert_eq!(dup, Classification::Duplicate);
		assert_eq!(handler.applied.lock().unwrap().len(), 1);
	}

	#[tokio::test]
	async fn resync_payload_is_a_full_reset() {
		let handler = Arc::new(RecordingHandler::default());
		let processor = CallbackProcessor::new(Arc::new(MemoryStorage::new()), handler.clone(), Arc::new(NeverResync));
		let actor = ActorId::new("a");
		processor.process(&actor, &publisher(), "sub1", callback(1)).await.expect("1");
		let mut resync_cb = callback(50);
		resync_cb.kind = Some("resync".into());
		let class = processor.process(&actor, &publisher(), "sub1", resync_cb).await.expect("resync");
		assert_eq!(class, Classification::FullReset);

		let next = processor.process(&actor, &publisher(), "sub1", callback(51)).await.expect("51");
		assert_eq!(next, Classification::Valid);
	}

	#[tokio::test]
	async fn handler_failure_does_not_advance_sequence_so_retry_is_not_a_duplicate() {
		let handler = Arc::new(RecordingHandler::default());
		*handler.fail_once_for.lock().unwrap() = Some(1);
		let processor = CallbackProcessor::new(Arc::new(MemoryStorage::new()), handler.clone(), Arc::new(NeverResync));
		let actor = ActorId::new("a");

		let failed = processor.process(&actor, &publisher(), "sub1", callback(1)).await;
		assert!(failed.is_err());

		let retried = processor.process(&actor, &publisher(), "sub1", callback(1)).await.expect("retry");
		assert_eq!(retried, Classification::Valid, "a retried delivery after a handler failure must still classify as VALID, not DUPLICATE");
		assert_eq!(*handler.applied.lock().unwrap(), vec![1]);
	}

	#[tokio::test]
	async fn gap_queue_full_returns_backpressure() {
		let handler = Arc::new(RecordingHandler::default());
		let processor = CallbackProcessor::new(Arc::new(MemoryStorage::new()), handler, Arc::new(NeverResync)).max_pending(1);
		let actor = ActorId::new("a");
		let first_gap = processor.process(&actor, &publisher(), "sub1", callback(3)).await.expect("gap 1");
		assert_eq!(first_gap, Classification::Gap);
		let second_gap = processor.process(&actor, &publisher(), "sub1", callback(4)).await.expect("gap 2");
		assert_eq!(second_gap, Classification::GapQueueFull);
		assert_eq!(second_gap.status_code(), 429);
	}

	/// spec.md §4.5 line 129: the sequence-update-after-handler-success
	/// ordering invariant must hold even when the CAS write backing it hits a
	/// conflict and retries. A storage-level conflict on the very first
	/// `compare_and_swap` must not cause the retried write to silently drop
	/// the advanced `last_sequence_applied` (the bug this guards against
	/// discarded the caller's mutation and wrote back the unchanged reloaded
	/// state instead).
	#[tokio::test]
	async fn forced_cas_conflict_on_save_does_not_drop_the_intended_mutation() {
		let handler = Arc::new(RecordingHandler::default());
		let storage = Arc::new(ConflictOnceStorage::new());
		let processor = CallbackProcessor::new(storage.clone(), handler.clone(), Arc::new(NeverResync));
		let actor = ActorId::new("a");

		let class = processor.process(&actor, &publisher(), "sub1", callback(1)).await.expect("process despite forced conflict");
		assert_eq!(class, Classification::Valid);
		assert_eq!(*handler.applied.lock().unwrap(), vec![1], "handler must still have applied the callback");

		let key = CallbackProcessor::key(&publisher(), "sub1");
		let versioned = storage.read_versioned(&actor, NAMESPACE, &key).await.expect("read").expect("state persisted");
		let state: ProcessorState = serde_json::from_value(versioned.value).expect("decode state");
		assert_eq!(
			state.last_sequence_applied, 1,
			"the retried write after the forced CAS conflict must still carry the advanced sequence, not the pre-conflict snapshot"
		);

		// A second delivery of the same sequence must now classify as
		// DUPLICATE, proving the advance actually stuck.
		let dup = processor.process(&actor, &publisher(), "sub1", callback(1)).await.expect("dup check");
		assert_eq!(dup, Classification::Duplicate);
	}
}

// vim: ts=4
