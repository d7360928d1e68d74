//! In-process `StorageBackend` (spec.md §4.1) backed by `parking_lot`-guarded
//! maps. Used for unit tests and single-node demos; nothing here is durable
//! across a restart.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use actingweb_types::prelude::*;

#[derive(Debug)]
struct Shard<K, V> {
	map: RwLock<HashMap<K, V>>,
}

impl<K, V> Default for Shard<K, V> {
	fn default() -> Self {
		Self { map: RwLock::new(HashMap::new()) }
	}
}

impl<K: std::hash::Hash + Eq + Clone, V: Clone> Shard<K, V> {
	fn get(&self, key: &K) -> Option<V> {
		self.map.read().get(key).cloned()
	}

	fn insert(&self, key: K, value: V) {
		self.map.write().insert(key, value);
	}

	fn remove(&self, key: &K) {
		self.map.write().remove(key);
	}
}

fn trust_key(actor_id: &ActorId, peer: &PeerId) -> (String, String) {
	(actor_id.as_str().to_string(), peer.base_url.clone())
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
	actors: Shard<String, ActorRecord>,
	properties: Shard<(String, String), PropertyRecord>,
	lists: Shard<(String, String), Vec<ListPropertyItem>>,
	versioned: Shard<(String, String, String), VersionedRecord<serde_json::Value>>,
	trusts: Shard<(String, String), TrustRecord>,
	overrides: Shard<(String, String), PermissionOverrideRecord>,
	subscriptions: Shard<(String, String), SubscriptionRecord>,
	diffs: Shard<(String, String), Vec<DiffEntry>>,
	cursors: Shard<(String, String), DeliveryCursor>,
	oauth_clients: Shard<String, OAuth2ClientRecord>,
	oauth_tokens: Shard<String, OAuth2TokenRecord>,
	login_sessions: Shard<String, LoginSessionRecord>,
	buckets: Shard<(String, String, String), serde_json::Value>,
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl AttributeBuckets for MemoryStorage {
	async fn bucket_get(&self, actor_id: &ActorId, bucket: &str, key: &str) -> ClResult<Option<serde_json::Value>> {
		Ok(self.buckets.get(&(actor_id.as_str().to_string(), bucket.to_string(), key.to_string())))
	}

	async fn bucket_put(&self, actor_id: &ActorId, bucket: &str, key: &str, value: serde_json::Value) -> ClResult<()> {
		self.buckets.insert((actor_id.as_str().to_string(), bucket.to_string(), key.to_string()), value);
		Ok(())
	}

	async fn bucket_delete(&self, actor_id: &ActorId, bucket: &str, key: &str) -> ClResult<()> {
		self.buckets.remove(&(actor_id.as_str().to_string(), bucket.to_string(), key.to_string()));
		Ok(())
	}

	async fn bucket_list(&self, actor_id: &ActorId, bucket: &str) -> ClResult<HashMap<String, serde_json::Value>> {
		let prefix_actor = actor_id.as_str();
		let out = self
			.buckets
			.map
			.read()
			.iter()
			.filter(|((a, b, _), _)| a == prefix_actor && b == bucket)
			.map(|((_, _, k), v)| (k.clone(), v.clone()))
			.collect();
		Ok(out)
	}

	async fn bucket_delete_all(&self, actor_id: &ActorId, bucket: &str) -> ClResult<()> {
		let prefix_actor = actor_id.as_str().to_string();
		let bucket = bucket.to_string();
		self.buckets.map.write().retain(|(a, b, _), _| !(*a == prefix_actor && *b == bucket));
		Ok(())
	}
}

#[async_trait]
impl StorageBackend for MemoryStorage {
	async fn create_actor(&self, actor: &ActorRecord) -> ClResult<()> {
		self.actors.insert(actor.actor_id.as_str().to_string(), actor.clone());
		Ok(())
	}

	async fn read_actor(&self, actor_id: &ActorId) -> ClResult<ActorRecord> {
		self.actors.get(&actor_id.as_str().to_string()).ok_or_else(|| Error::not_found(Domain::Core))
	}

	async fn find_actor_by_creator(&self, actor_type: &str, creator: &str) -> ClResult<Option<ActorRecord>> {
		Ok(self
			.actors
			.map
			.read()
			.values()
			.find(|a| a.actor_type == actor_type && a.creator == creator)
			.cloned())
	}

	async fn delete_actor(&self, actor_id: &ActorId) -> ClResult<()> {
		self.actors.remove(&actor_id.as_str().to_string());
		Ok(())
	}

	async fn list_actors_by_type(&self, actor_type: &str) -> ClResult<Vec<ActorRecord>> {
		Ok(self.actors.map.read().values().filter(|a| a.actor_type == actor_type).cloned().collect())
	}

	async fn read_property(&self, actor_id: &ActorId, name: &str) -> ClResult<Option<PropertyRecord>> {
		Ok(self.properties.get(&(actor_id.as_str().to_string(), name.to_string())))
	}

	async fn read_properties(&self, actor_id: &ActorId) -> ClResult<HashMap<String, PropertyRecord>> {
		let prefix_actor = actor_id.as_str();
		Ok(self
			.properties
			.map
			.read()
			.iter()
			.filter(|((a, _), _)| a == prefix_actor)
			.map(|((_, name), record)| (name.clone(), record.clone()))
			.collect())
	}

	async fn write_property(
		&self,
		actor_id: &ActorId,
		name: &str,
		value: serde_json::Value,
		expected_version: Option<u64>,
	) -> ClResult<PropertyRecord> {
		let key = (actor_id.as_str().to_string(), name.to_string());
		let mut map = self.properties.map.write();
		let current_version = map.get(&key).map(|r| r.version);
		if current_version != expected_version {
			return Err(Error::Conflict(Domain::Core, format!("version mismatch on property '{name}'")));
		}
		let record = PropertyRecord { value, version: current_version.unwrap_or(0) + 1 };
		map.insert(key, record.clone());
		Ok(record)
	}

	async fn delete_property(&self, actor_id: &ActorId, name: &str) -> ClResult<()> {
		self.properties.remove(&(actor_id.as_str().to_string(), name.to_string()));
		Ok(())
	}

	async fn delete_all_properties(&self, actor_id: &ActorId) -> ClResult<()> {
		let prefix_actor = actor_id.as_str().to_string();
		self.properties.map.write().retain(|(a, _), _| *a != prefix_actor);
		self.lists.map.write().retain(|(a, _), _| *a != prefix_actor);
		Ok(())
	}

	async fn list_property_items(&self, actor_id: &ActorId, list_name: &str) -> ClResult<Vec<ListPropertyItem>> {
		Ok(self.lists.get(&(actor_id.as_str().to_string(), list_name.to_string())).unwrap_or_default())
	}

	async fn list_append(&self, actor_id: &ActorId, list_name: &str, value: serde_json::Value) -> ClResult<ListPropertyItem> {
		let key = (actor_id.as_str().to_string(), list_name.to_string());
		let mut map = self.lists.map.write();
		let items = map.entry(key).or_default();
		let item = ListPropertyItem { item_id: ulid::Ulid::new().to_string(), value, position: items.len() as i64 };
		items.push(item.clone());
		Ok(item)
	}

	async fn list_update(&self, actor_id: &ActorId, list_name: &str, item_id: &str, value: serde_json::Value) -> ClResult<()> {
		let key = (actor_id.as_str().to_string(), list_name.to_string());
		let mut map = self.lists.map.write();
		let items = map.get_mut(&key).ok_or_else(|| Error::not_found(Domain::Core))?;
		let item = items.iter_mut().find(|i| i.item_id == item_id).ok_or_else(|| Error::not_found(Domain::Core))?;
		item.value = value;
		Ok(())
	}

	async fn list_delete(&self, actor_id: &ActorId, list_name: &str, item_id: &str) -> ClResult<()> {
		let key = (actor_id.as_str().to_string(), list_name.to_string());
		let mut map = self.lists.map.write();
		if let Some(items) = map.get_mut(&key) {
			items.retain(|i| i.item_id != item_id);
		}
		Ok(())
	}

	async fn read_versioned(&self, actor_id: &ActorId, namespace: &str, key: &str) -> ClResult<Option<VersionedRecord<serde_json::Value>>> {
		Ok(self.versioned.get(&(actor_id.as_str().to_string(), namespace.to_string(), key.to_string())))
	}

	async fn compare_and_swap(
		&self,
		actor_id: &ActorId,
		namespace: &str,
		key: &str,
		expected_version: Option<u64>,
		new_value: serde_json::Value,
	) -> ClResult<VersionedRecord<serde_json::Value>> {
		let full_key = (actor_id.as_str().to_string(), namespace.to_string(), key.to_string());
		let mut map = self.versioned.map.write();
		let current_version = map.get(&full_key).map(|r| r.version);
		if current_version != expected_version {
			return Err(Error::Conflict(Domain::Callback, format!("CAS mismatch on '{namespace}/{key}'")));
		}
		let record = VersionedRecord { value: new_value, version: current_version.unwrap_or(0) + 1 };
		map.insert(full_key, record.clone());
		Ok(record)
	}

	async fn create_trust(&self, actor_id: &ActorId, trust: &TrustRecord) -> ClResult<()> {
		self.trusts.insert(trust_key(actor_id, &trust.peer), trust.clone());
		Ok(())
	}

	async fn read_trust(&self, actor_id: &ActorId, peer: &PeerId) -> ClResult<TrustRecord> {
		self.trusts.get(&trust_key(actor_id, peer)).ok_or_else(|| Error::not_found(Domain::Trust))
	}

	async fn update_trust(&self, actor_id: &ActorId, trust: &TrustRecord) -> ClResult<()> {
		self.trusts.insert(trust_key(actor_id, &trust.peer), trust.clone());
		Ok(())
	}

	async fn delete_trust(&self, actor_id: &ActorId, peer: &PeerId) -> ClResult<()> {
		self.trusts.remove(&trust_key(actor_id, peer));
		Ok(())
	}

	async fn list_trusts(&self, actor_id: &ActorId, trust_type: Option<&str>) -> ClResult<Vec<TrustRecord>> {
		let prefix_actor = actor_id.as_str();
		Ok(self
			.trusts
			.map
			.read()
			.iter()
			.filter(|((a, _), t)| a == prefix_actor && trust_type.is_none_or(|tt| tt == t.trust_type))
			.map(|(_, t)| t.clone())
			.collect())
	}

	async fn read_override(&self, actor_id: &ActorId, peer: &PeerId) -> ClResult<Option<PermissionOverrideRecord>> {
		Ok(self.overrides.get(&trust_key(actor_id, peer)))
	}

	async fn write_override(&self, actor_id: &ActorId, record: &PermissionOverrideRecord) -> ClResult<()> {
		self.overrides.insert(trust_key(actor_id, &record.peer), record.clone());
		Ok(())
	}

	async fn delete_override(&self, actor_id: &ActorId, peer: &PeerId) -> ClResult<()> {
		self.overrides.remove(&trust_key(actor_id, peer));
		Ok(())
	}

	async fn create_subscription(&self, actor_id: &ActorId, sub: &SubscriptionRecord) -> ClResult<()> {
		self.subscriptions.insert((actor_id.as_str().to_string(), sub.subscription_id.clone()), sub.clone());
		Ok(())
	}

	async fn read_subscription(&self, actor_id: &ActorId, subscription_id: &str) -> ClResult<SubscriptionRecord> {
		self.subscriptions
			.get(&(actor_id.as_str().to_string(), subscription_id.to_string()))
			.ok_or_else(|| Error::not_found(Domain::Subscription))
	}

	async fn update_subscription(&self, actor_id: &ActorId, sub: &SubscriptionRecord) -> ClResult<()> {
		self.subscriptions.insert((actor_id.as_str().to_string(), sub.subscription_id.clone()), sub.clone());
		Ok(())
	}

	async fn delete_subscription(&self, actor_id: &ActorId, subscription_id: &str) -> ClResult<()> {
		self.subscriptions.remove(&(actor_id.as_str().to_string(), subscription_id.to_string()));
		self.diffs.remove(&(actor_id.as_str().to_string(), subscription_id.to_string()));
		Ok(())
	}

	async fn list_subscriptions(&self, actor_id: &ActorId) -> ClResult<Vec<SubscriptionRecord>> {
		let prefix_actor = actor_id.as_str();
		Ok(self.subscriptions.map.read().iter().filter(|((a, _), _)| a == prefix_actor).map(|(_, s)| s.clone()).collect())
	}

	async fn increase_seq(&self, actor_id: &ActorId, subscription_id: &str) -> ClResult<i64> {
		let key = (actor_id.as_str().to_string(), subscription_id.to_string());
		let mut map = self.subscriptions.map.write();
		let sub = map.get_mut(&key).ok_or_else(|| Error::not_found(Domain::Subscription))?;
		sub.sequence = sub.sequence.next();
		Ok(sub.sequence.0)
	}

	async fn append_diff(&self, actor_id: &ActorId, subscription_id: &str, diff: DiffEntry) -> ClResult<()> {
		let key = (actor_id.as_str().to_string(), subscription_id.to_string());
		self.diffs.map.write().entry(key).or_default().push(diff);
		Ok(())
	}

	async fn read_diffs(&self, actor_id: &ActorId, subscription_id: &str) -> ClResult<Vec<DiffEntry>> {
		Ok(self.diffs.get(&(actor_id.as_str().to_string(), subscription_id.to_string())).unwrap_or_default())
	}

	async fn prune_diffs(&self, actor_id: &ActorId, subscription_id: &str, seq: SequenceId) -> ClResult<()> {
		let key = (actor_id.as_str().to_string(), subscription_id.to_string());
		if let Some(diffs) = self.diffs.map.write().get_mut(&key) {
			diffs.retain(|d| d.sequence > seq);
		}
		Ok(())
	}

	async fn read_delivery_cursor(&self, actor_id: &ActorId, peer: &PeerId) -> ClResult<Option<DeliveryCursor>> {
		Ok(self.cursors.get(&trust_key(actor_id, peer)))
	}

	async fn write_delivery_cursor(&self, actor_id: &ActorId, cursor: &DeliveryCursor) -> ClResult<()> {
		self.cursors.insert(trust_key(actor_id, &cursor.peer), cursor.clone());
		Ok(())
	}

	async fn create_oauth_client(&self, client: &OAuth2ClientRecord) -> ClResult<()> {
		self.oauth_clients.insert(client.client_id.clone(), client.clone());
		Ok(())
	}

	async fn read_oauth_client(&self, client_id: &str) -> ClResult<OAuth2ClientRecord> {
		self.oauth_clients.get(&client_id.to_string()).ok_or_else(|| Error::not_found(Domain::Oauth))
	}

	async fn delete_oauth_client(&self, client_id: &str) -> ClResult<()> {
		self.oauth_clients.remove(&client_id.to_string());
		Ok(())
	}

	async fn create_oauth_token(&self, token: &OAuth2TokenRecord) -> ClResult<()> {
		self.oauth_tokens.insert(token.access_token.clone(), token.clone());
		Ok(())
	}

	async fn read_oauth_token(&self, access_token: &str) -> ClResult<OAuth2TokenRecord> {
		self.oauth_tokens.get(&access_token.to_string()).ok_or_else(|| Error::not_found(Domain::Oauth))
	}

	async fn delete_oauth_token(&self, access_token: &str) -> ClResult<()> {
		self.oauth_tokens.remove(&access_token.to_string());
		Ok(())
	}

	async fn create_login_session(&self, session: &LoginSessionRecord) -> ClResult<()> {
		self.login_sessions.insert(session.session_id.clone(), session.clone());
		Ok(())
	}

	async fn read_login_session(&self, session_id: &str) -> ClResult<Option<LoginSessionRecord>> {
		let Some(session) = self.login_sessions.get(&session_id.to_string()) else {
			return Ok(None);
		};
		if session.is_expired() {
			self.login_sessions.remove(&session_id.to_string());
			return Ok(None);
		}
		Ok(Some(session))
	}

	async fn delete_login_session(&self, session_id: &str) -> ClResult<()> {
		self.login_sessions.remove(&session_id.to_string());
		Ok(())
	}
}


// vim: ts=4
