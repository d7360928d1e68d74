//! Property CRUD with hook interception and subscription fan-out (spec.md
//! §4.2, §6 property routes). Every write that survives its hook chain is
//! persisted with compare-and-swap, then published to matching subscribers.

use std::sync::Arc;

use actingweb_types::prelude::*;

use crate::hooks::{HookRegistry, PropertyOp};
use crate::subscription::SubscriptionEngine;

pub struct PropertyStore {
	storage: Arc<dyn StorageBackend>,
	hooks: Arc<HookRegistry>,
	subscriptions: Arc<SubscriptionEngine>,
}

impl PropertyStore {
	pub fn new(storage: Arc<dyn StorageBackend>, hooks: Arc<HookRegistry>, subscriptions: Arc<SubscriptionEngine>) -> Self {
		Self { storage, hooks, subscriptions }
	}

	/// `GET /<id>/properties/<name>`. A `Get` hook returning `None` hides the
	/// property as if it didn't exist (404), matching an unregistered hook's
	/// default pass-through behavior for reads that aren't intercepted.
	pub async fn read(&self, actor_id: &ActorId, name: &str) -> ClResult<Option<serde_json::Value>> {
		let Some(record) = self.storage.read_property(actor_id, name).await? else {
			return Ok(None);
		};
		Ok(self.hooks.dispatch_property(actor_id, name, PropertyOp::Get, Some(record.value)).await)
	}

	pub async fn read_all(&self, actor_id: &ActorId) -> ClResult<std::collections::HashMap<String, serde_json::Value>> {
		let records = self.storage.read_properties(actor_id).await?;
		let mut out = std::collections::HashMap::with_capacity(records.len());
		for (name, record) in records {
			if let Some(value) = self.hooks.dispatch_property(actor_id, &name, PropertyOp::Get, Some(record.value)).await {
				out.insert(name, value);
			}
		}
		Ok(out)
	}

	/// `PUT /<id>/properties/<name>`. Runs the `Put` hook chain first - a
	/// hook returning `None` rejects the write with 403 before anything is
	/// persisted - then writes with CAS and publishes a diff on success.
	pub async fn write(&self, actor_id: &ActorId, name: &str, value: serde_json::Value, expected_version: Option<u64>) -> ClResult<PropertyRecord> {
		let accepted = self
			.hooks
			.dispatch_property(actor_id, name, PropertyOp::Put, Some(value))
			.await
			.ok_or_else(|| Error::forbidden(Domain::Core, format!("write to '{name}' rejected by hook")))?;

		let record = self.storage.write_property(actor_id, name, accepted.clone(), expected_version).await?;
		self.subscriptions.publish(actor_id, name, None, accepted).await?;
		Ok(record)
	}

	/// `POST /<id>/properties/<name>` - create-only variant, fails with
	/// `Conflict` if the property already exists (spec.md §6).
	pub async fn create(&self, actor_id: &ActorId, name: &str, value: serde_json::Value) -> ClResult<PropertyRecord> {
		if self.storage.read_property(actor_id, name).await?.is_some() {
			return Err(Error::Conflict(Domain::Core, format!("property '{name}' already exists")));
		}
		let accepted = self
			.hooks
			.dispatch_property(actor_id, name, PropertyOp::Post, Some(value))
			.await
			.ok_or_else(|| Error::forbidden(Domain::Core, format!("create of '{name}' rejected by hook")))?;
		let record = self.storage.write_property(actor_id, name, accepted.clone(), None).await?;
		self.subscriptions.publish(actor_id, name, None, accepted).await?;
		Ok(record)
	}

	/// `DELETE /<id>/properties/<name>`. A `Delete` hook returning `None`
	/// rejects the deletion.
	pub async fn delete(&self, actor_id: &ActorId, name: &str) -> ClResult<()> {
		self.hooks
			.dispatch_property(actor_id, name, PropertyOp::Delete, None)
			.await
			.map_or_else(
				|| Err(Error::forbidden(Domain::Core, format!("delete of '{name}' rejected by hook"))),
				|_| Ok(()),
			)?;
		self.storage.delete_property(actor_id, name).await?;
		self.subscriptions.publish(actor_id, name, None, serde_json::Value::Null).await
	}

	pub async fn list_items(&self, actor_id: &ActorId, list_name: &str) -> ClResult<Vec<ListPropertyItem>> {
		self.storage.list_property_items(actor_id, list_name).await
	}

	pub async fn list_append(&self, actor_id: &ActorId, list_name: &str, value: serde_json::Value) -> ClResult<ListPropertyItem> {
		let item = self.storage.list_append(actor_id, list_name, value).await?;
		self.subscriptions
			.publish(actor_id, list_name, Some(&item.item_id), serde_json::json!({"op": "insert", "item": item}))
			.await?;
		Ok(item)
	}

	pub async fn list_update(&self, actor_id: &ActorId, list_name: &str, item_id: &str, value: serde_json::Value) -> ClResult<()> {
		self.storage.list_update(actor_id, list_name, item_id, value.clone()).await?;
		self.subscriptions
			.publish(actor_id, list_name, Some(item_id), serde_json::json!({"op": "update", "itemId": item_id, "value": value}))
			.await
	}

	pub async fn list_delete(&self, actor_id: &ActorId, list_name: &str, item_id: &str) -> ClResult<()> {
		self.storage.list_delete(actor_id, list_name, item_id).await?;
		self.subscriptions
			.publish(actor_id, list_name, Some(item_id), serde_json::json!({"op": "delete", "itemId": item_id}))
			.await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::hooks::HookRegistryBuilder;
	use crate::permission::PermissionEvaluator;
	use crate::trust::{PeerClient, TrustHandshakeRequest, TrustRegistry};
	use crate::trust_types::TrustTypeCatalog;
	use actingweb_storage_memory::MemoryStorage;

	struct NoPeerContact;
	#[async_trait::async_trait]
	impl PeerClient for NoPeerContact {
		async fn initiate(&self, _peer_base_url: &str, _relationship: &str, _req: &TrustHandshakeRequest) -> ClResult<()> {
			Ok(())
		}
		async fn verify(&self, _peer_base_url: &str, _relationship: &str, _local_actor_id: &str, _verification_token: &str) -> ClResult<bool> {
			Ok(true)
		}
		async fn notify_approved(&self, _peer_base_url: &str, _relationship: &str, _local_actor_id: &str) -> ClResult<()> {
			Ok(())
		}
	}

	fn trust_registry(storage: Arc<dyn StorageBackend>) -> Arc<TrustRegistry> {
		Arc::new(TrustRegistry::new(
			storage,
			Arc::new(TrustTypeCatalog::with_defaults()),
			Arc::new(PermissionEvaluator::new(64)),
			Arc::new(NoPeerContact),
			"https://a.example",
		))
	}

	fn store() -> PropertyStore {
		let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
		let hooks = Arc::new(HookRegistryBuilder::new().freeze());
		let subscriptions = Arc::new(SubscriptionEngine::new(storage.clone(), trust_registry(storage.clone())));
		PropertyStore::new(storage, hooks, subscriptions)
	}

	#[tokio::test]
	async fn write_then_read_round_trips() {
		let store = store();
		let actor = ActorId::new("a");
		store.write(&actor, "status", serde_json::json!("online"), None).await.expect("write");
		let read = store.read(&actor, "status").await.expect("read").expect("present");
		assert_eq!(read, serde_json::json!("online"));
	}

	#[tokio::test]
	async fn hook_rejection_blocks_the_write() {
		let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
		let hooks = Arc::new(
			HookRegistryBuilder::new()
				.register_property("secret", PropertyOp::Put, |_actor: &ActorId, _path: &str, _op: PropertyOp, _value: Option<serde_json::Value>| None)
				.freeze(),
		);
		let subscriptions = Arc::new(SubscriptionEngine::new(storage.clone(), trust_registry(storage.clone())));
		let store = PropertyStore::new(storage, hooks, subscriptions);
		let actor = ActorId::new("a");
		let err = store.write(&actor, "secret", serde_json::json!("x"), None).await.unwrap_err();
		assert!(matches!(err, Error::Forbidden(Domain::Core, _)));
	}

	#[tokio::test]
	async fn create_conflicts_on_existing_property() {
		let store = store();
		let actor = ActorId::new("a");
		store.create(&actor, "status", serde_json::json!("online")).await.expect("first create");
		let err = store.create(&actor, "status", serde_json::json!("away")).await.unwrap_err();
		assert!(matches!(err, Error::Conflict(Domain::Core, _)));
	}
}

// vim: ts=4
