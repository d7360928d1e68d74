//! The storage adapter contract (spec.md §4.1) and the record types that
//! cross it. A `StorageBackend` implementation owns durability for actors,
//! properties, trust relationships, subscriptions, attribute buckets and the
//! OAuth2 server's clients/tokens/sessions; the engine never touches a
//! database directly. Per-actor isolation is the implementation's job: every
//! method is scoped by `actor_id` and a backend MUST reject a query whose
//! record belongs to a different actor rather than silently returning it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ClResult;
use crate::trust_type::TrustPermissions;
use crate::types::{ActorId, PeerId, SequenceId, Timestamp};

// Actor //
//*******//

/// A registered actor instance. `actor_type` identifies which application
/// logic governs it (an actor type maps 1:1 onto a set of registered hooks).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorRecord {
	pub actor_id: ActorId,
	pub actor_type: String,
	pub creator: String,
	pub passphrase_hash: String,
	pub created_at: Timestamp,
}

// Properties //
//************//

/// A property value together with the version it was last written at. Every
/// write must present the version it read, enforced as a compare-and-swap
/// (spec.md §4.1, §9) so concurrent writers never silently clobber each
/// other.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PropertyRecord {
	pub value: serde_json::Value,
	pub version: u64,
}

/// An item inside a list-valued property (spec.md §4.2 "list properties"),
/// addressed by a stable id so items can be inserted, moved and removed
/// without renumbering the rest of the list and so subscription diffs can
/// reference `item_id` instead of a position that may have shifted.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPropertyItem {
	pub item_id: String,
	pub value: serde_json::Value,
	pub position: i64,
}

// Generic versioned record / CAS primitive //
//*******************************************//

/// A value plus the version it was read at, returned by [`StorageBackend::read_versioned`]
/// and [`StorageBackend::compare_and_swap`]. Used wherever the engine needs
/// optimistic concurrency over an opaque JSON blob - callback processor
/// state being the main consumer (spec.md §4.5, §9).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VersionedRecord<T> {
	pub value: T,
	pub version: u64,
}

// Attribute buckets //
//*******************//

/// A flat key-value namespace under an actor, or under a reserved system
/// actor id (spec.md §3 "Attribute Bucket", GLOSSARY). Used for trust-type
/// templates, OAuth2 client/token records, login sessions, and any
/// deployment-specific index that doesn't belong in the typed property
/// store.
#[async_trait]
pub trait AttributeBuckets: Send + Sync {
	async fn bucket_get(&self, actor_id: &ActorId, bucket: &str, key: &str) -> ClResult<Option<serde_json::Value>>;
	async fn bucket_put(&self, actor_id: &ActorId, bucket: &str, key: &str, value: serde_json::Value) -> ClResult<()>;
	async fn bucket_delete(&self, actor_id: &ActorId, bucket: &str, key: &str) -> ClResult<()>;
	async fn bucket_list(&self, actor_id: &ActorId, bucket: &str) -> ClResult<HashMap<String, serde_json::Value>>;
	async fn bucket_delete_all(&self, actor_id: &ActorId, bucket: &str) -> ClResult<()>;
}

// Trust //
//*******//

/// How a trust relationship came to exist (spec.md §3), kept distinct from
/// the permission-bearing `trust_type` so the fan-out/auth layers can tell
/// an ActingWeb handshake peer apart from an OAuth2/MCP client even when
/// both happen to be granted the same trust type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstablishedVia {
	Actingweb,
	Oauth2,
	Mcp,
}

/// A trust relationship this actor holds with a peer actor (spec.md §3,
/// §4.3). Active iff `approved && peer_approved` (spec.md §8); `secret` is
/// this side's handshake secret, `peer_secret` the peer's, and
/// `verification_token` the one-time token exchanged during the reciprocal
/// verification GET.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustRecord {
	pub peer: PeerId,
	/// The peer's own actor id as it identifies itself, distinct from the
	/// local record key so a peer can rotate its base URL without losing
	/// the relationship.
	pub peer_identifier: String,
	pub trust_type: String,
	pub secret: String,
	pub peer_secret: Option<String>,
	pub verification_token: Option<String>,
	pub approved: bool,
	pub peer_approved: bool,
	pub established_via: EstablishedVia,
	pub desc: Option<String>,
	pub created_at: Timestamp,
	pub last_accessed: Timestamp,
}

impl TrustRecord {
	pub fn is_active(&self) -> bool {
		self.approved && self.peer_approved
	}
}

// Permission overrides //
//**********************//

/// A per-relationship delta on top of a trust type's base permissions
/// (spec.md §3 "Permission Override", §4.3). Deep-merged onto the trust
/// type at evaluation time; an override's `excluded_patterns` always wins
/// over either side's `patterns`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOverrideRecord {
	pub peer: PeerId,
	pub overrides: TrustPermissions,
	pub version: u64,
	pub created_at: Timestamp,
}

// Subscriptions //
//***************//

/// A subscription one actor holds on another's resources (spec.md §3, §4.4).
/// `callback` distinguishes the two roles this actor plays for the same
/// record shape: `true` means this actor is the *subscriber* receiving
/// callbacks (the record lives in the publisher's store, named by
/// `subscription_id`); `false` means this actor is the *publisher* and the
/// record tracks one of its own subscribers. `target`/`subtarget` address a
/// property path; `resource` addresses an MCP resource URI instead, for
/// subscriptions scoped to the `resources` category.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRecord {
	pub subscription_id: String,
	pub peer: PeerId,
	pub callback: bool,
	pub target: String,
	pub subtarget: Option<String>,
	pub resource: Option<String>,
	pub granularity: SubscriptionGranularity,
	/// Monotonic sequence counter, advanced by [`StorageBackend::increase_seq`].
	pub sequence: SequenceId,
	/// Highest sequence the peer has confirmed via `PUT {sequence}`
	/// (publisher side) or applied locally (subscriber side).
	pub last_sequence_applied: SequenceId,
	pub created_at: Timestamp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionGranularity {
	High,
	Low,
	None,
}

/// One queued change for a subscriber, carrying the sequence number it must
/// be delivered at. `blob` is the opaque payload: for a property diff, the
/// current value; for a list property, a `{op, item_id, item}` object; for
/// a resync signal, `null` with `resync: true`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffEntry {
	pub sequence: SequenceId,
	pub target: String,
	pub subtarget: Option<String>,
	pub blob: serde_json::Value,
	#[serde(default)]
	pub resync: bool,
	pub created_at: Timestamp,
}

// OAuth2 //
//********//

/// A dynamically- or statically-registered OAuth2 client (spec.md §3, §4.8).
/// `client_id` is prefixed `mcp_` for dynamically registered MCP clients;
/// statically configured clients (web UI) may use any id.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuth2ClientRecord {
	pub client_id: String,
	pub client_secret_hash: String,
	pub client_name: String,
	pub owner_actor_id: ActorId,
	pub trust_type: String,
	pub redirect_uris: Vec<String>,
	pub created_at: Timestamp,
}

/// An issued bearer token, opaque and prefixed `aw_` (spec.md §6). Looked up
/// on every protected request; expiry triggers a refresh attempt if
/// `refresh_token` is present, else 401.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuth2TokenRecord {
	pub access_token: String,
	pub refresh_token: Option<String>,
	pub client_id: String,
	pub actor_id: ActorId,
	pub trust_type: String,
	pub scope: String,
	pub issued_at: Timestamp,
	pub expires_at: Timestamp,
}

impl OAuth2TokenRecord {
	pub fn is_expired(&self) -> bool {
		self.expires_at.is_past()
	}
}

/// A login-in-progress session (spec.md §3), used when a web-UI OAuth
/// callback cannot resolve an email directly and falls back to an
/// email-input form. Backed by the attribute bucket; expired on read
/// (spec.md §5, §9 - "no cron needed").
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginSessionRecord {
	pub session_id: String,
	pub provider: String,
	pub provider_tokens: serde_json::Value,
	pub pinned_actor_id: Option<ActorId>,
	pub created_at: Timestamp,
	pub expires_at: Timestamp,
}

impl LoginSessionRecord {
	pub fn is_expired(&self) -> bool {
		self.expires_at.is_past()
	}
}

// Storage backend contract //
//**************************//

/// Everything the engine needs from a durable store. Implementations must be
/// `Send + Sync` so a single instance can be shared across the tokio runtime
/// behind an `Arc`.
#[async_trait]
pub trait StorageBackend: AttributeBuckets + std::fmt::Debug + Send + Sync {
	// Actors
	async fn create_actor(&self, actor: &ActorRecord) -> ClResult<()>;
	async fn read_actor(&self, actor_id: &ActorId) -> ClResult<ActorRecord>;
	async fn find_actor_by_creator(&self, actor_type: &str, creator: &str) -> ClResult<Option<ActorRecord>>;
	async fn delete_actor(&self, actor_id: &ActorId) -> ClResult<()>;
	async fn list_actors_by_type(&self, actor_type: &str) -> ClResult<Vec<ActorRecord>>;

	// Properties
	async fn read_property(&self, actor_id: &ActorId, name: &str) -> ClResult<Option<PropertyRecord>>;
	async fn read_properties(&self, actor_id: &ActorId) -> ClResult<HashMap<String, PropertyRecord>>;
	/// Writes `value` if the stored version equals `expected_version`, else
	/// returns `Err(Error::Conflict)`.
	async fn write_property(
		&self,
		actor_id: &ActorId,
		name: &str,
		value: serde_json::Value,
		expected_version: Option<u64>,
	) -> ClResult<PropertyRecord>;
	async fn delete_property(&self, actor_id: &ActorId, name: &str) -> ClResult<()>;
	async fn delete_all_properties(&self, actor_id: &ActorId) -> ClResult<()>;

	// List-valued properties
	async fn list_property_items(&self, actor_id: &ActorId, list_name: &str) -> ClResult<Vec<ListPropertyItem>>;
	async fn list_append(&self, actor_id: &ActorId, list_name: &str, value: serde_json::Value) -> ClResult<ListPropertyItem>;
	async fn list_update(&self, actor_id: &ActorId, list_name: &str, item_id: &str, value: serde_json::Value) -> ClResult<()>;
	async fn list_delete(&self, actor_id: &ActorId, list_name: &str, item_id: &str) -> ClResult<()>;

	// Generic CAS primitive, used by callback processor state
	async fn read_versioned(
		&self,
		actor_id: &ActorId,
		namespace: &str,
		key: &str,
	) -> ClResult<Option<VersionedRecord<serde_json::Value>>>;
	/// Writes `new_value` if the stored version equals `expected_version`
	/// (`None` meaning "must not exist yet"), else `Err(Error::Conflict)`.
	async fn compare_and_swap(
		&self,
		actor_id: &ActorId,
		namespace: &str,
		key: &str,
		expected_version: Option<u64>,
		new_value: serde_json::Value,
	) -> ClResult<VersionedRecord<serde_json::Value>>;

	// Trust
	async fn create_trust(&self, actor_id: &ActorId, trust: &TrustRecord) -> ClResult<()>;
	async fn read_trust(&self, actor_id: &ActorId, peer: &PeerId) -> ClResult<TrustRecord>;
	async fn update_trust(&self, actor_id: &ActorId, trust: &TrustRecord) -> ClResult<()>;
	async fn delete_trust(&self, actor_id: &ActorId, peer: &PeerId) -> ClResult<()>;
	async fn list_trusts(&self, actor_id: &ActorId, trust_type: Option<&str>) -> ClResult<Vec<TrustRecord>>;

	// Permission overrides
	async fn read_override(&self, actor_id: &ActorId, peer: &PeerId) -> ClResult<Option<PermissionOverrideRecord>>;
	async fn write_override(&self, actor_id: &ActorId, record: &PermissionOverrideRecord) -> ClResult<()>;
	async fn delete_override(&self, actor_id: &ActorId, peer: &PeerId) -> ClResult<()>;

	// Subscriptions
	async fn create_subscription(&self, actor_id: &ActorId, sub: &SubscriptionRecord) -> ClResult<()>;
	async fn read_subscription(&self, actor_id: &ActorId, subscription_id: &str) -> ClResult<SubscriptionRecord>;
	async fn update_subscription(&self, actor_id: &ActorId, sub: &SubscriptionRecord) -> ClResult<()>;
	async fn delete_subscription(&self, actor_id: &ActorId, subscription_id: &str) -> ClResult<()>;
	async fn list_subscriptions(&self, actor_id: &ActorId) -> ClResult<Vec<SubscriptionRecord>>;
	/// Atomically increments the subscription's sequence counter and returns
	/// the new value. MUST return an integer ≥ 1, never a boolean
	/// (spec.md §8 "Boundary behaviors").
	async fn increase_seq(&self, actor_id: &ActorId, subscription_id: &str) -> ClResult<i64>;

	// Diff log (bounded per-subscription queue feeding the fan-out pipeline)
	async fn append_diff(&self, actor_id: &ActorId, subscription_id: &str, diff: DiffEntry) -> ClResult<()>;
	async fn read_diffs(&self, actor_id: &ActorId, subscription_id: &str) -> ClResult<Vec<DiffEntry>>;
	/// Removes every diff with `sequence <= seq` (spec.md §8: pruned iff the
	/// subscriber has PUT that sequence or higher at least once).
	async fn prune_diffs(&self, actor_id: &ActorId, subscription_id: &str, seq: SequenceId) -> ClResult<()>;

	// Delivery cursors (this actor as subscriber, durable restart bookkeeping
	// for the fan-out pipeline; the circuit breaker itself stays in-memory).
	async fn read_delivery_cursor(&self, actor_id: &ActorId, peer: &PeerId) -> ClResult<Option<DeliveryCursor>>;
	async fn write_delivery_cursor(&self, actor_id: &ActorId, cursor: &DeliveryCursor) -> ClResult<()>;

	// OAuth2 authorization server
	async fn create_oauth_client(&self, client: &OAuth2ClientRecord) -> ClResult<()>;
	async fn read_oauth_client(&self, client_id: &str) -> ClResult<OAuth2ClientRecord>;
	async fn delete_oauth_client(&self, client_id: &str) -> ClResult<()>;
	async fn create_oauth_token(&self, token: &OAuth2TokenRecord) -> ClResult<()>;
	async fn read_oauth_token(&self, access_token: &str) -> ClResult<OAuth2TokenRecord>;
	async fn delete_oauth_token(&self, access_token: &str) -> ClResult<()>;

	// Login sessions (web-UI OAuth email fallback)
	async fn create_login_session(&self, session: &LoginSessionRecord) -> ClResult<()>;
	/// Returns `None`, purging the record, if it is past its TTL.
	async fn read_login_session(&self, session_id: &str) -> ClResult<Option<LoginSessionRecord>>;
	async fn delete_login_session(&self, session_id: &str) -> ClResult<()>;
}

/// Per-peer delivery cursor for the fan-out pipeline (spec.md §4.6):
/// the last sequence this actor (as subscriber) has confirmed applying, kept
/// durable so a restart doesn't re-deliver everything from scratch.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryCursor {
	pub peer: PeerId,
	pub last_acked_seq: SequenceId,
}

// vim: ts=4
