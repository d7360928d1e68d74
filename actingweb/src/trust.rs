//! Trust relationship lifecycle and the reciprocal handshake protocol
//! (spec.md §4.3, §6 `POST|GET|PUT|DELETE /<id>/trust/...`).

use async_trait::async_trait;
use std::sync::Arc;

use actingweb_types::prelude::*;

use crate::permission::PermissionEvaluator;
use crate::trust_types::TrustTypeCatalog;
use crate::utils::random_id;

/// Outbound HTTP side of the handshake, injected so the registry itself
/// stays testable without a network. The HTTP-backed implementation lives
/// alongside the axum router.
#[async_trait]
pub trait PeerClient: Send + Sync {
	/// `POST {peer_base_url}/trust/{relationship}` - step 1 of the handshake.
	async fn initiate(&self, peer_base_url: &str, relationship: &str, req: &TrustHandshakeRequest) -> ClResult<()>;
	/// `GET {peer_base_url}/trust/{relationship}/{local_actor_id}` with Basic
	/// auth carrying the verification token - step 2, the verifying side
	/// confirms the initiator actually issued this token.
	async fn verify(&self, peer_base_url: &str, relationship: &str, local_actor_id: &str, verification_token: &str) -> ClResult<bool>;
	/// `PUT {peer_base_url}/trust/{relationship}/{local_actor_id}` - mutual
	/// approval, step 3.
	async fn notify_approved(&self, peer_base_url: &str, relationship: &str, local_actor_id: &str) -> ClResult<()>;
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustHandshakeRequest {
	pub baseuri: String,
	pub secret: String,
	pub verification_token: String,
	pub relationship: String,
	pub description: Option<String>,
}

pub struct TrustRegistry {
	storage: Arc<dyn StorageBackend>,
	trust_types: Arc<TrustTypeCatalog>,
	evaluator: Arc<PermissionEvaluator>,
	peer_client: Arc<dyn PeerClient>,
	own_base_url: String,
}

impl TrustRegistry {
	pub fn new(
		storage: Arc<dyn StorageBackend>,
		trust_types: Arc<TrustTypeCatalog>,
		evaluator: Arc<PermissionEvaluator>,
		peer_client: Arc<dyn PeerClient>,
		own_base_url: impl Into<String>,
	) -> Self {
		Self { storage, trust_types, evaluator, peer_client, own_base_url: own_base_url.into() }
	}

	/// `POST {B}/trust/{rel}` initiated from A's side: generates this side's
	/// secret and a verification token, asks B to verify it, and on success
	/// stores an unapproved trust record pending mutual approval.
	pub async fn initiate(&self, actor_id: &ActorId, relationship: &str, peer_base_url: &str, description: Option<String>) -> ClResult<()> {
		if self.trust_types.get(relationship).is_none() {
			return Err(Error::ValidationError(format!("unknown trust type '{relationship}'")));
		}
		let secret = random_id();
		let verification_token = random_id();

		let req = TrustHandshakeRequest {
			baseuri: format!("{}/{}", self.own_base_url.trim_end_matches('/'), actor_id),
			secret: secret.clone(),
			verification_token,
			relationship: relationship.to_string(),
			description: description.clone(),
		};
		self.peer_client.initiate(peer_base_url, relationship, &req).await?;

		let record = TrustRecord {
			peer: PeerId { base_url: peer_base_url.to_string(), actor_id: String::new() },
			peer_identifier: String::new(),
			trust_type: relationship.to_string(),
			secret,
			peer_secret: None,
			verification_token: None,
			approved: false,
			peer_approved: false,
			established_via: EstablishedVia::Actingweb,
			desc: description,
			created_at: Timestamp::now(),
			last_accessed: Timestamp::now(),
		};
		self.storage.create_trust(actor_id, &record).await?;
		tracing::info!(actor_id = %actor_id, peer = peer_base_url, relationship, "trust handshake initiated");
		Ok(())
	}

	/// Handles an incoming `POST /<id>/trust/<relationship>` from a peer:
	/// verifies the claimed identity by calling back to the peer's
	/// `GET .../trust/<relationship>/<local_actor_id>` with the token it
	/// handed us, then stores an unapproved trust record on success.
	pub async fn handle_incoming(&self, actor_id: &ActorId, req: TrustHandshakeRequest) -> ClResult<()> {
		if self.trust_types.get(&req.relationship).is_none() {
			return Err(Error::ValidationError(format!("unknown trust type '{}'", req.relationship)));
		}
		let verified = self.peer_client.verify(&req.baseuri, &req.relationship, actor_id.as_str(), &req.verification_token).await?;
		if !verified {
			return Err(Error::Forbidden(Domain::Trust, "peer failed verification".into()));
		}

		let peer_actor_id = req.baseuri.rsplit('/').next().unwrap_or_default().to_string();
		let record = TrustRecord {
			peer: PeerId { base_url: req.baseuri.clone(), actor_id: peer_actor_id.clone() },
			peer_identifier: peer_actor_id,
			trust_type: req.relationship.clone(),
			secret: random_id(),
			peer_secret: Some(req.secret),
			verification_token: Some(req.verification_token),
			approved: false,
			peer_approved: false,
			established_via: EstablishedVia::Actingweb,
			desc: req.description,
			created_at: Timestamp::now(),
			last_accessed: Timestamp::now(),
		};
		self.storage.create_trust(actor_id, &record).await?;
		tracing::info!(actor_id = %actor_id, peer = %req.baseuri, relationship = %req.relationship, "trust handshake accepted, pending approval");
		Ok(())
	}

	/// `PUT /<id>/trust/<relationship>/<peer>` - this side approves the
	/// relationship and notifies the peer so it can mark its own
	/// `peer_approved`.
	pub async fn approve(&self, actor_id: &ActorId, peer: &PeerId) -> ClResult<()> {
		let mut trust = self.storage.read_trust(actor_id, peer).await?;
		trust.approved = true;
		trust.last_accessed = Timestamp::now();
		self.storage.update_trust(actor_id, &trust).await?;
		self.peer_client.notify_approved(&peer.base_url, &trust.trust_type, actor_id.as_str()).await?;
		tracing::info!(actor_id = %actor_id, peer = %peer, active = trust.is_active(), "trust approved locally");
		Ok(())
	}

	/// Records the peer's own approval, arriving as their `PUT` callback.
	pub async fn mark_peer_approved(&self, actor_id: &ActorId, peer: &PeerId) -> ClResult<()> {
		let mut trust = self.storage.read_trust(actor_id, peer).await?;
		trust.peer_approved = true;
		trust.last_accessed = Timestamp::now();
		self.storage.update_trust(actor_id, &trust).await?;
		Ok(())
	}

	pub async fn get(&self, actor_id: &ActorId, peer: &PeerId) -> ClResult<TrustRecord> {
		self.storage.read_trust(actor_id, peer).await
	}

	pub async fn list(&self, actor_id: &ActorId, trust_type: Option<&str>) -> ClResult<Vec<TrustRecord>> {
		self.storage.list_trusts(actor_id, trust_type).await
	}

	pub async fn delete(&self, actor_id: &ActorId, peer: &PeerId) -> ClResult<()> {
		self.storage.delete_trust(actor_id, peer).await?;
		self.storage.delete_override(actor_id, peer).await?;
		Ok(())
	}

	pub async fn write_override(&self, actor_id: &ActorId, peer: &PeerId, overrides: TrustPermissions) -> ClResult<()> {
		let existing = self.storage.read_override(actor_id, peer).await?;
		let version = existing.map(|e| e.version + 1).unwrap_or(1);
		self.storage
			.write_override(actor_id, &PermissionOverrideRecord { peer: peer.clone(), overrides, version, created_at: Timestamp::now() })
			.await
	}

	/// The core authorization decision (spec.md §4.3, §8): `false` whenever
	/// the trust isn't found, isn't active, or the peer's effective
	/// permissions for `(category, name, operation)` don't allow it. Never
	/// panics and never throws - an evaluation failure is a deny, not an
	/// error, per the fail-secure posture (spec.md §5).
	pub async fn check_permission(&self, actor_id: &ActorId, peer: &PeerId, category: Category, name: &str, operation: Option<Operation>) -> bool {
		let Ok(trust) = self.storage.read_trust(actor_id, peer).await else {
			return false;
		};
		if !trust.is_active() {
			return false;
		}
		let Some((trust_type_perms, trust_type_version)) = self.trust_types.get(&trust.trust_type) else {
			return false;
		};
		let over = match self.storage.read_override(actor_id, peer).await {
			Ok(Some(record)) => Some((record.overrides, record.version)),
			_ => None,
		};
		self.evaluator.evaluate(
			&trust.trust_type,
			trust_type_version,
			&trust_type_perms,
			over.as_ref().map(|(p, v)| (p, *v)),
			category,
			name,
			operation,
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use actingweb_storage_memory::MemoryStorage;

	struct AlwaysVerifies;
	#[async_trait]
	impl PeerClient for AlwaysVerifies {
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

	fn registry() -> TrustRegistry {
		TrustRegistry::new(
			Arc::new(MemoryStorage::new()),
			Arc::new(TrustTypeCatalog::with_defaults()),
			Arc::new(PermissionEvaluator::new(64)),
			Arc::new(AlwaysVerifies),
			"https://a.example",
		)
	}

	fn peer() -> PeerId {
		PeerId { base_url: "https://b.example/b".into(), actor_id: "b".into() }
	}

	#[tokio::test]
	async fn trust_becomes_active_only_once_both_sides_approve() {
		let registry = registry();
		let actor = ActorId::new("a");
		registry.initiate(&actor, "friend", &peer().base_url, None).await.expect("initiate");

		let trust = registry.get(&actor, &PeerId { base_url: peer().base_url, actor_id: String::new() }).await.expect("read");
		assert!(!trust.is_active());

		let key = PeerId { base_url: "https://b.example/b".into(), actor_id: String::new() };
		registry.approve(&actor, &key).await.expect("approve");
		let trust = registry.get(&actor, &key).await.expect("read");
		assert!(trust.approved);
		assert!(!trust.is_active());

		registry.mark_peer_approved(&actor, &key).await.expect("mark peer approved");
		let trust = registry.get(&actor, &key).await.expect("read");
		assert!(trust.is_active());
	}

	#[tokio::test]
	async fn permission_denied_before_trust_is_active() {
		let registry = registry();
		let actor = ActorId::new("a");
		let key = PeerId { base_url: "https://b.example/b".into(), actor_id: String::new() };
		registry.initiate(&actor, "friend", &key.base_url, None).await.expect("initiate");
		let allowed = registry.check_permission(&actor, &key, Category::Properties, "status", Some(Operation::Read)).await;
		assert!(!allowed);
	}
}

// vim: ts=4
