//! Actor factory and root operations (spec.md §4.2, §6 `POST /`, `GET|DELETE
//! /<id>/`).

use actingweb_types::prelude::*;

use crate::utils::random_id;

/// A freshly created actor, returned to the factory caller with the
/// passphrase in clear text exactly once (spec.md §6 `POST /` response).
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedActor {
	pub id: ActorId,
	pub creator: String,
	pub passphrase: String,
	pub url: String,
}

/// Actor lifecycle operations over a [`StorageBackend`]. Holds no state of
/// its own - every call is a direct storage round trip plus the
/// uniqueness/hashing policy spec.md leaves to the implementer.
pub struct ActorFactory {
	storage: std::sync::Arc<dyn StorageBackend>,
	base_url: String,
	actor_type: String,
	/// Whether `POST /` rejects a second actor for the same `creator` with
	/// 409 (spec.md §6 "409 on duplicate creator when uniqueness is
	/// enforced"). Decided `true` by default - see DESIGN.md Open Question.
	enforce_unique_creator: bool,
}

impl ActorFactory {
	pub fn new(storage: std::sync::Arc<dyn StorageBackend>, base_url: impl Into<String>, actor_type: impl Into<String>) -> Self {
		Self { storage, base_url: base_url.into(), actor_type: actor_type.into(), enforce_unique_creator: true }
	}

	pub fn enforce_unique_creator(mut self, enforce: bool) -> Self {
		self.enforce_unique_creator = enforce;
		self
	}

	/// `POST /` - creates a new actor for `creator`, generating a passphrase
	/// if the caller didn't supply one.
	pub async fn create(&self, creator: &str, passphrase: Option<String>) -> ClResult<CreatedActor> {
		if creator.trim().is_empty() {
			return Err(Error::ValidationError("creator must not be empty".into()));
		}

		if self.enforce_unique_creator {
			if self.storage.find_actor_by_creator(&self.actor_type, creator).await?.is_some() {
				return Err(Error::Conflict(Domain::Core, format!("actor already exists for creator {creator}")));
			}
		}

		let id = ActorId::new(random_id());
		let passphrase = passphrase.unwrap_or_else(random_id);
		let passphrase_hash =
			bcrypt::hash(&passphrase, bcrypt::DEFAULT_COST).map_err(|e| Error::Internal(format!("hash passphrase: {e}")))?;

		let record = ActorRecord {
			actor_id: id.clone(),
			actor_type: self.actor_type.clone(),
			creator: creator.to_string(),
			passphrase_hash,
			created_at: Timestamp::now(),
		};
		self.storage.create_actor(&record).await?;

		tracing::info!(actor_id = %id, creator = creator, "actor created");

		Ok(CreatedActor {
			url: format!("{}/{}", self.base_url.trim_end_matches('/'), id),
			id,
			creator: creator.to_string(),
			passphrase,
		})
	}

	pub async fn get(&self, actor_id: &ActorId) -> ClResult<ActorRecord> {
		self.storage.read_actor(actor_id).await
	}

	/// `DELETE /<id>/` - the caller must already have authenticated as the
	/// actor's own creator; this just removes the record and every bucket
	/// namespace under it.
	pub async fn delete(&self, actor_id: &ActorId) -> ClResult<()> {
		self.storage.delete_all_properties(actor_id).await?;
		self.storage.delete_actor(actor_id).await?;
		tracing::info!(actor_id = %actor_id, "actor deleted");
		Ok(())
	}

	/// Verifies `creator:passphrase` Basic auth credentials (spec.md §4.10).
	pub async fn verify_passphrase(&self, actor_id: &ActorId, passphrase: &str) -> ClResult<bool> {
		let record = self.storage.read_actor(actor_id).await?;
		bcrypt::verify(passphrase, &record.passphrase_hash).map_err(|e| Error::Internal(format!("verify passphrase: {e}")))
	}
}


// vim: ts=4
