//! sqlx/SQLite-backed `StorageBackend` (spec.md §4.1, §9 "storage backend is
//! pluggable; SQL and in-memory are both first-class"). One pool per
//! process, shared across every actor it hosts; CAS is implemented as a
//! conditional `UPDATE`/`INSERT` inside the driver, not a client-side
//! read-modify-write, so two writers racing on the same row never both see
//! success.

mod schema;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use actingweb_types::prelude::*;

#[derive(Debug)]
pub struct SqlStorage {
	pool: SqlitePool,
}

impl SqlStorage {
	/// Opens (creating if absent) the SQLite database at `path` and runs
	/// schema migrations. Use `"sqlite::memory:"` for ephemeral test pools.
	pub async fn connect(url: &str) -> ClResult<Self> {
		let pool = SqlitePoolOptions::new()
			.max_connections(8)
			.connect(url)
			.await
			.map_err(|e| Error::ConfigError(format!("connect to {url}: {e}")))?;
		schema::init_db(&pool).await?;
		Ok(Self { pool })
	}
}

fn peer_of(base_url: String, actor_id: String) -> PeerId {
	PeerId { base_url, actor_id }
}

#[async_trait]
impl AttributeBuckets for SqlStorage {
	async fn bucket_get(&self, actor_id: &ActorId, bucket: &str, key: &str) -> ClResult<Option<serde_json::Value>> {
		let row = sqlx::query("SELECT value FROM buckets WHERE actor_id = ?1 AND bucket = ?2 AND key = ?3")
			.bind(actor_id.as_str())
			.bind(bucket)
			.bind(key)
			.fetch_optional(&self.pool)
			.await?;
		row.map(|r| serde_json::from_str(r.try_get::<String, _>("value")?.as_str()).map_err(Error::from)).transpose()
	}

	async fn bucket_put(&self, actor_id: &ActorId, bucket: &str, key: &str, value: serde_json::Value) -> ClResult<()> {
		sqlx::query("INSERT INTO buckets (actor_id, bucket, key, value) VALUES (?1, ?2, ?3, ?4) ON CONFLICT(actor_id, bucket, key) DO UPDATE SET value = excluded.value")
			.bind(actor_id.as_str())
			.bind(bucket)
			.bind(key)
			.bind(serde_json::to_string(&value)?)
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	async fn bucket_delete(&self, actor_id: &ActorId, bucket: &str, key: &str) -> ClResult<()> {
		sqlx::query("DELETE FROM buckets WHERE actor_id = ?1 AND bucket = ?2 AND key = ?3")
			.bind(actor_id.as_str())
			.bind(bucket)
			.bind(key)
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	async fn bucket_list(&self, actor_id: &ActorId, bucket: &str) -> ClResult<HashMap<String, serde_json::Value>> {
		let rows = sqlx::query("SELECT key, value FROM buckets WHERE actor_id = ?1 AND bucket = ?2")
			.bind(actor_id.as_str())
			.bind(bucket)
			.fetch_all(&self.pool)
			.await?;
		rows.into_iter()
			.map(|r| {
				let key: String = r.try_get("key")?;
				let value: String = r.try_get("value")?;
				Ok((key, serde_json::from_str(&value)?))
			})
			.collect()
	}

	async fn bucket_delete_all(&self, actor_id: &ActorId, bucket: &str) -> ClResult<()> {
		sqlx::query("DELETE FROM buckets WHERE actor_id = ?1 AND bucket = ?2").bind(actor_id.as_str()).bind(bucket).execute(&self.pool).await?;
		Ok(())
	}
}

#[async_trait]
impl StorageBackend for SqlStorage {
	async fn create_actor(&self, actor: &ActorRecord) -> ClResult<()> {
		sqlx::query("INSERT INTO actors (actor_id, actor_type, creator, passphrase_hash, created_at) VALUES (?1, ?2, ?3, ?4, ?5)")
			.bind(actor.actor_id.as_str())
			.bind(&actor.actor_type)
			.bind(&actor.creator)
			.bind(&actor.passphrase_hash)
			.bind(actor.created_at.0)
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	async fn read_actor(&self, actor_id: &ActorId) -> ClResult<ActorRecord> {
		let row = sqlx::query("SELECT actor_id, actor_type, creator, passphrase_hash, created_at FROM actors WHERE actor_id = ?1")
			.bind(actor_id.as_str())
			.fetch_optional(&self.pool)
			.await?
			.ok_or_else(|| Error::not_found(Domain::Core))?;
		Ok(ActorRecord {
			actor_id: ActorId::new(row.try_get::<String, _>("actor_id")?),
			actor_type: row.try_get("actor_type")?,
			creator: row.try_get("creator")?,
			passphrase_hash: row.try_get("passphrase_hash")?,
			created_at: Timestamp(row.try_get("created_at")?),
		})
	}

	async fn find_actor_by_creator(&self, actor_type: &str, creator: &str) -> ClResult<Option<ActorRecord>> {
		let row = sqlx::query("SELECT actor_id, actor_type, creator, passphrase_hash, created_at FROM actors WHERE actor_type = ?1 AND creator = ?2")
			.bind(actor_type)
			.bind(creator)
			.fetch_optional(&self.pool)
			.await?;
		row.map(|row| {
			Ok(ActorRecord {
				actor_id: ActorId::new(row.try_get::<String, _>("actor_id")?),
				actor_type: row.try_get("actor_type")?,
				creator: row.try_get("creator")?,
				passphrase_hash: row.try_get("passphrase_hash")?,
				created_at: Timestamp(row.try_get("created_at")?),
			})
		})
		.transpose()
	}

	async fn delete_actor(&self, actor_id: &ActorId) -> ClResult<()> {
		sqlx::query("DELETE FROM actors WHERE actor_id = ?1").bind(actor_id.as_str()).execute(&self.pool).await?;
		Ok(())
	}

	async fn list_actors_by_type(&self, actor_type: &str) -> ClResult<Vec<ActorRecord>> {
		let rows = sqlx::query("SELECT actor_id, actor_type, creator, passphrase_hash, created_at FROM actors WHERE actor_type = ?1")
			.bind(actor_type)
			.fetch_all(&self.pool)
			.await?;
		rows.into_iter()
			.map(|row| {
				Ok(ActorRecord {
					actor_id: ActorId::new(row.try_get::<String, _>("actor_id")?),
					actor_type: row.try_get("actor_type")?,
					creator: row.try_get("creator")?,
					passphrase_hash: row.try_get("passphrase_hash")?,
					created_at: Timestamp(row.try_get("created_at")?),
				})
			})
			.collect()
	}

	async fn read_property(&self, actor_id: &ActorId, name: &str) -> ClResult<Option<PropertyRecord>> {
		let row = sqlx::query("SELECT value, version FROM properties WHERE actor_id = ?1 AND name = ?2")
			.bind(actor_id.as_str())
			.bind(name)
			.fetch_optional(&self.pool)
			.await?;
		row.map(|row| {
			let value: String = row.try_get("value")?;
			Ok(PropertyRecord { value: serde_json::from_str(&value)?, version: row.try_get::<i64, _>("version")? as u64 })
		})
		.transpose()
	}

	async fn read_properties(&self, actor_id: &ActorId) -> ClResult<HashMap<String, PropertyRecord>> {
		let rows = sqlx::query("SELECT name, value, version FROM properties WHERE actor_id = ?1").bind(actor_id.as_str()).fetch_all(&self.pool).await?;
		rows.into_iter()
			.map(|row| {
				let name: String = row.try_get("name")?;
				let value: String = row.try_get("value")?;
				Ok((name, PropertyRecord { value: serde_json::from_str(&value)?, version: row.try_get::<i64, _>("version")? as u64 }))
			})
			.collect()
	}

	async fn write_property(&self, actor_id: &ActorId, name: &str, value: serde_json::Value, expected_version: Option<u64>) -> ClResult<PropertyRecord> {
		let mut tx = self.pool.begin().await?;
		let current: Option<i64> = sqlx::query("SELECT version FROM properties WHERE actor_id = ?1 AND name = ?2")
			.bind(actor_id.as_str())
			.bind(name)
			.fetch_optional(&mut *tx)
			.await?
			.map(|r| r.try_get("version"))
			.transpose()?;
		if current.map(|v| v as u64) != expected_version {
			return Err(Error::Conflict(Domain::Core, format!("version mismatch on property '{name}'")));
		}
		let new_version = current.unwrap_or(0) + 1;
		let serialized = serde_json::to_string(&value)?;
		sqlx::query(
			"INSERT INTO properties (actor_id, name, value, version) VALUES (?1, ?2, ?3, ?4)
			 ON CONFLICT(actor_id, name) DO UPDATE SET value = excluded.value, version = excluded.version",
		)
		.bind(actor_id.as_str())
		.bind(name)
		.bind(&serialized)
		.bind(new_version)
		.execute(&mut *tx)
		.await?;
		tx.commit().await?;
		Ok(PropertyRecord { value, version: new_version as u64 })
	}

	async fn delete_property(&self, actor_id: &ActorId, name: &str) -> ClResult<()> {
		sqlx::query("DELETE FROM properties WHERE actor_id = ?1 AND name = ?2").bind(actor_id.as_str()).bind(name).execute(&self.pool).await?;
		Ok(())
	}

	async fn delete_all_properties(&self, actor_id: &ActorId) -> ClResult<()> {
		sqlx::query("DELETE FROM properties WHERE actor_id = ?1").bind(actor_id.as_str()).execute(&self.pool).await?;
		sqlx::query("DELETE FROM list_properties WHERE actor_id = ?1").bind(actor_id.as_str()).execute(&self.pool).await?;
		Ok(())
	}

	async fn list_property_items(&self, actor_id: &ActorId, list_name: &str) -> ClResult<Vec<ListPropertyItem>> {
		let rows = sqlx::query("SELECT item_id, value, position FROM list_properties WHERE actor_id = ?1 AND list_name = ?2 ORDER BY position ASC")
			.bind(actor_id.as_str())
			.bind(list_name)
			.fetch_all(&self.pool)
			.await?;
		rows.into_iter()
			.map(|row| {
				let value: String = row.try_get("value")?;
				Ok(ListPropertyItem { item_id: row.try_get("item_id")?, value: serde_json::from_str(&value)?, position: row.try_get("position")? })
			})
			.collect()
	}

	async fn list_append(&self, actor_id: &ActorId, list_name: &str, value: serde_json::Value) -> ClResult<ListPropertyItem> {
		let next_position: i64 = sqlx::query("SELECT COALESCE(MAX(position) + 1, 0) AS next FROM list_properties WHERE actor_id = ?1 AND list_name = ?2")
			.bind(actor_id.as_str())
			.bind(list_name)
			.fetch_one(&self.pool)
			.await?
			.try_get("next")?;
		let item = ListPropertyItem { item_id: ulid::Ulid::new().to_string(), value, position: next_position };
		sqlx::query("INSERT INTO list_properties (actor_id, list_name, item_id, value, position) VALUES (?1, ?2, ?3, ?4, ?5)")
			.bind(actor_id.as_str())
			.bind(list_name)
			.bind(&item.item_id)
			.bind(serde_json::to_string(&item.value)?)
			.bind(item.position)
			.execute(&self.pool)
			.await?;
		Ok(item)
	}

	async fn list_update(&self, actor_id: &ActorId, list_name: &str, item_id: &str, value: serde_json::Value) -> ClResult<()> {
		let result = sqlx::query("UPDATE list_properties SET value = ?1 WHERE actor_id = ?2 AND list_name = ?3 AND item_id = ?4")
			.bind(serde_json::to_string(&value)?)
			.bind(actor_id.as_str())
			.bind(list_name)
			.bind(item_id)
			.execute(&self.pool)
			.await?;
		if result.rows_affected() == 0 {
			return Err(Error::not_found(Domain::Core));
		}
		Ok(())
	}

	async fn list_delete(&self, actor_id: &ActorId, list_name: &str, item_id: &str) -> ClResult<()> {
		sqlx::query("DELETE FROM list_properties WHERE actor_id = ?1 AND list_name = ?2 AND item_id = ?3")
			.bind(actor_id.as_str())
			.bind(list_name)
			.bind(item_id)
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	async fn read_versioned(&self, actor_id: &ActorId, namespace: &str, key: &str) -> ClResult<Option<VersionedRecord<serde_json::Value>>> {
		let row = sqlx::query("SELECT value, version FROM versioned WHERE actor_id = ?1 AND namespace = ?2 AND key = ?3")
			.bind(actor_id.as_str())
			.bind(namespace)
			.bind(key)
			.fetch_optional(&self.pool)
			.await?;
		row.map(|row| {
			let value: String = row.try_get("value")?;
			Ok(VersionedRecord { value: serde_json::from_str(&value)?, version: row.try_get::<i64, _>("version")? as u64 })
		})
		.transpose()
	}

	async fn compare_and_swap(
		&self,
		actor_id: &ActorId,
		namespace: &str,
		key: &str,
		expected_version: Option<u64>,
		new_value: serde_json::Value,
	) -> ClResult<VersionedRecord<serde_json::Value>> {
		let mut tx = self.pool.begin().await?;
		let current: Option<i64> = sqlx::query("SELECT version FROM versioned WHERE actor_id = ?1 AND namespace = ?2 AND key = ?3")
			.bind(actor_id.as_str())
			.bind(namespace)
			.bind(key)
			.fetch_optional(&mut *tx)
			.await?
			.map(|r| r.try_get("version"))
			.transpose()?;
		if current.map(|v| v as u64) != expected_version {
			return Err(Error::Conflict(Domain::Callback, format!("CAS mismatch on '{namespace}/{key}'")));
		}
		let new_version = current.unwrap_or(0) + 1;
		let serialized = serde_json::to_string(&new_value)?;
		sqlx::query(
			"INSERT INTO versioned (actor_id, namespace, key, value, version) VALUES (?1, ?2, ?3, ?4, ?5)
			 ON CONFLICT(actor_id, namespace, key) DO UPDATE SET value = excluded.value, version = excluded.version",
		)
		.bind(actor_id.as_str())
		.bind(namespace)
		.bind(key)
		.bind(&serialized)
		.bind(new_version)
		.execute(&mut *tx)
		.await?;
		tx.commit().await?;
		Ok(VersionedRecord { value: new_value, version: new_version as u64 })
	}

	async fn create_trust(&self, actor_id: &ActorId, trust: &TrustRecord) -> ClResult<()> {
		sqlx::query(
			"INSERT INTO trusts (actor_id, peer_base_url, peer_actor_id, peer_identifier, trust_type, secret, peer_secret, verification_token, approved, peer_approved, established_via, desc, created_at, last_accessed)
			 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
		)
		.bind(actor_id.as_str())
		.bind(&trust.peer.base_url)
		.bind(&trust.peer.actor_id)
		.bind(&trust.peer_identifier)
		.bind(&trust.trust_type)
		.bind(&trust.secret)
		.bind(&trust.peer_secret)
		.bind(&trust.verification_token)
		.bind(trust.approved)
		.bind(trust.peer_approved)
		.bind(serde_json::to_string(&trust.established_via)?)
		.bind(&trust.desc)
		.bind(trust.created_at.0)
		.bind(trust.last_accessed.0)
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	async fn read_trust(&self, actor_id: &ActorId, peer: &PeerId) -> ClResult<TrustRecord> {
		let row = sqlx::query(
			"SELECT peer_base_url, peer_actor_id, peer_identifier, trust_type, secret, peer_secret, verification_token, approved, peer_approved, established_via, desc, created_at, last_accessed
			 FROM trusts WHERE actor_id = ?1 AND peer_base_url = ?2",
		)
		.bind(actor_id.as_str())
		.bind(&peer.base_url)
		.fetch_optional(&self.pool)
		.await?
		.ok_or_else(|| Error::not_found(Domain::Trust))?;
		row_to_trust(&row)
	}

	async fn update_trust(&self, actor_id: &ActorId, trust: &TrustRecord) -> ClResult<()> {
		sqlx::query(
			"UPDATE trusts SET peer_actor_id = ?1, peer_identifier = ?2, trust_type = ?3, secret = ?4, peer_secret = ?5, verification_token = ?6, approved = ?7, peer_approved = ?8, established_via = ?9, desc = ?10, last_accessed = ?11
			 WHERE actor_id = ?12 AND peer_base_url = ?13",
		)
		.bind(&trust.peer.actor_id)
		.bind(&trust.peer_identifier)
		.bind(&trust.trust_type)
		.bind(&trust.secret)
		.bind(&trust.peer_secret)
		.bind(&trust.verification_token)
		.bind(trust.approved)
		.bind(trust.peer_approved)
		.bind(serde_json::to_string(&trust.established_via)?)
		.bind(&trust.desc)
		.bind(trust.last_accessed.0)
		.bind(actor_id.as_str())
		.bind(&trust.peer.base_url)
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	async fn delete_trust(&self, actor_id: &ActorId, peer: &PeerId) -> ClResult<()> {
		sqlx::query("DELETE FROM trusts WHERE actor_id = ?1 AND peer_base_url = ?2").bind(actor_id.as_str()).bind(&peer.base_url).execute(&self.pool).await?;
		Ok(())
	}

	async fn list_trusts(&self, actor_id: &ActorId, trust_type: Option<&str>) -> ClResult<Vec<TrustRecord>> {
		let rows = sqlx::query(
			"SELECT peer_base_url, peer_actor_id, peer_identifier, trust_type, secret, peer_secret, verification_token, approved, peer_approved, established_via, desc, created_at, last_accessed
			 FROM trusts WHERE actor_id = ?1 AND (?2 IS NULL OR trust_type = ?2)",
		)
		.bind(actor_id.as_str())
		.bind(trust_type)
		.fetch_all(&self.pool)
		.await?;
		rows.iter().map(row_to_trust).collect()
	}

	async fn read_override(&self, actor_id: &ActorId, peer: &PeerId) -> ClResult<Option<PermissionOverrideRecord>> {
		let row = sqlx::query("SELECT overrides, version, created_at FROM overrides WHERE actor_id = ?1 AND peer_base_url = ?2")
			.bind(actor_id.as_str())
			.bind(&peer.base_url)
			.fetch_optional(&self.pool)
			.await?;
		row.map(|row| {
			let overrides: String = row.try_get("overrides")?;
			Ok(PermissionOverrideRecord {
				peer: peer.clone(),
				overrides: serde_json::from_str(&overrides)?,
				version: row.try_get::<i64, _>("version")? as u64,
				created_at: Timestamp(row.try_get("created_at")?),
			})
		})
		.transpose()
	}

	async fn write_override(&self, actor_id: &ActorId, record: &PermissionOverrideRecord) -> ClResult<()> {
		sqlx::query(
			"INSERT INTO overrides (actor_id, peer_base_url, overrides, version, created_at) VALUES (?1, ?2, ?3, ?4, ?5)
			 ON CONFLICT(actor_id, peer_base_url) DO UPDATE SET overrides = excluded.overrides, version = excluded.version",
		)
		.bind(actor_id.as_str())
		.bind(&record.peer.base_url)
		.bind(serde_json::to_string(&record.overrides)?)
		.bind(record.version as i64)
		.bind(record.created_at.0)
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	async fn delete_override(&self, actor_id: &ActorId, peer: &PeerId) -> ClResult<()> {
		sqlx::query("DELETE FROM overrides WHERE actor_id = ?1 AND peer_base_url = ?2").bind(actor_id.as_str()).bind(&peer.base_url).execute(&self.pool).await?;
		Ok(())
	}

	async fn create_subscription(&self, actor_id: &ActorId, sub: &SubscriptionRecord) -> ClResult<()> {
		sqlx::query(
			"INSERT INTO subscriptions (actor_id, subscription_id, peer_base_url, peer_actor_id, callback, target, subtarget, resource, granularity, sequence, last_sequence_applied, created_at)
			 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
		)
		.bind(actor_id.as_str())
		.bind(&sub.subscription_id)
		.bind(&sub.peer.base_url)
		.bind(&sub.peer.actor_id)
		.bind(sub.callback)
		.bind(&sub.target)
		.bind(&sub.subtarget)
		.bind(&sub.resource)
		.bind(serde_json::to_string(&sub.granularity)?)
		.bind(sub.sequence.0)
		.bind(sub.last_sequence_applied.0)
		.bind(sub.created_at.0)
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	async fn read_subscription(&self, actor_id: &ActorId, subscription_id: &str) -> ClResult<SubscriptionRecord> {
		let row = sqlx::query(
			"SELECT subscription_id, peer_base_url, peer_actor_id, callback, target, subtarget, resource, granularity, sequence, last_sequence_applied, created_at
			 FROM subscriptions WHERE actor_id = ?1 AND subscription_id = ?2",
		)
		.bind(actor_id.as_str())
		.bind(subscription_id)
		.fetch_optional(&self.pool)
		.await?
		.ok_or_else(|| Error::not_found(Domain::Subscription))?;
		row_to_subscription(&row)
	}

	async fn update_subscription(&self, actor_id: &ActorId, sub: &SubscriptionRecord) -> ClResult<()> {
		sqlx::query(
			"UPDATE subscriptions SET callback = ?1, target = ?2, subtarget = ?3, resource = ?4, granularity = ?5, sequence = ?6, last_sequence_applied = ?7
			 WHERE actor_id = ?8 AND subscription_id = ?9",
		)
		.bind(sub.callback)
		.bind(&sub.target)
		.bind(&sub.subtarget)
		.bind(&sub.resource)
		.bind(serde_json::to_string(&sub.granularity)?)
		.bind(sub.sequence.0)
		.bind(sub.last_sequence_applied.0)
		.bind(actor_id.as_str())
		.bind(&sub.subscription_id)
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	async fn delete_subscription(&self, actor_id: &ActorId, subscription_id: &str) -> ClResult<()> {
		sqlx::query("DELETE FROM subscriptions WHERE actor_id = ?1 AND subscription_id = ?2").bind(actor_id.as_str()).bind(subscription_id).execute(&self.pool).await?;
		sqlx::query("DELETE FROM diffs WHERE actor_id = ?1 AND subscription_id = ?2").bind(actor_id.as_str()).bind(subscription_id).execute(&self.pool).await?;
		Ok(())
	}

	async fn list_subscriptions(&self, actor_id: &ActorId) -> ClResult<Vec<SubscriptionRecord>> {
		let rows = sqlx::query(
			"SELECT subscription_id, peer_base_url, peer_actor_id, callback, target, subtarget, resource, granularity, sequence, last_sequence_applied, created_at
			 FROM subscriptions WHERE actor_id = ?1",
		)
		.bind(actor_id.as_str())
		.fetch_all(&self.pool)
		.await?;
		rows.iter().map(row_to_subscription).collect()
	}

	async fn increase_seq(&self, actor_id: &ActorId, subscription_id: &str) -> ClResult<i64> {
		let mut tx = self.pool.begin().await?;
		sqlx::query("UPDATE subscriptions SET sequence = sequence + 1 WHERE actor_id = ?1 AND subscription_id = ?2")
			.bind(actor_id.as_str())
			.bind(subscription_id)
			.execute(&mut *tx)
			.await?;
		let seq: i64 = sqlx::query("SELECT sequence FROM subscriptions WHERE actor_id = ?1 AND subscription_id = ?2")
			.bind(actor_id.as_str())
			.bind(subscription_id)
			.fetch_optional(&mut *tx)
			.await?
			.ok_or_else(|| Error::not_found(Domain::Subscription))?
			.try_get("sequence")?;
		tx.commit().await?;
		Ok(seq)
	}

	async fn append_diff(&self, actor_id: &ActorId, subscription_id: &str, diff: DiffEntry) -> ClResult<()> {
		sqlx::query("INSERT INTO diffs (actor_id, subscription_id, sequence, target, subtarget, blob, resync, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)")
			.bind(actor_id.as_str())
			.bind(subscription_id)
			.bind(diff.sequence.0)
			.bind(&diff.target)
			.bind(&diff.subtarget)
			.bind(serde_json::to_string(&diff.blob)?)
			.bind(diff.resync)
			.bind(diff.created_at.0)
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	async fn read_diffs(&self, actor_id: &ActorId, subscription_id: &str) -> ClResult<Vec<DiffEntry>> {
		let rows = sqlx::query("SELECT sequence, target, subtarget, blob, resync, created_at FROM diffs WHERE actor_id = ?1 AND subscription_id = ?2 ORDER BY sequence ASC")
			.bind(actor_id.as_str())
			.bind(subscription_id)
			.fetch_all(&self.pool)
			.await?;
		rows.into_iter()
			.map(|row| {
				let blob: String = row.try_get("blob")?;
				Ok(DiffEntry {
					sequence: SequenceId(row.try_get("sequence")?),
					target: row.try_get("target")?,
					subtarget: row.try_get("subtarget")?,
					blob: serde_json::from_str(&blob)?,
					resync: row.try_get("resync")?,
					created_at: Timestamp(row.try_get("created_at")?),
				})
			})
			.collect()
	}

	async fn prune_diffs(&self, actor_id: &ActorId, subscription_id: &str, seq: SequenceId) -> ClResult<()> {
		sqlx::query("DELETE FROM diffs WHERE actor_id = ?1 AND subscription_id = ?2 AND sequence <= ?3")
			.bind(actor_id.as_str())
			.bind(subscription_id)
			.bind(seq.0)
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	async fn read_delivery_cursor(&self, actor_id: &ActorId, peer: &PeerId) -> ClResult<Option<DeliveryCursor>> {
		let row = sqlx::query("SELECT peer_actor_id, last_acked_seq FROM delivery_cursors WHERE actor_id = ?1 AND peer_base_url = ?2")
			.bind(actor_id.as_str())
			.bind(&peer.base_url)
			.fetch_optional(&self.pool)
			.await?;
		row.map(|row| {
			Ok(DeliveryCursor { peer: peer_of(peer.base_url.clone(), row.try_get("peer_actor_id")?), last_acked_seq: SequenceId(row.try_get("last_acked_seq")?) })
		})
		.transpose()
	}

	async fn write_delivery_cursor(&self, actor_id: &ActorId, cursor: &DeliveryCursor) -> ClResult<()> {
		sqlx::query(
			"INSERT INTO delivery_cursors (actor_id, peer_base_url, peer_actor_id, last_acked_seq) VALUES (?1, ?2, ?3, ?4)
			 ON CONFLICT(actor_id, peer_base_url) DO UPDATE SET last_acked_seq = excluded.last_acked_seq",
		)
		.bind(actor_id.as_str())
		.bind(&cursor.peer.base_url)
		.bind(&cursor.peer.actor_id)
		.bind(cursor.last_acked_seq.0)
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	async fn create_oauth_client(&self, client: &OAuth2ClientRecord) -> ClResult<()> {
		sqlx::query("INSERT INTO oauth_clients (client_id, client_secret_hash, client_name, owner_actor_id, trust_type, redirect_uris, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)")
			.bind(&client.client_id)
			.bind(&client.client_secret_hash)
			.bind(&client.client_name)
			.bind(client.owner_actor_id.as_str())
			.bind(&client.trust_type)
			.bind(serde_json::to_string(&client.redirect_uris)?)
			.bind(client.created_at.0)
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	async fn read_oauth_client(&self, client_id: &str) -> ClResult<OAuth2ClientRecord> {
		let row = sqlx::query("SELECT client_id, client_secret_hash, client_name, owner_actor_id, trust_type, redirect_uris, created_at FROM oauth_clients WHERE client_id = ?1")
			.bind(client_id)
			.fetch_optional(&self.pool)
			.await?
			.ok_or_else(|| Error::not_found(Domain::Oauth))?;
		let redirect_uris: String = row.try_get("redirect_uris")?;
		Ok(OAuth2ClientRecord {
			client_id: row.try_get("client_id")?,
			client_secret_hash: row.try_get("client_secret_hash")?,
			client_name: row.try_get("client_name")?,
			owner_actor_id: ActorId::new(row.try_get::<String, _>("owner_actor_id")?),
			trust_type: row.try_get("trust_type")?,
			redirect_uris: serde_json::from_str(&redirect_uris)?,
			created_at: Timestamp(row.try_get("created_at")?),
		})
	}

	async fn delete_oauth_client(&self, client_id: &str) -> ClResult<()> {
		sqlx::query("DELETE FROM oauth_clients WHERE client_id = ?1").bind(client_id).execute(&self.pool).await?;
		Ok(())
	}

	async fn create_oauth_token(&self, token: &OAuth2TokenRecord) -> ClResult<()> {
		sqlx::query("INSERT INTO oauth_tokens (access_token, refresh_token, client_id, actor_id, trust_type, scope, issued_at, expires_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)")
			.bind(&token.access_token)
			.bind(&token.refresh_token)
			.bind(&token.client_id)
			.bind(token.actor_id.as_str())
			.bind(&token.trust_type)
			.bind(&token.scope)
			.bind(token.issued_at.0)
			.bind(token.expires_at.0)
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	async fn read_oauth_token(&self, access_token: &str) -> ClResult<OAuth2TokenRecord> {
		let row = sqlx::query("SELECT access_token, refresh_token, client_id, actor_id, trust_type, scope, issued_at, expires_at FROM oauth_tokens WHERE access_token = ?1")
			.bind(access_token)
			.fetch_optional(&self.pool)
			.await?
			.ok_or_else(|| Error::not_found(Domain::Oauth))?;
		Ok(OAuth2TokenRecord {
			access_token: row.try_get("access_token")?,
			refresh_token: row.try_get("refresh_token")?,
			client_id: row.try_get("client_id")?,
			actor_id: ActorId::new(row.try_get::<String, _>("actor_id")?),
			trust_type: row.try_get("trust_type")?,
			scope: row.try_get("scope")?,
			issued_at: Timestamp(row.try_get("issued_at")?),
			expires_at: Timestamp(row.try_get("expires_at")?),
		})
	}

	async fn delete_oauth_token(&self, access_token: &str) -> ClResult<()> {
		sqlx::query("DELETE FROM oauth_tokens WHERE access_token = ?1").bind(access_token).execute(&self.pool).await?;
		Ok(())
	}

	async fn create_login_session(&self, session: &LoginSessionRecord) -> ClResult<()> {
		sqlx::query("INSERT INTO login_sessions (session_id, provider, provider_tokens, pinned_actor_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)")
			.bind(&session.session_id)
			.bind(&session.provider)
			.bind(serde_json::to_string(&session.provider_tokens)?)
			.bind(session.pinned_actor_id.as_ref().map(ActorId::as_str))
			.bind(session.created_at.0)
			.bind(session.expires_at.0)
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	async fn read_login_session(&self, session_id: &str) -> ClResult<Option<LoginSessionRecord>> {
		let row = sqlx::query("SELECT session_id, provider, provider_tokens, pinned_actor_id, created_at, expires_at FROM login_sessions WHERE session_id = ?1")
			.bind(session_id)
			.fetch_optional(&self.pool)
			.await?;
		let Some(row) = row else {
			return Ok(None);
		};
		let provider_tokens: String = row.try_get("provider_tokens")?;
		let pinned_actor_id: Option<String> = row.try_get("pinned_actor_id")?;
		let session = LoginSessionRecord {
			session_id: row.try_get("session_id")?,
			provider: row.try_get("provider")?,
			provider_tokens: serde_json::from_str(&provider_tokens)?,
			pinned_actor_id: pinned_actor_id.map(ActorId::new),
			created_at: Timestamp(row.try_get("created_at")?),
			expires_at: Timestamp(row.try_get("expires_at")?),
		};
		if session.is_expired() {
			self.delete_login_session(session_id).await?;
			return Ok(None);
		}
		Ok(Some(session))
	}

	async fn delete_login_session(&self, session_id: &str) -> ClResult<()> {
		sqlx::query("DELETE FROM login_sessions WHERE session_id = ?1").bind(session_id).execute(&self.pool).await?;
		Ok(())
	}
}

fn row_to_trust(row: &sqlx::sqlite::SqliteRow) -> ClResult<TrustRecord> {
	let established_via: String = row.try_get("established_via")?;
	Ok(TrustRecord {
		peer: peer_of(row.try_get("peer_base_url")?, row.try_get("peer_actor_id")?),
		peer_identifier: row.try_get("peer_identifier")?,
		trust_type: row.try_get("trust_type")?,
		secret: row.try_get("secret")?,
		peer_secret: row.try_get("peer_secret")?,
		verification_token: row.try_get("verification_token")?,
		approved: row.try_get("approved")?,
		peer_approved: row.try_get("peer_approved")?,
		established_via: serde_json::from_str(&established_via)?,
		desc: row.try_get("desc")?,
		created_at: Timestamp(row.try_get("created_at")?),
		last_accessed: Timestamp(row.try_get("last_accessed")?),
	})
}

fn row_to_subscription(row: &sqlx::sqlite::SqliteRow) -> ClResult<SubscriptionRecord> {
	let granularity: String = row.try_get("granularity")?;
	Ok(SubscriptionRecord {
		subscription_id: row.try_get("subscription_id")?,
		peer: peer_of(row.try_get("peer_base_url")?, row.try_get("peer_actor_id")?),
		callback: row.try_get("callback")?,
		target: row.try_get("target")?,
		subtarget: row.try_get("subtarget")?,
		resource: row.try_get("resource")?,
		granularity: serde_json::from_str(&granularity)?,
		sequence: SequenceId(row.try_get("sequence")?),
		last_sequence_applied: SequenceId(row.try_get("last_sequence_applied")?),
		created_at: Timestamp(row.try_get("created_at")?),
	})
}


// vim: ts=4
