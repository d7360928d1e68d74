//! Schema initialization. Every table is keyed so a single SQLite file can
//! hold every actor this process hosts (spec.md §4.1 "one storage backend
//! instance per process, shared across actors").

use sqlx::SqlitePool;

pub(crate) async fn init_db(db: &SqlitePool) -> Result<(), sqlx::Error> {
	let mut tx = db.begin().await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS actors (
			actor_id text NOT NULL,
			actor_type text NOT NULL,
			creator text NOT NULL,
			passphrase_hash text NOT NULL,
			created_at integer NOT NULL,
			PRIMARY KEY(actor_id)
		)",
	)
	.execute(&mut *tx)
	.await?;
	sqlx::query("CREATE INDEX IF NOT EXISTS idx_actors_creator ON actors (actor_type, creator)").execute(&mut *tx).await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS properties (
			actor_id text NOT NULL,
			name text NOT NULL,
			value text NOT NULL,
			version integer NOT NULL,
			PRIMARY KEY(actor_id, name)
		)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS list_properties (
			actor_id text NOT NULL,
			list_name text NOT NULL,
			item_id text NOT NULL,
			value text NOT NULL,
			position integer NOT NULL,
			PRIMARY KEY(actor_id, list_name, item_id)
		)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS versioned (
			actor_id text NOT NULL,
			namespace text NOT NULL,
			key text NOT NULL,
			value text NOT NULL,
			version integer NOT NULL,
			PRIMARY KEY(actor_id, namespace, key)
		)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS trusts (
			actor_id text NOT NULL,
			peer_base_url text NOT NULL,
			peer_actor_id text NOT NULL,
			peer_identifier text NOT NULL,
			trust_type text NOT NULL,
			secret text NOT NULL,
			peer_secret text,
			verification_token text,
			approved integer NOT NULL,
			peer_approved integer NOT NULL,
			established_via text NOT NULL,
			desc text,
			created_at integer NOT NULL,
			last_accessed integer NOT NULL,
			PRIMARY KEY(actor_id, peer_base_url)
		)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS overrides (
			actor_id text NOT NULL,
			peer_base_url text NOT NULL,
			overrides text NOT NULL,
			version integer NOT NULL,
			created_at integer NOT NULL,
			PRIMARY KEY(actor_id, peer_base_url)
		)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS subscriptions (
			actor_id text NOT NULL,
			subscription_id text NOT NULL,
			peer_base_url text NOT NULL,
			peer_actor_id text NOT NULL,
			callback integer NOT NULL,
			target text NOT NULL,
			subtarget text,
			resource text,
			granularity text NOT NULL,
			sequence integer NOT NULL,
			last_sequence_applied integer NOT NULL,
			created_at integer NOT NULL,
			PRIMARY KEY(actor_id, subscription_id)
		)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS diffs (
			actor_id text NOT NULL,
			subscription_id text NOT NULL,
			sequence integer NOT NULL,
			target text NOT NULL,
			subtarget text,
			blob text NOT NULL,
			resync integer NOT NULL,
			created_at integer NOT NULL,
			PRIMARY KEY(actor_id, subscription_id, sequence)
		)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS delivery_cursors (
			actor_id text NOT NULL,
			peer_base_url text NOT NULL,
			peer_actor_id text NOT NULL,
			last_acked_seq integer NOT NULL,
			PRIMARY KEY(actor_id, peer_base_url)
		)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS oauth_clients (
			client_id text NOT NULL,
			client_secret_hash text NOT NULL,
			client_name text NOT NULL,
			owner_actor_id text NOT NULL,
			trust_type text NOT NULL,
			redirect_uris text NOT NULL,
			created_at integer NOT NULL,
			PRIMARY KEY(client_id)
		)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS oauth_tokens (
			access_token text NOT NULL,
			refresh_token text,
			client_id text NOT NULL,
			actor_id text NOT NULL,
			trust_type text NOT NULL,
			scope text NOT NULL,
			issued_at integer NOT NULL,
			expires_at integer NOT NULL,
			PRIMARY KEY(access_token)
		)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS login_sessions (
			session_id text NOT NULL,
			provider text NOT NULL,
			provider_tokens text NOT NULL,
			pinned_actor_id text,
			created_at integer NOT NULL,
			expires_at integer NOT NULL,
			PRIMARY KEY(session_id)
		)",
	)
	.execute(&mut *tx)
	.await?;

	sqlx::query(
		"CREATE TABLE IF NOT EXISTS buckets (
			actor_id text NOT NULL,
			bucket text NOT NULL,
			key text NOT NULL,
			value text NOT NULL,
			PRIMARY KEY(actor_id, bucket, key)
		)",
	)
	.execute(&mut *tx)
	.await?;

	tx.commit().await
}

// vim: ts=4
