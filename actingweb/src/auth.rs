//! Authentication router (spec.md §4.10). Runs once per protected request
//! and resolves a structured decision instead of a bare bool, so a handler
//! can tell "no credentials, please log in" apart from "credentials
//! presented but rejected". On success it produces the [`AuthCtx`] that
//! `actingweb-core`'s `Auth`/`OptionalAuth` extractors expect in the request
//! extensions.

use std::sync::Arc;

use actingweb_core::extract::AuthCtx;
use actingweb_types::prelude::*;

use crate::actor::ActorFactory;
use crate::permission::compile_effective;
use crate::trust_types::TrustTypeCatalog;

/// The bare HTTP shape of a rejection, mirroring what the route layer writes
/// back verbatim (spec.md §4.10 `response{code, headers, text}`).
#[derive(Clone, Debug)]
pub struct AuthResponse {
	pub code: u16,
	pub headers: Vec<(String, String)>,
	pub text: String,
}

impl AuthResponse {
	fn unauthorized_www_authenticate(authorize_url: &str) -> Self {
		Self { code: 401, headers: vec![("WWW-Authenticate".into(), format!("Bearer authorization_uri=\"{authorize_url}\""))], text: String::new() }
	}

	fn plain(code: u16, text: impl Into<String>) -> Self {
		Self { code, headers: Vec::new(), text: text.into() }
	}
}

/// The outcome of one authentication attempt (spec.md §4.10). `ctx` is
/// `Some` only when `authenticated` is true; callers stash it into the
/// request extensions for [`actingweb_core::extract::Auth`] to read.
#[derive(Clone, Debug)]
pub struct AuthDecision {
	pub authenticated: bool,
	pub actor: Option<ActorId>,
	pub identity: Option<String>,
	pub ctx: Option<AuthCtx>,
	pub response: AuthResponse,
	pub redirect: Option<String>,
}

impl AuthDecision {
	fn granted(ctx: AuthCtx) -> Self {
		Self { authenticated: true, actor: Some(ctx.actor_id.clone()), identity: Some(ctx.peer.to_string()), response: AuthResponse::plain(200, ""), ctx: Some(ctx), redirect: None }
	}

	fn denied(response: AuthResponse) -> Self {
		Self { authenticated: false, actor: None, identity: None, ctx: None, response, redirect: None }
	}

	fn redirect_to(url: impl Into<String>) -> Self {
		let url = url.into();
		Self { authenticated: false, actor: None, identity: None, ctx: None, response: AuthResponse::plain(302, ""), redirect: Some(url) }
	}
}

/// Credentials as lifted off the incoming request by the route layer, kept
/// separate from header parsing so this module has no `axum` dependency of
/// its own.
#[derive(Default)]
pub struct Credentials<'a> {
	pub bearer: Option<&'a str>,
	pub basic: Option<(&'a str, &'a str)>,
	pub oauth_cookie: Option<&'a str>,
	/// Set by programmatic callers (e.g. `GET /mcp`, spec.md line 230) that
	/// need `401` with `WWW-Authenticate` instead of a `302` to the OAuth2
	/// provider when no credentials were presented (spec.md line 185).
	pub prefer_401: bool,
}

pub struct AuthRouter {
	storage: Arc<dyn StorageBackend>,
	actors: Arc<ActorFactory>,
	trust_types: Arc<TrustTypeCatalog>,
	oauth2_login_configured: bool,
	oauth2_authorize_url: String,
}

impl AuthRouter {
	pub fn new(storage: Arc<dyn StorageBackend>, actors: Arc<ActorFactory>, trust_types: Arc<TrustTypeCatalog>, oauth2_login_configured: bool, oauth2_authorize_url: impl Into<String>) -> Self {
		Self { storage, actors, trust_types, oauth2_login_configured, oauth2_authorize_url: oauth2_authorize_url.into() }
	}

	/// Resolves credentials against `actor_id`'s own trust list and creator
	/// record, in the priority order spec.md §4.10 names: Bearer, Basic,
	/// `oauth_token` cookie, then an OAuth2 login prompt.
	pub async fn authenticate(&self, actor_id: &ActorId, creds: Credentials<'_>) -> ClResult<AuthDecision> {
		if let Some(token) = creds.bearer {
			return self.authenticate_bearer(actor_id, token).await;
		}
		if let Some((user, pass)) = creds.basic {
			return self.authenticate_basic(actor_id, user, pass).await;
		}
		if let Some(cookie) = creds.oauth_cookie {
			return self.authenticate_bearer(actor_id, cookie).await;
		}
		if self.oauth2_login_configured && !creds.prefer_401 {
			return Ok(AuthDecision::redirect_to(&self.oauth2_authorize_url));
		}
		Ok(AuthDecision::denied(AuthResponse::unauthorized_www_authenticate(&self.oauth2_authorize_url)))
	}

	/// `Authorization: Bearer <tok>` (or the `oauth_token` cookie treated the
	/// same way): an OAuth2 server token binds to its own actor, a matching
	/// trust secret binds to that peer.
	async fn authenticate_bearer(&self, actor_id: &ActorId, token: &str) -> ClResult<AuthDecision> {
		if let Ok(oauth_token) = self.storage.read_oauth_token(token).await {
			if oauth_token.is_expired() {
				return Ok(AuthDecision::denied(AuthResponse::plain(401, "token expired")));
			}
			let peer = PeerId { base_url: String::new(), actor_id: oauth_token.client_id.clone() };
			let permissions = self.effective_permissions(&oauth_token.actor_id, &peer, &oauth_token.trust_type).await?;
			return Ok(AuthDecision::granted(AuthCtx { actor_id: oauth_token.actor_id, peer, trust_type: oauth_token.trust_type, permissions }));
		}

		for trust in self.storage.list_trusts(actor_id, None).await? {
			if !trust.is_active() {
				continue;
			}
			if trust.secret == token || trust.peer_secret.as_deref() == Some(token) {
				let permissions = self.effective_permissions(actor_id, &trust.peer, &trust.trust_type).await?;
				return Ok(AuthDecision::granted(AuthCtx { actor_id: actor_id.clone(), peer: trust.peer, trust_type: trust.trust_type, permissions }));
			}
		}

		Ok(AuthDecision::denied(AuthResponse::plain(401, "invalid bearer token")))
	}

	/// `Authorization: Basic <creator:passphrase>` or a trust peer's
	/// identifier/secret pair.
	async fn authenticate_basic(&self, actor_id: &ActorId, user: &str, pass: &str) -> ClResult<AuthDecision> {
		if let Ok(actor) = self.storage.read_actor(actor_id).await {
			if actor.creator == user && self.actors.verify_passphrase(actor_id, pass).await.unwrap_or(false) {
				let trust_type = "creator".to_string();
				let peer = PeerId { base_url: String::new(), actor_id: actor_id.as_str().to_string() };
				return Ok(AuthDecision::granted(AuthCtx { actor_id: actor_id.clone(), peer, trust_type, permissions: creator_permissions() }));
			}
		}

		for trust in self.storage.list_trusts(actor_id, None).await? {
			if !trust.is_active() {
				continue;
			}
			if trust.peer_identifier == user && trust.secret == pass {
				let permissions = self.effective_permissions(actor_id, &trust.peer, &trust.trust_type).await?;
				return Ok(AuthDecision::granted(AuthCtx { actor_id: actor_id.clone(), peer: trust.peer, trust_type: trust.trust_type, permissions }));
			}
		}

		Ok(AuthDecision::denied(AuthResponse::plain(401, "invalid credentials")))
	}

	async fn effective_permissions(&self, actor_id: &ActorId, peer: &PeerId, trust_type: &str) -> ClResult<TrustPermissions> {
		let (base, _) = self.trust_types.get(trust_type).unwrap_or_default();
		let override_record = self.storage.read_override(actor_id, peer).await?;
		Ok(compile_effective(&base, override_record.as_ref().map(|o| &o.overrides)))
	}
}

/// The creator is the actor's owner and is never mediated by a trust type -
/// every category is wide open (spec.md §4.10 Basic auth "creator:passphrase").
fn creator_permissions() -> TrustPermissions {
	TrustPermissions {
		properties: CategoryPermissions::allow_all(),
		methods: CategoryPermissions::allow_all(),
		actions: CategoryPermissions::allow_all(),
		tools: CategoryPermissions::allow_all(),
		resources: CategoryPermissions::allow_all(),
		prompts: CategoryPermissions::allow_all(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use actingweb_storage_memory::MemoryStorage;

	fn storage() -> Arc<dyn StorageBackend> {
		Arc::new(MemoryStorage::new())
	}

	fn router(storage: Arc<dyn StorageBackend>) -> AuthRouter {
		let actors = Arc::new(ActorFactory::new(storage.clone(), "https://a.example", "demo"));
		AuthRouter::new(storage, actors, Arc::new(TrustTypeCatalog::with_defaults()), true, "https://a.example/oauth/authorize")
	}

	#[tokio::test]
	async fn basic_auth_with_correct_creator_passphrase_is_granted() {
		let storage = storage();
		let actors = ActorFactory::new(storage.clone(), "https://a.example", "demo");
		let created = actors.create("alice", Some("hunter2".into())).await.expect("create actor");
		let router = AuthRouter::new(storage, Arc::new(actors), Arc::new(TrustTypeCatalog::with_defaults()), true, "https://a.example/oauth/authorize");

		let decision = router.authenticate(&created.id, Credentials { basic: Some(("alice", "hunter2")), ..Default::default() }).await.expect("authenticate");
		assert!(decision.authenticated);
		assert_eq!(decision.ctx.expect("ctx").trust_type, "creator");
	}

	#[tokio::test]
	async fn basic_auth_with_wrong_passphrase_is_denied() {
		let storage = storage();
		let actors = ActorFactory::new(storage.clone(), "https://a.example", "demo");
		let created = actors.create("alice", Some("hunter2".into())).await.expect("create actor");
		let router = AuthRouter::new(storage, Arc::new(actors), Arc::new(TrustTypeCatalog::with_defaults()), true, "https://a.example/oauth/authorize");

		let decision = router.authenticate(&created.id, Credentials { basic: Some(("alice", "wrong")), ..Default::default() }).await.expect("authenticate");
		assert!(!decision.authenticated);
		assert_eq!(decision.response.code, 401);
	}

	#[tokio::test]
	async fn bearer_matching_an_active_trust_secret_resolves_the_peer() {
		let storage = storage();
		let actor = ActorId::new("a");
		let peer = PeerId { base_url: "https://b.example".into(), actor_id: "b".into() };
		storage
			.create_trust(
				&actor,
				&TrustRecord {
					peer: peer.clone(),
					peer_identifier: "b".into(),
					trust_type: "associate".into(),
					secret: "sek-123".into(),
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
			.expect("create trust");
		let router = router(storage);

		let decision = router.authenticate(&actor, Credentials { bearer: Some("sek-123"), ..Default::default() }).await.expect("authenticate");
		assert!(decision.authenticated);
		assert_eq!(decision.ctx.expect("ctx").peer, peer);
	}

	#[tokio::test]
	async fn no_credentials_redirects_when_oauth2_login_is_configured() {
		let storage = storage();
		let actor = ActorId::new("a");
		let router = router(storage);

		let decision = router.authenticate(&actor, Credentials::default()).await.expect("authenticate");
		assert!(!decision.authenticated);
		assert_eq!(decision.redirect.as_deref(), Some("https://a.example/oauth/authorize"));
	}

	/// spec.md line 185 / line 230 (`GET /mcp`): a programmatic caller must be
	/// able to get `401` with `WWW-Authenticate` instead of the web-UI `302`,
	/// even though OAuth2 login is configured.
	#[tokio::test]
	async fn no_credentials_returns_401_for_programmatic_callers_even_when_oauth2_login_is_configured() {
		let storage = storage();
		let actor = ActorId::new("a");
		let router = router(storage);

		let decision = router.authenticate(&actor, Credentials { prefer_401: true, ..Default::default() }).await.expect("authenticate");
		assert!(!decision.authenticated);
		assert!(decision.redirect.is_none());
		assert_eq!(decision.response.code, 401);
		assert!(decision.response.headers.iter().any(|(k, _)| k == "WWW-Authenticate"));
	}
}

// vim: ts=4
