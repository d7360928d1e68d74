//! OAuth2 client (login) flow (spec.md §4.7): provider-agnostic login
//! against any OAuth2/OIDC provider, routing the web-UI and MCP callback
//! shapes through distinct handlers since MCP clients can't complete an
//! interactive HTML form.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use actingweb::actor::ActorFactory;
use actingweb::utils::random_id;
use actingweb_types::prelude::*;

use crate::server::OAuth2Server;

/// A configured upstream provider (spec.md §4.7 "provider-agnostic").
#[derive(Clone, Debug)]
pub struct ProviderConfig {
	pub name: String,
	pub authorize_url: String,
	pub token_url: String,
	pub client_id: String,
	pub client_secret: String,
	pub scope: String,
}

/// What the provider told us about the authenticated user once the code is
/// exchanged (spec.md §4.7 "identity extraction").
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct ProviderIdentity {
	pub subject: String,
	pub email: Option<String>,
	pub email_verified: bool,
}

/// Outbound side of the login flow, injected so [`OAuth2Client`] stays
/// testable without a network - mirrors [`actingweb::trust::PeerClient`] and
/// [`actingweb::fanout::CallbackSender`]'s seam pattern. The HTTP-backed
/// implementation lives alongside the axum router.
#[async_trait]
pub trait ProviderClient: Send + Sync {
	async fn exchange_code(&self, provider: &ProviderConfig, code: &str, redirect_uri: &str) -> ClResult<String>;
	async fn fetch_identity(&self, provider: &ProviderConfig, provider_access_token: &str) -> ClResult<ProviderIdentity>;
}

/// State carried through the redirect round trip for a web UI login - plain
/// JSON, since the browser never needs it to be opaque (spec.md §4.7 "state
/// param has JSON (web UI) ... shape").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebUiState {
	pub provider: String,
	pub csrf: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub redirect_after: Option<String>,
	/// Set when this login is scoped to a specific actor (e.g. re-auth,
	/// account linking) rather than a fresh login. Enforces the cross-actor
	/// invariant (spec.md §4.3): the OAuth-authenticated identity must match
	/// this actor's `creator`, or the callback is rejected with 403.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub actor_id: Option<ActorId>,
}

/// Signed claims carried through the redirect round trip for an MCP login -
/// HS256-signed so a tampered `trust_type` or `client_id` is rejected before
/// it ever reaches token issuance (spec.md §4.7 "... vs encrypted (MCP)
/// shapes").
#[derive(Clone, Debug, Serialize, Deserialize)]
struct McpStateClaims {
	provider: String,
	trust_type: String,
	client_id: String,
	redirect_uri: String,
	exp: i64,
	/// Same cross-actor pin as [`WebUiState::actor_id`] (spec.md §4.3, §4.7
	/// step 5), signed along with the rest of the claims so it can't be
	/// stripped or swapped in transit.
	#[serde(skip_serializing_if = "Option::is_none")]
	actor_id: Option<ActorId>,
}

/// Outcome of a web-UI callback (spec.md §4.7).
#[derive(Debug)]
pub enum WebCallbackOutcome {
	/// Identity resolved outright - mint the `oauth_token` cookie.
	Authenticated { actor_id: ActorId, access_token: String, cookie_max_age_secs: i64 },
	/// Neither a verified email nor a usable subject came back; the caller
	/// must collect an email address via an HTML form (spec.md §4.7
	/// "login-session fallback w/ email-input form (web UI only)").
	EmailFormRequired { session_id: String },
}

/// Outcome of an MCP callback - always resolves to a redirect back to the
/// client's own redirect URI carrying the freshly issued token, since an MCP
/// client has no cookie jar (spec.md §4.7).
#[derive(Debug)]
pub struct McpCallbackOutcome {
	pub redirect_uri: String,
	pub access_token: String,
	pub actor_id: ActorId,
}

const OAUTH_COOKIE_MAX_AGE_SECS: i64 = 1_209_600;
const LOGIN_SESSION_TTL_SECS: i64 = 600;
const MCP_STATE_TTL_SECS: i64 = 600;
const ACTOR_TYPE: &str = "oauth2-login";

pub struct OAuth2Client {
	storage: Arc<dyn StorageBackend>,
	actors: Arc<ActorFactory>,
	server: Arc<OAuth2Server>,
	providers: HashMap<String, ProviderConfig>,
	provider_client: Arc<dyn ProviderClient>,
	jwt_encoding_key: EncodingKey,
	jwt_decoding_key: DecodingKey,
}

impl OAuth2Client {
	pub fn new(
		storage: Arc<dyn StorageBackend>,
		actors: Arc<ActorFactory>,
		server: Arc<OAuth2Server>,
		providers: Vec<ProviderConfig>,
		provider_client: Arc<dyn ProviderClient>,
		state_signing_secret: &[u8],
	) -> Self {
		Self {
			storage,
			actors,
			server,
			providers: providers.into_iter().map(|p| (p.name.clone(), p)).collect(),
			provider_client,
			jwt_encoding_key: EncodingKey::from_secret(state_signing_secret),
			jwt_decoding_key: DecodingKey::from_secret(state_signing_secret),
		}
	}

	fn provider(&self, name: &str) -> ClResult<&ProviderConfig> {
		self.providers.get(name).ok_or_else(|| Error::ValidationError(format!("unknown oauth2 provider '{name}'")))
	}

	/// Builds the redirect URL for a web UI login attempt and the JSON
	/// `state` payload the caller must round-trip unmodified. `actor_id`
	/// pins the cross-actor invariant (spec.md §4.3) when this login is
	/// scoped to a specific actor rather than a fresh one.
	pub fn web_login_redirect(&self, provider_name: &str, redirect_uri: &str, redirect_after: Option<String>, actor_id: Option<ActorId>) -> ClResult<(String, String)> {
		let provider = self.provider(provider_name)?;
		let csrf = random_id();
		let state = WebUiState { provider: provider_name.to_string(), csrf, redirect_after, actor_id };
		let state_json = serde_json::to_string(&state)?;
		Ok((self.authorize_url(provider, redirect_uri, &state_json), state_json))
	}

	/// Builds the redirect URL for an MCP login attempt, with `trust_type`
	/// and the client's own `redirect_uri` pinned into the signed state
	/// (spec.md §4.7 "MCP flow with trust_type pinned"). `actor_id` pins the
	/// cross-actor invariant (spec.md §4.3, §4.7 step 5) the same way.
	pub fn mcp_login_redirect(&self, provider_name: &str, idp_redirect_uri: &str, trust_type: &str, client_id: &str, client_redirect_uri: &str, actor_id: Option<ActorId>) -> ClResult<String> {
		let provider = self.provider(provider_name)?;
		let claims = McpStateClaims {
			provider: provider_name.to_string(),
			trust_type: trust_type.to_string(),
			client_id: client_id.to_string(),
			redirect_uri: client_redirect_uri.to_string(),
			exp: Timestamp::now().0 + MCP_STATE_TTL_SECS,
			actor_id,
		};
		let state = jsonwebtoken::encode(&Header::default(), &claims, &self.jwt_encoding_key)?;
		Ok(self.authorize_url(provider, idp_redirect_uri, &state))
	}

	fn authorize_url(&self, provider: &ProviderConfig, redirect_uri: &str, state: &str) -> String {
		let query = url::form_urlencoded::Serializer::new(String::new())
			.append_pair("client_id", &provider.client_id)
			.append_pair("redirect_uri", redirect_uri)
			.append_pair("scope", &provider.scope)
			.append_pair("response_type", "code")
			.append_pair("state", state)
			.finish();
		format!("{}?{query}", provider.authorize_url)
	}

	/// `GET {redirect_uri}?code=...&state=...` for the web UI flow (spec.md
	/// §4.7). Resolves an identity in priority order: verified email,
	/// provider-id synthesis, then an email-input form as a last resort.
	pub async fn handle_web_callback(&self, code: &str, state_json: &str, redirect_uri: &str) -> ClResult<WebCallbackOutcome> {
		let state: WebUiState = serde_json::from_str(state_json).map_err(|_| Error::ValidationError("malformed oauth2 state".into()))?;
		let provider = self.provider(&state.provider)?;
		let identity = self.exchange_and_fetch(provider, code, redirect_uri).await?;

		if let Some(creator) = self.resolve_creator(&identity, &state.provider) {
			if let Some(pinned) = &state.actor_id {
				self.enforce_cross_actor(pinned, &creator).await?;
			}
			let actor_id = self.find_or_create_actor(&creator).await?;
			let access_token = self.mint_login_token(&actor_id).await?;
			return Ok(WebCallbackOutcome::Authenticated { actor_id, access_token, cookie_max_age_secs: OAUTH_COOKIE_MAX_AGE_SECS });
		}

		let session_id = random_id();
		self.storage
			.create_login_session(&LoginSessionRecord {
				session_id: session_id.clone(),
				provider: state.provider,
				provider_tokens: serde_json::to_value(&identity).unwrap_or(serde_json::Value::Null),
				pinned_actor_id: state.actor_id,
				created_at: Timestamp::now(),
				expires_at: Timestamp(Timestamp::now().0 + LOGIN_SESSION_TTL_SECS),
			})
			.await?;
		Ok(WebCallbackOutcome::EmailFormRequired { session_id })
	}

	/// The email-input form submission that completes a session started by
	/// [`WebCallbackOutcome::EmailFormRequired`] (spec.md §4.7). Enforces the
	/// cross-actor invariant: a session already pinned to an actor may not be
	/// completed under a different creator identity.
	pub async fn complete_email_form(&self, session_id: &str, email: &str) -> ClResult<WebCallbackOutcome> {
		let session = self.storage.read_login_session(session_id).await?.ok_or_else(|| Error::not_found(Domain::Oauth))?;
		if let Some(pinned) = &session.pinned_actor_id {
			self.enforce_cross_actor(pinned, email).await?;
		}
		self.storage.delete_login_session(session_id).await?;
		let actor_id = self.find_or_create_actor(email).await?;
		let access_token = self.mint_login_token(&actor_id).await?;
		Ok(WebCallbackOutcome::Authenticated { actor_id, access_token, cookie_max_age_secs: OAUTH_COOKIE_MAX_AGE_SECS })
	}

	/// spec.md §4.3 "critical" security invariant: when an OAuth callback
	/// carries a pinned `actor_id`, the OAuth-authenticated identifier must
	/// match that actor's `creator`, or the callback is rejected outright.
	async fn enforce_cross_actor(&self, pinned: &ActorId, authenticated_identity: &str) -> ClResult<()> {
		let actor = self.storage.read_actor(pinned).await?;
		if actor.creator != authenticated_identity {
			return Err(Error::CrossActorForbidden { expected_creator: actor.creator, authenticated_identity: authenticated_identity.to_string() });
		}
		Ok(())
	}

	/// `GET {redirect_uri}?code=...&state=...` for the MCP flow (spec.md
	/// §4.7). An MCP client can't fill in an HTML form, so an unresolvable
	/// identity is a terminal `OauthFormRequired` (502), never a fallback
	/// session.
	pub async fn handle_mcp_callback(&self, code: &str, state: &str, idp_redirect_uri: &str) -> ClResult<McpCallbackOutcome> {
		let claims = jsonwebtoken::decode::<McpStateClaims>(state, &self.jwt_decoding_key, &Validation::new(Algorithm::HS256))
			.map_err(|_| Error::ValidationError("invalid or expired oauth2 state".into()))?
			.claims;
		let provider = self.provider(&claims.provider)?;
		let identity = self.exchange_and_fetch(provider, code, idp_redirect_uri).await?;

		let creator = self.resolve_creator(&identity, &claims.provider).ok_or(Error::OauthFormRequired)?;
		if let Some(pinned) = &claims.actor_id {
			self.enforce_cross_actor(pinned, &creator).await?;
		}
		let actor_id = self.find_or_create_actor(&creator).await?;
		let issued = self.server.issue_for_external_login(&claims.client_id, &actor_id, &claims.trust_type).await?;

		let query = url::form_urlencoded::Serializer::new(String::new()).append_pair("token", &issued.access_token).finish();
		Ok(McpCallbackOutcome { redirect_uri: format!("{}?{query}", claims.redirect_uri), access_token: issued.access_token, actor_id })
	}

	async fn exchange_and_fetch(&self, provider: &ProviderConfig, code: &str, redirect_uri: &str) -> ClResult<ProviderIdentity> {
		let provider_access_token = self.provider_client.exchange_code(provider, code, redirect_uri).await?;
		self.provider_client.fetch_identity(provider, &provider_access_token).await
	}

	/// spec.md §4.7 identity extraction priority: verified email first,
	/// provider-id synthesis (`"<provider>:<sub>"`) second, `None` otherwise.
	fn resolve_creator(&self, identity: &ProviderIdentity, provider_name: &str) -> Option<String> {
		match (&identity.email, identity.email_verified) {
			(Some(email), true) => Some(email.clone()),
			_ if !identity.subject.is_empty() => Some(format!("{provider_name}:{}", identity.subject)),
			_ => None,
		}
	}

	async fn find_or_create_actor(&self, creator: &str) -> ClResult<ActorId> {
		if let Some(existing) = self.storage.find_actor_by_creator(ACTOR_TYPE, creator).await? {
			return Ok(existing.actor_id);
		}
		Ok(self.actors.create(creator, Some(random_id())).await?.id)
	}

	async fn mint_login_token(&self, actor_id: &ActorId) -> ClResult<String> {
		let token = actingweb::utils::new_bearer_token();
		self.storage
			.create_oauth_token(&OAuth2TokenRecord {
				access_token: token.clone(),
				refresh_token: None,
				client_id: "web-ui".to_string(),
				actor_id: actor_id.clone(),
				trust_type: "creator".to_string(),
				scope: "creator".to_string(),
				issued_at: Timestamp::now(),
				expires_at: Timestamp(Timestamp::now().0 + OAUTH_COOKIE_MAX_AGE_SECS),
			})
			.await?;
		Ok(token)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use actingweb_storage_memory::MemoryStorage;

	fn provider() -> ProviderConfig {
		ProviderConfig {
			name: "demo".into(),
			authorize_url: "https://idp.example/authorize".into(),
			token_url: "https://idp.example/token".into(),
			client_id: "demo-client".into(),
			client_secret: "demo-secret".into(),
			scope: "openid email".into(),
		}
	}

	struct StubProvider {
		identity: ProviderIdentity,
	}

	#[async_trait]
	impl ProviderClient for StubProvider {
		async fn exchange_code(&self, _provider: &ProviderConfig, _code: &str, _redirect_uri: &str) -> ClResult<String> {
			Ok("provider-access-token".into())
		}
		async fn fetch_identity(&self, _provider: &ProviderConfig, _provider_access_token: &str) -> ClResult<ProviderIdentity> {
			Ok(self.identity.clone())
		}
	}

	fn client_with(identity: ProviderIdentity) -> OAuth2Client {
		let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
		let actors = Arc::new(ActorFactory::new(storage.clone(), "https://a.example", ACTOR_TYPE));
		let server = Arc::new(OAuth2Server::new(storage.clone()));
		OAuth2Client::new(storage, actors, server, vec![provider()], Arc::new(StubProvider { identity }), b"test-signing-secret")
	}

	#[tokio::test]
	async fn verified_email_authenticates_directly() {
		let client = client_with(ProviderIdentity { subject: "sub-1".into(), email: Some("alice@example.com".into()), email_verified: true });
		let (_, state) = client.web_login_redirect("demo", "https://a.example/oauth/callback", None, None).expect("redirect");

		let outcome = client.handle_web_callback("code-123", &state, "https://a.example/oauth/callback").await.expect("callback");
		match outcome {
			WebCallbackOutcome::Authenticated { access_token, .. } => assert!(access_token.starts_with("aw_")),
			WebCallbackOutcome::EmailFormRequired { .. } => panic!("expected direct authentication"),
		}
	}

	#[tokio::test]
	async fn web_callback_pinned_to_a_different_actor_is_forbidden() {
		let client = client_with(ProviderIdentity { subject: "sub-1".into(), email: Some("alice@example.com".into()), email_verified: true });
		let other_actor = client.actors.create("someone-else@example.com", None).await.expect("create other actor").id;
		let (_, state) = client.web_login_redirect("demo", "https://a.example/oauth/callback", None, Some(other_actor)).expect("redirect");

		let err = client.handle_web_callback("code-123", &state, "https://a.example/oauth/callback").await.unwrap_err();
		assert!(matches!(err, Error::CrossActorForbidden { .. }));
	}

	#[tokio::test]
	async fn unverified_email_falls_back_to_login_session() {
		let client = client_with(ProviderIdentity { subject: String::new(), email: Some("alice@example.com".into()), email_verified: false });
		let (_, state) = client.web_login_redirect("demo", "https://a.example/oauth/callback", None, None).expect("redirect");

		let outcome = client.handle_web_callback("code-123", &state, "https://a.example/oauth/callback").await.expect("callback");
		let session_id = match outcome {
			WebCallbackOutcome::EmailFormRequired { session_id } => session_id,
			WebCallbackOutcome::Authenticated { .. } => panic!("expected login session fallback"),
		};

		let outcome = client.complete_email_form(&session_id, "alice@example.com").await.expect("complete form");
		assert!(matches!(outcome, WebCallbackOutcome::Authenticated { .. }));
	}

	#[tokio::test]
	async fn mcp_callback_without_resolvable_identity_is_rejected() {
		let client = client_with(ProviderIdentity::default());
		let state = client.mcp_login_redirect("demo", "https://a.example/oauth/callback", "associate", "mcp_abc", "https://client.example/cb", None).expect("redirect");
		// state is the last `state=` query param
		let state = state.rsplit("state=").next().expect("state param").to_string();

		let err = client.handle_mcp_callback("code-123", &state, "https://a.example/oauth/callback").await.unwrap_err();
		assert!(matches!(err, Error::OauthFormRequired));
	}

	#[tokio::test]
	async fn mcp_callback_pinned_to_a_different_actor_is_forbidden() {
		let client = client_with(ProviderIdentity { subject: "sub-1".into(), email: Some("alice@example.com".into()), email_verified: true });
		let other_actor = client.actors.create("someone-else@example.com", None).await.expect("create other actor").id;
		let state = client
			.mcp_login_redirect("demo", "https://a.example/oauth/callback", "associate", "mcp_abc", "https://client.example/cb", Some(other_actor))
			.expect("redirect");
		let state = state.rsplit("state=").next().expect("state param").to_string();

		let err = client.handle_mcp_callback("code-123", &state, "https://a.example/oauth/callback").await.unwrap_err();
		assert!(matches!(err, Error::CrossActorForbidden { .. }));
	}
}

// vim: ts=4
