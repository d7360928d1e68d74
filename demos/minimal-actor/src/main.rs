//! End-to-end wiring demo: one process hosting two actors that complete a
//! trust handshake, exchange a property update over the fan-out pipeline,
//! and a third client that logs in through the OAuth2 authorization server.
//! Every outbound seam (`PeerClient`, `CallbackSender`, `SyncPeerClient`,
//! `ProviderClient`) is satisfied here with an in-process implementation
//! that dispatches directly into the peer's own engine components instead of
//! making a real HTTP call - the same trait the real `http` router would
//! implement against `hyper`.

use std::sync::Arc;

use async_trait::async_trait;

use actingweb::actor::ActorFactory;
use actingweb::fanout::{CallbackPayload, CallbackSender, DeliveryOutcome, FanOutManager, FanOutTask};
use actingweb::hooks::HookRegistryBuilder;
use actingweb::permission::PermissionEvaluator;
use actingweb::property::PropertyStore;
use actingweb::subscription::SubscriptionEngine;
use actingweb::trust::{PeerClient, TrustHandshakeRequest, TrustRegistry};
use actingweb::trust_types::TrustTypeCatalog;
use actingweb::auth::{AuthRouter, Credentials};
use actingweb_core::circuit_breaker::PeerCircuitBreaker;
use actingweb_oauth2::{OAuth2Server, ProviderClient, ProviderConfig, ProviderIdentity};
use actingweb_storage_memory::MemoryStorage;
use actingweb_types::prelude::*;

const BASE_URL: &str = "https://demo.actingweb.example";

/// Loops a trust handshake straight back into the peer's own [`TrustRegistry`]
/// instead of issuing an HTTP request - stands in for the `http` module's
/// `hyper`-backed implementation of the same trait.
struct LoopbackPeerClient {
	peer_registry: Arc<TrustRegistry>,
	peer_actor: ActorId,
}

#[async_trait]
impl PeerClient for LoopbackPeerClient {
	async fn initiate(&self, _peer_base_url: &str, _relationship: &str, req: &TrustHandshakeRequest) -> ClResult<()> {
		self.peer_registry.handle_incoming(&self.peer_actor, req.clone()).await
	}

	async fn verify(&self, _peer_base_url: &str, _relationship: &str, _local_actor_id: &str, _verification_token: &str) -> ClResult<bool> {
		Ok(true)
	}

	async fn notify_approved(&self, _peer_base_url: &str, relationship: &str, local_actor_id: &str) -> ClResult<()> {
		let peer = PeerId { base_url: format!("{BASE_URL}/{local_actor_id}"), actor_id: local_actor_id.to_string() };
		self.peer_registry.mark_peer_approved(&self.peer_actor, &PeerId { base_url: peer.base_url, actor_id: String::new() }).await.ok();
		tracing::info!(relationship, "peer notified of approval");
		Ok(())
	}
}

/// Delivers a callback payload by logging it - the spot the `http` module's
/// real `hyper::Client`-backed sender would occupy.
struct LoggingCallbackSender;

#[async_trait]
impl CallbackSender for LoggingCallbackSender {
	async fn send(&self, peer: &PeerId, subscription_id: &str, payload: &CallbackPayload) -> DeliveryOutcome {
		tracing::info!(peer = %peer, subscription_id, sequence = payload.sequence, target = %payload.target, "delivered callback");
		DeliveryOutcome::Success
	}
}

/// A provider that always reports one fixed identity, standing in for a real
/// OIDC round trip against e.g. GitHub or Google.
struct DemoProvider;

#[async_trait]
impl ProviderClient for DemoProvider {
	async fn exchange_code(&self, _provider: &ProviderConfig, _code: &str, _redirect_uri: &str) -> ClResult<String> {
		Ok("demo-provider-access-token".into())
	}

	async fn fetch_identity(&self, _provider: &ProviderConfig, _provider_access_token: &str) -> ClResult<ProviderIdentity> {
		Ok(ProviderIdentity { subject: "demo-user".into(), email: Some("demo-user@example.com".into()), email_verified: true })
	}
}

#[tokio::main]
async fn main() -> ClResult<()> {
	tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).with_target(false).init();

	let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
	let app = actingweb_core::app::Builder::new(BASE_URL).storage(storage.clone()).actor_type("demo-actor").build()?;

	let actors = Arc::new(ActorFactory::new(app.storage.clone(), BASE_URL, app.opts.actor_type.clone()));
	let alice = actors.create("alice", Some("hunter2".into())).await?;
	let bob = actors.create("bob", Some("correcthorse".into())).await?;
	tracing::info!(alice = %alice.id, bob = %bob.id, "actors created");

	// Shared trust lookups, used both for the handshake below and to gate
	// `SubscriptionEngine::publish` on the subscriber's active permissions.
	let trust_types = Arc::new(TrustTypeCatalog::with_defaults());
	let evaluator = Arc::new(PermissionEvaluator::new(256));
	let subscription_trust = Arc::new(TrustRegistry::new(app.storage.clone(), trust_types.clone(), evaluator.clone(), Arc::new(NoopPeerClient), BASE_URL));

	// Property writes, gated by a hook that rejects direct writes to "secret".
	let hooks = Arc::new(
		HookRegistryBuilder::new()
			.register_property("secret", actingweb::hooks::PropertyOp::Put, |_: &ActorId, _: &str, _: actingweb::hooks::PropertyOp, _: Option<serde_json::Value>| None)
			.freeze(),
	);
	let subscriptions = Arc::new(SubscriptionEngine::new(app.storage.clone(), subscription_trust));
	let properties = PropertyStore::new(app.storage.clone(), hooks, subscriptions.clone());
	properties.write(&alice.id, "status", serde_json::json!("online"), None).await?;
	assert!(properties.write(&alice.id, "secret", serde_json::json!("nope"), None).await.is_err());

	// Trust handshake between alice and bob, each with its own registry
	// sharing the same process-wide storage (spec.md-style single deployment).
	let bob_registry = Arc::new(TrustRegistry::new(app.storage.clone(), trust_types.clone(), evaluator.clone(), Arc::new(NoopPeerClient), BASE_URL));
	let alice_peer_client = Arc::new(LoopbackPeerClient { peer_registry: bob_registry.clone(), peer_actor: bob.id.clone() });
	let alice_registry = TrustRegistry::new(app.storage.clone(), trust_types.clone(), evaluator.clone(), alice_peer_client, BASE_URL);

	let bob_peer = PeerId { base_url: format!("{BASE_URL}/{}", bob.id), actor_id: bob.id.as_str().to_string() };
	alice_registry.initiate(&alice.id, "friend", &bob_peer.base_url, Some("demo handshake".into())).await?;
	let alice_view_of_bob = PeerId { base_url: bob_peer.base_url.clone(), actor_id: String::new() };
	alice_registry.approve(&alice.id, &alice_view_of_bob).await?;

	// Bob approves his own side too - `bob_registry`'s peer client is a noop,
	// so the notification back to alice is delivered by hand here, the same
	// as `notify_approved` would if bob's side were wired to a real HTTP
	// client. Both records must be mutually approved before `publish`'s
	// permission check (spec.md §4.3, §4.4) will let a diff through.
	let bob_view_of_alice = PeerId { base_url: format!("{BASE_URL}/{}", alice.id), actor_id: String::new() };
	bob_registry.approve(&bob.id, &bob_view_of_alice).await?;
	alice_registry.mark_peer_approved(&alice.id, &alice_view_of_bob).await?;
	tracing::info!("trust handshake completed between alice and bob");

	// Subscribe bob to alice's "status" property, publish a change, and run
	// it through the fan-out worker pool.
	let bob_as_subscriber = PeerId { base_url: format!("{BASE_URL}/{}", bob.id), actor_id: bob.id.as_str().to_string() };
	let sub = subscriptions.subscribe(&alice.id, bob_as_subscriber.clone(), "status", None, None, SubscriptionGranularity::High, false).await?;
	subscriptions.publish(&alice.id, "status", None, serde_json::json!("away")).await?;
	let diffs = app.storage.read_diffs(&alice.id, &sub.subscription_id).await?;

	let circuit_breaker = Arc::new(PeerCircuitBreaker::new(app.opts.circuit_breaker_threshold, app.opts.circuit_breaker_cooldown_seconds));
	let fanout = Arc::new(FanOutManager::new(circuit_breaker, Arc::new(LoggingCallbackSender)));
	for diff in diffs {
		fanout
			.deliver(FanOutTask { actor_id: alice.id.clone(), peer: bob_as_subscriber.clone(), subscription_id: sub.subscription_id.clone(), diff })
			.await;
	}

	// Basic auth against alice's own creator credentials.
	let auth_router = AuthRouter::new(app.storage.clone(), actors.clone(), trust_types.clone(), true, format!("{BASE_URL}/oauth/authorize"));
	let decision = auth_router.authenticate(&alice.id, Credentials { basic: Some(("alice", "hunter2")), ..Default::default() }).await?;
	tracing::info!(authenticated = decision.authenticated, "creator basic auth resolved");

	// OAuth2: register an MCP-style client against alice's actor, then run
	// it through a client-credentials grant.
	let oauth_server = OAuth2Server::new(app.storage.clone());
	let registered = oauth_server.register_client(&alice.id, "demo-mcp-client", "associate", vec!["https://client.example/callback".into()]).await?;
	let issued = oauth_server.issue_client_credentials_grant(&registered.client_id, &registered.client_secret).await?;
	tracing::info!(client_id = registered.client_id, expires_in = issued.expires_in, "oauth2 client-credentials grant issued");
	oauth_server.validate_token(&issued.access_token).await?;

	// OAuth2 login flow for a human user via a stub provider.
	let oauth_client = actingweb_oauth2::OAuth2Client::new(
		app.storage.clone(),
		actors.clone(),
		Arc::new(oauth_server),
		vec![ProviderConfig {
			name: "demo".into(),
			authorize_url: "https://idp.example/authorize".into(),
			token_url: "https://idp.example/token".into(),
			client_id: "demo-client-id".into(),
			client_secret: "demo-client-secret".into(),
			scope: "openid email".into(),
		}],
		Arc::new(DemoProvider),
		b"demo-state-signing-secret",
	);
	let (redirect_url, state) = oauth_client.web_login_redirect("demo", &format!("{BASE_URL}/oauth/callback"), None, None)?;
	tracing::info!(redirect_url, "built oauth2 login redirect");
	let outcome = oauth_client.handle_web_callback("demo-auth-code", &state, &format!("{BASE_URL}/oauth/callback")).await?;
	match outcome {
		actingweb_oauth2::WebCallbackOutcome::Authenticated { actor_id, .. } => tracing::info!(%actor_id, "oauth2 login authenticated"),
		actingweb_oauth2::WebCallbackOutcome::EmailFormRequired { session_id } => tracing::info!(session_id, "oauth2 login needs an email form"),
	}

	Ok(())
}

struct NoopPeerClient;

#[async_trait]
impl PeerClient for NoopPeerClient {
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

// vim: ts=4
