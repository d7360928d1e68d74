//! Axum extractors for authenticated requests. Trust resolution happens once
//! in the auth middleware (spec.md §4.10); these extractors just read the
//! `AuthCtx` it stashed in the request extensions so handlers never touch the
//! trust registry directly.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use actingweb_types::prelude::*;

/// The peer identity and trust relationship a request authenticated under.
#[derive(Clone, Debug)]
pub struct AuthCtx {
	pub actor_id: ActorId,
	pub peer: PeerId,
	pub trust_type: String,
	pub permissions: TrustPermissions,
}

/// Extracts the authenticated peer. Fails the request with 401 if the auth
/// middleware did not attach an `AuthCtx` - i.e. the request had no trust
/// token, or the token didn't verify.
#[derive(Debug, Clone)]
pub struct Auth(pub AuthCtx);

impl<S> FromRequestParts<S> for Auth
where
	S: Send + Sync,
{
	type Rejection = Error;

	async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
		parts
			.extensions
			.get::<AuthCtx>()
			.cloned()
			.map(Auth)
			.ok_or(Error::Unauthorized(Domain::Auth))
	}
}

/// Same as [`Auth`] but never rejects - used by endpoints that behave
/// differently for trusted vs. anonymous callers (spec.md §6 GET /properties
/// on a public actor) instead of refusing anonymous access outright.
#[derive(Debug, Clone)]
pub struct OptionalAuth(pub Option<AuthCtx>);

impl<S> FromRequestParts<S> for OptionalAuth
where
	S: Send + Sync,
{
	type Rejection = Error;

	async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
		Ok(OptionalAuth(parts.extensions.get::<AuthCtx>().cloned()))
	}
}

/// Request id assigned by middleware, threaded through tracing spans and
/// error responses.
#[derive(Clone, Debug)]
pub struct RequestId(pub String);

impl<S> FromRequestParts<S> for RequestId
where
	S: Send + Sync,
{
	type Rejection = Error;

	async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
		Ok(parts
			.extensions
			.get::<RequestId>()
			.cloned()
			.unwrap_or_else(|| RequestId(ulid::Ulid::new().to_string())))
	}
}

// vim: ts=4
