//! Engine-wide error taxonomy (spec.md §7). One `Error` enum crosses every
//! crate boundary; `domain` picks the machine-readable code prefix
//! (`E-TRUST-FORBIDDEN`, `E-SUBS-GAP`, ...) so callers and logs can tell
//! which component raised it without string-matching the message.

use serde::Serialize;

pub type ClResult<T> = std::result::Result<T, Error>;

/// Which component raised the error, used to build the machine-readable
/// `E-<DOMAIN>-<REASON>` code. `Core` covers actor/property storage;
/// everything else names its spec.md §4 component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
	Core,
	Trust,
	Subscription,
	Callback,
	FanOut,
	Oauth,
	Auth,
	Storage,
}

impl Domain {
	fn code(self) -> &'static str {
		match self {
			Domain::Core => "CORE",
			Domain::Trust => "TRUST",
			Domain::Subscription => "SUBS",
			Domain::Callback => "CALLBACK",
			Domain::FanOut => "FANOUT",
			Domain::Oauth => "OAUTH",
			Domain::Auth => "AUTH",
			Domain::Storage => "STORE",
		}
	}
}

#[derive(Debug)]
pub enum Error {
	/// Missing actor/record → 404.
	NotFound(Domain),
	/// Permission denied, wrong owner, invalid passphrase → 403.
	Forbidden(Domain, String),
	/// A cross-actor OAuth callback where the authenticated identity does not
	/// match the pinned actor's creator (spec.md §4.3, §8 S3) → 403, naming
	/// both identities so the caller can tell what went wrong.
	CrossActorForbidden { expected_creator: String, authenticated_identity: String },
	/// Missing/invalid credentials → 401 with `WWW-Authenticate`.
	Unauthorized(Domain),
	DbError,
	Parse,

	ValidationError(String),
	/// Duplicate creator/peer, or CAS conflict that the caller should not
	/// retry itself → 409.
	Conflict(Domain, String),
	/// Pending queue full or rate limited → 429.
	Backpressure(String),

	NetworkError(String),
	Timeout,

	ConfigError(String),
	/// Storage unavailable, peer timeout, or CAS retries exhausted → 503;
	/// callers (including the fan-out retry loop) treat this as transient.
	ServiceUnavailable(String),
	Internal(String),

	/// Upstream OAuth provider error → 502 with `{error, error_description}`.
	Provider(String, String),
	/// MCP client presented credentials over a flow that requires an HTML
	/// form (no `trust_type` pinned, no email resolvable) → 502.
	OauthFormRequired,

	Io(std::io::Error),
}

impl Error {
	pub fn not_found(domain: Domain) -> Self {
		Error::NotFound(domain)
	}

	pub fn forbidden(domain: Domain, reason: impl Into<String>) -> Self {
		Error::Forbidden(domain, reason.into())
	}
}

/// Machine-readable body returned on every error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
	pub code: String,
	pub message: String,
}

impl ErrorResponse {
	pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
		Self { code: code.into(), message: message.into() }
	}
}

impl Error {
	/// Machine-readable code, HTTP-independent - usable even without the
	/// `server` feature.
	pub fn code(&self) -> String {
		match self {
			Error::NotFound(d) => format!("E-{}-NOTFOUND", d.code()),
			Error::Forbidden(d, _) => format!("E-{}-FORBIDDEN", d.code()),
			Error::CrossActorForbidden { .. } => "E-TRUST-CROSS-ACTOR".to_string(),
			Error::Unauthorized(d) => format!("E-{}-UNAUTH", d.code()),
			Error::DbError => "E-STORE-DBERR".to_string(),
			Error::Parse => "E-CORE-PARSE".to_string(),
			Error::ValidationError(_) => "E-CORE-INVALID".to_string(),
			Error::Conflict(d, _) => format!("E-{}-CONFLICT", d.code()),
			Error::Backpressure(_) => "E-SUBS-BACKPRESSURE".to_string(),
			Error::NetworkError(_) => "E-FANOUT-NETWORK".to_string(),
			Error::Timeout => "E-FANOUT-TIMEOUT".to_string(),
			Error::ConfigError(_) => "E-CORE-CONFIG".to_string(),
			Error::ServiceUnavailable(_) => "E-CORE-UNAVAILABLE".to_string(),
			Error::Internal(_) => "E-CORE-INTERNAL".to_string(),
			Error::Provider(_, _) => "E-OAUTH-PROVIDER".to_string(),
			Error::OauthFormRequired => "E-OAUTH-FORM-REQUIRED".to_string(),
			Error::Io(_) => "E-CORE-IO".to_string(),
		}
	}
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		match self {
			Error::CrossActorForbidden { expected_creator, authenticated_identity } => write!(
				f,
				"actor creator is {expected_creator}, but authenticated identity is {authenticated_identity}"
			),
			other => write!(f, "{:?}", other),
		}
	}
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		tracing::warn!("io error: {}", err);
		Self::Io(err)
	}
}

impl From<serde_json::Error> for Error {
	fn from(err: serde_json::Error) -> Self {
		tracing::warn!("json error: {}", err);
		Error::Parse
	}
}

impl From<std::num::ParseIntError> for Error {
	fn from(err: std::num::ParseIntError) -> Self {
		tracing::warn!("parse int error: {}", err);
		Error::Parse
	}
}

impl From<std::time::SystemTimeError> for Error {
	fn from(err: std::time::SystemTimeError) -> Self {
		tracing::warn!("system time error: {}", err);
		Error::ServiceUnavailable("system time error".into())
	}
}

#[cfg(feature = "server")]
mod server_impls {
	use super::{Domain, Error};
	use axum::{http::StatusCode, response::IntoResponse, Json};

	impl IntoResponse for Error {
		fn into_response(self) -> axum::response::Response {
			let code = self.code();
			let (status, message) = match &self {
				Error::NotFound(_) => (StatusCode::NOT_FOUND, "Resource not found".to_string()),
				Error::Forbidden(_, reason) => (StatusCode::FORBIDDEN, reason.clone()),
				Error::CrossActorForbidden { expected_creator, authenticated_identity } => (
					StatusCode::FORBIDDEN,
					format!(
						"this actor belongs to {expected_creator}; authenticated as {authenticated_identity}"
					),
				),
				Error::Unauthorized(_) => {
					(StatusCode::UNAUTHORIZED, "Authentication required or invalid token".to_string())
				}
				Error::ValidationError(msg) => {
					(StatusCode::BAD_REQUEST, format!("Request validation failed: {msg}"))
				}
				Error::Conflict(_, msg) => (StatusCode::CONFLICT, format!("Resource conflict: {msg}")),
				Error::Backpressure(msg) => (StatusCode::TOO_MANY_REQUESTS, msg.clone()),
				Error::Timeout => (StatusCode::REQUEST_TIMEOUT, "Request timeout".to_string()),
				Error::ServiceUnavailable(msg) => {
					(StatusCode::SERVICE_UNAVAILABLE, format!("Service temporarily unavailable: {msg}"))
				}
				Error::Provider(err, desc) => (StatusCode::BAD_GATEWAY, format!("{err}: {desc}")),
				Error::OauthFormRequired => (
					StatusCode::BAD_GATEWAY,
					"this client cannot complete an interactive email form".to_string(),
				),
				// 5xx internal causes - no message exposure for security
				Error::DbError => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string()),
				Error::Internal(msg) => {
					tracing::warn!("internal error: {}", msg);
					(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
				}
				Error::Parse => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string()),
				Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string()),
				Error::NetworkError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string()),
				Error::ConfigError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string()),
			};

			let body = super::ErrorResponse::new(code, message);
			(status, Json(body)).into_response()
		}
	}

	impl From<axum::Error> for Error {
		fn from(err: axum::Error) -> Self {
			tracing::warn!("axum error: {}", err);
			Error::NetworkError("axum error".into())
		}
	}

	impl From<axum::http::Error> for Error {
		fn from(err: axum::http::Error) -> Self {
			tracing::warn!("http error: {}", err);
			Error::NetworkError("http error".into())
		}
	}

	impl From<jsonwebtoken::errors::Error> for Error {
		fn from(err: jsonwebtoken::errors::Error) -> Self {
			tracing::warn!("jwt error: {}", err);
			Error::Unauthorized(Domain::Auth)
		}
	}

	impl From<sqlx::Error> for Error {
		fn from(err: sqlx::Error) -> Self {
			match err {
				sqlx::Error::RowNotFound => Error::NotFound(Domain::Storage),
				sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
					Error::Conflict(Domain::Storage, "unique constraint violated".into())
				}
				other => {
					tracing::warn!("db error: {}", other);
					Error::DbError
				}
			}
		}
	}
}

/// Locks a mutex, converting poisoning into `Error::Internal` with optional context.
#[macro_export]
macro_rules! lock {
	($mutex:expr) => {
		$mutex.lock().map_err(|_| $crate::error::Error::Internal("mutex poisoned".into()))
	};
	($mutex:expr, $context:expr) => {
		$mutex
			.lock()
			.map_err(|_| $crate::error::Error::Internal(format!("mutex poisoned: {}", $context)))
	};
}

// vim: ts=4
