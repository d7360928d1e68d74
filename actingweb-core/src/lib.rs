//! Runtime infrastructure for the ActingWeb engine: application state, axum
//! extractors, the retry scheduler, settings, rate limiting and the fan-out
//! circuit breaker. The `actingweb` crate builds the actor model on top of
//! this; this crate has no opinion about actors, trust, or properties.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod app;
pub mod circuit_breaker;
pub mod extensions;
pub mod extract;
pub mod rate_limit;
pub mod scheduler;
pub mod settings;

pub use app::{App, AppBuilderOpts, AppState, Builder};
pub use extract::{Auth, AuthCtx, OptionalAuth, RequestId};

// vim: ts=4
