//! OAuth2 client login and authorization server (spec.md §4.7, §4.8) for the
//! ActingWeb actor framework. Sits alongside `actingweb`'s trust registry:
//! every issued token rides on an ordinary [`actingweb_types::TrustRecord`],
//! so permission evaluation and fan-out never need to know a caller arrived
//! via OAuth2 rather than a handshake.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod client;
pub mod server;

pub use client::{McpCallbackOutcome, OAuth2Client, ProviderClient, ProviderConfig, ProviderIdentity, WebCallbackOutcome, WebUiState};
pub use server::{authorization_server_metadata, protected_resource_metadata, AuthorizationServerMetadata, ConsentScreen, IssuedToken, OAuth2Server, ProtectedResourceMetadata, RegisteredClient};

// vim: ts=4
