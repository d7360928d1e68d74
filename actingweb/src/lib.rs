//! Actor model, trust registry, subscription engine and property store for
//! the ActingWeb distributed actor framework. Built on top of
//! `actingweb-core`'s application state and extractors; the HTTP surface
//! that mounts these onto an [`axum::Router`] lives in `crate::http`.

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

pub mod actor;
pub mod auth;
pub mod callback;
pub mod fanout;
pub mod hooks;
pub mod permission;
pub mod property;
pub mod subscription;
pub mod sync;
pub mod trust;
pub mod trust_types;
pub mod utils;

pub use actor::ActorFactory;
pub use auth::{AuthDecision, AuthResponse, AuthRouter, Credentials};
pub use callback::{CallbackHandler, CallbackProcessor, Classification, InboundCallback, ResyncTrigger};
pub use fanout::{CallbackPayload, CallbackSender, DeliveryOutcome, FanOutManager, FanOutTask};
pub use hooks::{HookRegistry, HookRegistryBuilder, PropertyOp};
pub use permission::PermissionEvaluator;
pub use property::PropertyStore;
pub use subscription::SubscriptionEngine;
pub use sync::{SyncEngine, SyncPeerClient};
pub use trust::{PeerClient, TrustHandshakeRequest, TrustRegistry};
pub use trust_types::TrustTypeCatalog;

// vim: ts=4
