//! Common imports for downstream crates: `use actingweb_types::prelude::*;`

pub use crate::error::{ClResult, Domain, Error};
pub use crate::storage::{
	ActorRecord, AttributeBuckets, DeliveryCursor, DiffEntry, EstablishedVia, ListPropertyItem,
	LoginSessionRecord, OAuth2ClientRecord, OAuth2TokenRecord, PermissionOverrideRecord, PropertyRecord,
	StorageBackend, SubscriptionGranularity, SubscriptionRecord, TrustRecord, VersionedRecord,
};
pub use crate::trust_type::{
	builtin_trust_types, Category, CategoryPermissions, Operation, PatternFlavor, TrustPermissions, TrustTypeSpec,
	BUILTIN_TRUST_TYPE_NAMES,
};
pub use crate::types::{ActorId, Patch, PeerId, SequenceId, Timestamp, OAUTH2_ACTOR_ID, SYSTEM_ACTOR_ID};

// vim: ts=4
