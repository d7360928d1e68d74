//! Settings subsystem: scope/permission-separated configuration (spec.md §8
//! ambient configuration). A setting's *scope* (where it applies) and
//! *permission* (who may change it) are independent axes, so an operator can
//! expose "actor.max_subscriptions" as actor-writable while keeping
//! "server.base_url" process-fixed.

pub mod service;
pub mod types;

pub use service::SettingsService;
pub use types::{
	FrozenSettingsRegistry, PermissionLevel, Setting, SettingDefinition, SettingDefinitionBuilder,
	SettingScope, SettingValue, SettingsRegistry,
};

// vim: ts=4
