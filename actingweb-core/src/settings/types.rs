//! Settings types and definitions.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use actingweb_types::prelude::*;

pub type SettingValidator = Box<dyn Fn(&SettingValue) -> ClResult<()> + Send + Sync>;

/// Where a setting value applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettingScope {
	/// Fixed at process start, cannot change at runtime.
	#[serde(rename = "system")]
	System,
	/// Process-wide, shared by every actor this instance hosts.
	#[serde(rename = "global")]
	Global,
	/// One value per actor.
	#[serde(rename = "actor")]
	Actor,
}

/// Who may change a setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionLevel {
	/// Never changeable at runtime.
	#[serde(rename = "system")]
	System,
	/// Only the operator (instance administrator) role.
	#[serde(rename = "operator")]
	Operator,
	/// The owning actor itself, via its admin trust relationship.
	#[serde(rename = "actor")]
	Actor,
}

impl PermissionLevel {
	pub fn check<S: AsRef<str>>(&self, roles: &[S]) -> bool {
		match self {
			PermissionLevel::System => false,
			PermissionLevel::Operator => roles.iter().any(|r| r.as_ref() == "operator"),
			PermissionLevel::Actor => true,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
	Bool(bool),
	Int(i64),
	String(String),
	Json(serde_json::Value),
}

impl SettingValue {
	pub fn matches_type(&self, other: &SettingValue) -> bool {
		matches!(
			(self, other),
			(SettingValue::String(_), SettingValue::String(_))
				| (SettingValue::Int(_), SettingValue::Int(_))
				| (SettingValue::Bool(_), SettingValue::Bool(_))
				| (SettingValue::Json(_), SettingValue::Json(_))
		)
	}

	pub fn type_name(&self) -> &'static str {
		match self {
			SettingValue::String(_) => "string",
			SettingValue::Int(_) => "int",
			SettingValue::Bool(_) => "bool",
			SettingValue::Json(_) => "json",
		}
	}
}

pub struct SettingDefinition {
	pub key: String,
	pub description: String,
	pub default: Option<SettingValue>,
	pub scope: SettingScope,
	pub permission: PermissionLevel,
	pub optional: bool,
	pub validator: Option<SettingValidator>,
}

impl Clone for SettingDefinition {
	fn clone(&self) -> Self {
		SettingDefinition {
			key: self.key.clone(),
			description: self.description.clone(),
			default: self.default.clone(),
			scope: self.scope,
			permission: self.permission,
			optional: self.optional,
			validator: None,
		}
	}
}

impl Debug for SettingDefinition {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SettingDefinition")
			.field("key", &self.key)
			.field("scope", &self.scope)
			.field("permission", &self.permission)
			.field("optional", &self.optional)
			.field("validator", &self.validator.is_some())
			.finish()
	}
}

impl SettingDefinition {
	pub fn builder(key: impl Into<String>) -> SettingDefinitionBuilder {
		SettingDefinitionBuilder::new(key)
	}
}

pub struct SettingDefinitionBuilder {
	key: String,
	description: Option<String>,
	default: Option<SettingValue>,
	scope: SettingScope,
	permission: PermissionLevel,
	optional: bool,
	validator: Option<SettingValidator>,
}

impl SettingDefinitionBuilder {
	pub fn new(key: impl Into<String>) -> Self {
		Self {
			key: key.into(),
			description: None,
			default: None,
			scope: SettingScope::Actor,
			permission: PermissionLevel::Operator,
			optional: false,
			validator: None,
		}
	}

	pub fn description(mut self, description: impl Into<String>) -> Self {
		self.description = Some(description.into());
		self
	}

	pub fn default(mut self, value: SettingValue) -> Self {
		self.default = Some(value);
		self
	}

	pub fn scope(mut self, scope: SettingScope) -> Self {
		self.scope = scope;
		self
	}

	pub fn permission(mut self, permission: PermissionLevel) -> Self {
		self.permission = permission;
		self
	}

	pub fn optional(mut self, optional: bool) -> Self {
		self.optional = optional;
		self
	}

	pub fn validator<F>(mut self, f: F) -> Self
	where
		F: Fn(&SettingValue) -> ClResult<()> + Send + Sync + 'static,
	{
		self.validator = Some(Box::new(f));
		self
	}

	pub fn build(self) -> ClResult<SettingDefinition> {
		let description = self
			.description
			.ok_or_else(|| Error::ConfigError("setting description is required".into()))?;

		if self.scope == SettingScope::System && self.permission != PermissionLevel::System {
			return Err(Error::ConfigError("system scope settings must have system permission".into()));
		}

		Ok(SettingDefinition {
			key: self.key,
			description,
			default: self.default,
			scope: self.scope,
			permission: self.permission,
			optional: self.optional,
			validator: self.validator,
		})
	}
}

#[derive(Debug, Clone)]
pub struct Setting {
	pub key: String,
	pub value: SettingValue,
	pub actor_id: Option<ActorId>,
	pub updated_at: Timestamp,
}

/// Mutable registry used during app initialization.
pub struct SettingsRegistry {
	definitions: std::collections::HashMap<String, SettingDefinition>,
}

impl SettingsRegistry {
	pub fn new() -> Self {
		Self { definitions: std::collections::HashMap::new() }
	}

	pub fn register(&mut self, def: SettingDefinition) -> ClResult<()> {
		if self.definitions.contains_key(&def.key) {
			return Err(Error::ConfigError(format!("setting '{}' is already registered", def.key)));
		}
		tracing::debug!(key = %def.key, "registering setting");
		self.definitions.insert(def.key.clone(), def);
		Ok(())
	}

	pub fn freeze(self) -> FrozenSettingsRegistry {
		tracing::info!(count = self.definitions.len(), "freezing settings registry");
		FrozenSettingsRegistry { definitions: self.definitions }
	}

	pub fn len(&self) -> usize {
		self.definitions.len()
	}

	pub fn is_empty(&self) -> bool {
		self.definitions.is_empty()
	}
}

impl Default for SettingsRegistry {
	fn default() -> Self {
		Self::new()
	}
}

/// Immutable registry held by the running app. Freezing is a one-way trip:
/// the engine never mutates its own setting definitions after startup.
pub struct FrozenSettingsRegistry {
	definitions: std::collections::HashMap<String, SettingDefinition>,
}

impl FrozenSettingsRegistry {
	/// Exact match first, then the `"<prefix>.*"` wildcard pattern.
	pub fn get(&self, key: &str) -> Option<&SettingDefinition> {
		if let Some(def) = self.definitions.get(key) {
			return Some(def);
		}
		if let Some(dot_pos) = key.find('.') {
			let wildcard_key = format!("{}.*", &key[..dot_pos]);
			if let Some(def) = self.definitions.get(&wildcard_key) {
				return Some(def);
			}
		}
		None
	}

	pub fn list(&self) -> impl Iterator<Item = &SettingDefinition> {
		self.definitions.values()
	}

	pub fn len(&self) -> usize {
		self.definitions.len()
	}

	pub fn is_empty(&self) -> bool {
		self.definitions.is_empty()
	}
}

// vim: ts=4
