//! Settings service: resolution (actor -> global -> default) and permission
//! checks over a frozen [`FrozenSettingsRegistry`].

use dashmap::DashMap;
use std::sync::Arc;

use actingweb_types::prelude::*;

use super::types::{FrozenSettingsRegistry, Setting, SettingScope, SettingValue};

type SettingKey = (Option<ActorId>, String);

/// Holds resolved setting values in memory. Settings are operational
/// configuration, not actor-visible state, so - unlike properties - they
/// are never synced through the subscription pipeline and don't need
/// durable storage beyond process restart.
pub struct SettingsService {
	registry: Arc<FrozenSettingsRegistry>,
	values: DashMap<SettingKey, SettingValue>,
}

impl SettingsService {
	pub fn new(registry: Arc<FrozenSettingsRegistry>) -> Self {
		Self { registry, values: DashMap::new() }
	}

	/// Resolves `key` for `actor_id`: actor-scoped value, then the global
	/// (`actor_id = None`) value, then the definition's default.
	pub async fn get(&self, actor_id: Option<&ActorId>, key: &str) -> ClResult<SettingValue> {
		let def = self
			.registry
			.get(key)
			.ok_or_else(|| Error::ValidationError(format!("unknown setting: {key}")))?;

		if let Some(actor_id) = actor_id {
			if let Some(value) = self.values.get(&(Some(actor_id.clone()), key.to_string())) {
				return Ok(value.clone());
			}
		}

		if let Some(value) = self.values.get(&(None, key.to_string())) {
			return Ok(value.clone());
		}

		def.default.clone().ok_or_else(|| {
			Error::ValidationError(format!("setting '{key}' has no default and must be configured"))
		})
	}

	pub async fn set(
		&self,
		actor_id: Option<&ActorId>,
		key: &str,
		value: SettingValue,
		roles: &[&str],
	) -> ClResult<Setting> {
		let def = self
			.registry
			.get(key)
			.ok_or_else(|| Error::ValidationError(format!("unknown setting: {key}")))?;

		if !def.permission.check(roles) {
			return Err(Error::Forbidden(Domain::Core, format!("insufficient permission for setting '{key}'")));
		}

		let storage_actor = match (def.scope, actor_id) {
			(SettingScope::System, _) => {
				return Err(Error::Forbidden(Domain::Core, format!("setting '{key}' is system-scoped")))
			}
			(SettingScope::Global, _) => None,
			(SettingScope::Actor, Some(id)) => Some(id.clone()),
			(SettingScope::Actor, None) => None,
		};

		if let Some(default) = &def.default {
			if !value.matches_type(default) {
				return Err(Error::ValidationError(format!(
					"type mismatch for setting '{key}': expected {}, got {}",
					default.type_name(),
					value.type_name()
				)));
			}
		}

		if let Some(validator) = &def.validator {
			validator(&value)?;
		}

		self.values.insert((storage_actor.clone(), key.to_string()), value.clone());

		Ok(Setting { key: key.to_string(), value, actor_id: storage_actor, updated_at: Timestamp::now() })
	}

	pub async fn delete(&self, actor_id: Option<&ActorId>, key: &str) -> ClResult<bool> {
		Ok(self.values.remove(&(actor_id.cloned(), key.to_string())).is_some())
	}

	/// Fails startup early if a required setting (no default, not optional)
	/// was never configured globally.
	pub fn validate_required_settings(&self) -> ClResult<()> {
		for def in self.registry.list() {
			if def.optional || def.default.is_some() {
				continue;
			}
			if !self.values.contains_key(&(None, def.key.clone())) {
				return Err(Error::ConfigError(format!("required setting '{}' is not configured", def.key)));
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::settings::types::{PermissionLevel, SettingDefinition, SettingsRegistry};

	fn registry() -> Arc<FrozenSettingsRegistry> {
		let mut reg = SettingsRegistry::new();
		reg.register(
			SettingDefinition::builder("server.base_url")
				.description("public base URL")
				.scope(SettingScope::Global)
				.permission(PermissionLevel::Operator)
				.build()
				.expect("valid definition"),
		)
		.expect("register");
		Arc::new(reg.freeze())
	}

	#[tokio::test]
	async fn set_requires_permission() {
		let service = SettingsService::new(registry());
		let err = service
			.set(None, "server.base_url", SettingValue::String("https://a".into()), &[])
			.await
			.unwrap_err();
		assert!(matches!(err, Error::Forbidden(Domain::Core, _)));
	}

	#[tokio::test]
	async fn get_falls_back_to_global() {
		let service = SettingsService::new(registry());
		service
			.set(None, "server.base_url", SettingValue::String("https://a".into()), &["operator"])
			.await
			.expect("set global");

		let actor = ActorId::new("alice");
		let value = service.get(Some(&actor), "server.base_url").await.expect("resolved");
		assert_eq!(value, SettingValue::String("https://a".into()));
	}
}

// vim: ts=4
