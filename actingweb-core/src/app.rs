//! Shared application state and its builder.

use std::sync::Arc;

use actingweb_types::prelude::*;

use crate::circuit_breaker::PeerCircuitBreaker;
use crate::extensions::Extensions;
use crate::scheduler::Scheduler;
use crate::settings::{FrozenSettingsRegistry, SettingsRegistry, SettingsService};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// State shared by every request handler and background task. Always held
/// behind an `Arc` - see the [`App`] alias - so handlers can clone it
/// cheaply into spawned tasks.
pub struct AppState {
	pub storage: Arc<dyn StorageBackend>,
	pub scheduler: Arc<Scheduler<App>>,
	pub circuit_breaker: Arc<PeerCircuitBreaker>,
	pub settings: Arc<SettingsService>,
	pub settings_registry: Arc<FrozenSettingsRegistry>,
	pub opts: AppBuilderOpts,
	pub extensions: Extensions,
}

impl AppState {
	/// Look up a feature-specific extension (e.g. the OAuth2 authorization
	/// server state) registered by `Builder::extension`.
	pub fn ext<T: Send + Sync + 'static>(&self) -> ClResult<&T> {
		self.extensions
			.get::<T>()
			.ok_or_else(|| Error::Internal(format!("extension {} not registered", std::any::type_name::<T>())))
	}
}

pub type App = Arc<AppState>;

#[derive(Debug, Clone)]
pub struct AppBuilderOpts {
	pub base_url: String,
	pub actor_type: String,
	/// Default trust types a new actor accepts handshakes for, beyond the
	/// engine's built-in catalog.
	pub custom_trust_types: Vec<String>,
	/// How many consecutive delivery failures open a peer's circuit breaker.
	pub circuit_breaker_threshold: u32,
	pub circuit_breaker_cooldown_seconds: i64,
}

impl Default for AppBuilderOpts {
	fn default() -> Self {
		Self {
			base_url: String::new(),
			actor_type: "actor".to_string(),
			custom_trust_types: Vec::new(),
			circuit_breaker_threshold: 5,
			circuit_breaker_cooldown_seconds: 60,
		}
	}
}

/// Fluent constructor for [`App`], mirroring the settings/scheduler builders
/// used elsewhere so wiring a new deployment reads the same way throughout
/// the engine.
pub struct Builder {
	storage: Option<Arc<dyn StorageBackend>>,
	opts: AppBuilderOpts,
	settings_registry: SettingsRegistry,
	extensions: Extensions,
}

impl Builder {
	pub fn new(base_url: impl Into<String>) -> Self {
		Self {
			storage: None,
			opts: AppBuilderOpts { base_url: base_url.into(), ..AppBuilderOpts::default() },
			settings_registry: SettingsRegistry::new(),
			extensions: Extensions::new(),
		}
	}

	pub fn storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
		self.storage = Some(storage);
		self
	}

	pub fn actor_type(mut self, actor_type: impl Into<String>) -> Self {
		self.opts.actor_type = actor_type.into();
		self
	}

	pub fn circuit_breaker(mut self, threshold: u32, cooldown_seconds: i64) -> Self {
		self.opts.circuit_breaker_threshold = threshold;
		self.opts.circuit_breaker_cooldown_seconds = cooldown_seconds;
		self
	}

	pub fn register_setting(mut self, def: crate::settings::SettingDefinition) -> ClResult<Self> {
		self.settings_registry.register(def)?;
		Ok(self)
	}

	/// Stashes a feature-specific value, later retrieved with [`AppState::ext`].
	pub fn extension<T: Send + Sync + 'static>(mut self, value: T) -> Self {
		self.extensions.insert(value);
		self
	}

	pub fn build(self) -> ClResult<App> {
		let storage = self
			.storage
			.ok_or_else(|| Error::ConfigError("storage backend is required".into()))?;

		let settings_registry = Arc::new(self.settings_registry.freeze());
		let settings = Arc::new(SettingsService::new(settings_registry.clone()));
		settings.validate_required_settings()?;

		let circuit_breaker = Arc::new(PeerCircuitBreaker::new(
			self.opts.circuit_breaker_threshold,
			self.opts.circuit_breaker_cooldown_seconds,
		));

		Ok(Arc::new(AppState {
			storage,
			scheduler: Scheduler::new(),
			circuit_breaker,
			settings,
			settings_registry,
			opts: self.opts,
			extensions: self.extensions,
		}))
	}
}

// vim: ts=4
