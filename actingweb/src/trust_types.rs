//! Process-wide trust-type catalog (spec.md §4.3, §5). Read-mostly: writers
//! (custom type registration) take a short write lock to publish a new
//! immutable snapshot; readers clone the `Arc` under a brief read lock, so
//! steady-state lookups never contend with each other.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use actingweb_types::prelude::*;

const TRUST_TYPE_BUCKET: &str = "trust_types";

#[derive(Clone)]
struct Entry {
	permissions: TrustPermissions,
	version: u64,
}

type Snapshot = Arc<HashMap<String, Entry>>;

pub struct TrustTypeCatalog {
	snapshot: RwLock<Snapshot>,
}

impl TrustTypeCatalog {
	/// The six built-in trust types every actor understands, before any
	/// deployment-specific custom types are loaded.
	pub fn with_defaults() -> Self {
		let mut map = HashMap::new();
		for spec in builtin_trust_types() {
			map.insert(spec.name, Entry { permissions: spec.permissions, version: 1 });
		}
		Self { snapshot: RwLock::new(Arc::new(map)) }
	}

	pub fn get(&self, name: &str) -> Option<(TrustPermissions, u64)> {
		let snapshot = self.snapshot.read().clone();
		snapshot.get(name).map(|e| (e.permissions.clone(), e.version))
	}

	pub fn names(&self) -> Vec<String> {
		self.snapshot.read().keys().cloned().collect()
	}

	/// Registers (or replaces) a custom trust type. Built-in names are
	/// reserved and cannot be overridden.
	pub fn register(&self, name: impl Into<String>, permissions: TrustPermissions) -> ClResult<()> {
		let name = name.into();
		if BUILTIN_TRUST_TYPE_NAMES.contains(&name.as_str()) {
			return Err(Error::ValidationError(format!("'{name}' is a reserved built-in trust type")));
		}
		let mut guard = self.snapshot.write();
		let mut map = HashMap::clone(&guard);
		let version = map.get(&name).map(|e| e.version + 1).unwrap_or(1);
		map.insert(name, Entry { permissions, version });
		*guard = Arc::new(map);
		Ok(())
	}

	/// Loads every custom trust type template stored in the system
	/// attribute bucket (spec.md GLOSSARY "Attribute bucket"), called once
	/// at startup after [`with_defaults`].
	pub async fn load_custom(&self, storage: &dyn StorageBackend) -> ClResult<()> {
		let system = ActorId::system();
		let stored = storage.bucket_list(&system, TRUST_TYPE_BUCKET).await?;
		for (name, value) in stored {
			let permissions: TrustPermissions = serde_json::from_value(value)?;
			self.register(name, permissions)?;
		}
		Ok(())
	}

	/// Persists a custom trust type to the system bucket and the in-memory
	/// snapshot so it survives a restart.
	pub async fn register_persistent(&self, storage: &dyn StorageBackend, name: impl Into<String>, permissions: TrustPermissions) -> ClResult<()> {
		let name = name.into();
		let system = ActorId::system();
		storage.bucket_put(&system, TRUST_TYPE_BUCKET, &name, serde_json::to_value(&permissions)?).await?;
		self.register(name, permissions)
	}
}

impl Default for TrustTypeCatalog {
	fn default() -> Self {
		Self::with_defaults()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use actingweb_storage_memory::MemoryStorage;

	#[test]
	fn defaults_include_all_builtins() {
		let catalog = TrustTypeCatalog::with_defaults();
		for name in BUILTIN_TRUST_TYPE_NAMES {
			assert!(catalog.get(name).is_some(), "missing builtin {name}");
		}
	}

	#[test]
	fn cannot_override_builtin() {
		let catalog = TrustTypeCatalog::with_defaults();
		let err = catalog.register("admin", TrustPermissions::default()).unwrap_err();
		assert!(matches!(err, Error::ValidationError(_)));
	}

	#[tokio::test]
	async fn custom_type_persists_and_reloads() {
		let storage = MemoryStorage::new();
		let catalog = TrustTypeCatalog::with_defaults();
		let mut perms = TrustPermissions::default();
		perms.properties = CategoryPermissions::read_only_all();
		catalog.register_persistent(&storage, "colleague", perms.clone()).await.expect("register");

		let reloaded = TrustTypeCatalog::with_defaults();
		reloaded.load_custom(&storage).await.expect("load");
		let (loaded_perms, _) = reloaded.get("colleague").expect("present");
		assert_eq!(loaded_perms, perms);
	}
}

// vim: ts=4
