//! Permission evaluator (spec.md §4.3): compiles a trust type's permissions
//! with a per-relationship override into one effective permission set, then
//! answers `allowed(category, name, operation)` as a pure function of
//! `(trust_type, override, request)` - deterministic and idempotent
//! (spec.md §8).
//!
//! Precedence, strict order: **deny -> allow -> trust-type-allow ->
//! default-deny**. This replaces the teacher's TOP/BOTTOM policy layering
//! (`core::abac::PermissionChecker`) with a flatter, fail-secure chain - see
//! DESIGN.md for why.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

use actingweb_types::prelude::*;

/// Shell-style glob: `*` matches any run of characters (including `/`),
/// `?` matches exactly one. Used for every pattern flavor spec.md names
/// (name glob, path glob, URI prefix) - `*` already spans path/URI
/// separators, so one matcher covers all three.
pub fn glob_match(pattern: &str, text: &str) -> bool {
	fn inner(p: &[u8], t: &[u8]) -> bool {
		match (p.first(), t.first()) {
			(None, None) => true,
			(Some(b'*'), _) => inner(&p[1..], t) || (!t.is_empty() && inner(p, &t[1..])),
			(Some(b'?'), Some(_)) => inner(&p[1..], &t[1..]),
			(Some(pc), Some(tc)) if pc == tc => inner(&p[1..], &t[1..]),
			_ => false,
		}
	}
	inner(pattern.as_bytes(), text.as_bytes())
}

fn matches_any(patterns: &[String], name: &str) -> bool {
	patterns.iter().any(|p| glob_match(p, name))
}

/// Evaluates one category's permission for `name`: denied patterns win
/// outright, then allow patterns, existence-only categories treat a match
/// as "callable" regardless of `operation`.
fn category_allows(perms: &CategoryPermissions, category: Category, name: &str, operation: Option<Operation>) -> bool {
	if matches_any(&perms.excluded_patterns, name) {
		return false;
	}
	if !matches_any(&perms.patterns, name) {
		return false;
	}
	if !category.has_operations() {
		return true;
	}
	match operation {
		Some(op) => perms.operations.contains(&op),
		None => true,
	}
}

/// Deep-merges an override onto a trust type's base permissions, per
/// category: the override's `excluded_patterns` are concatenated onto the
/// base's (so an override can only narrow, never remove a base denial),
/// while its `patterns`/`operations` extend what the base already allows.
fn merge_category(base: &CategoryPermissions, over: &CategoryPermissions) -> CategoryPermissions {
	let mut patterns = base.patterns.clone();
	patterns.extend(over.patterns.iter().cloned());
	let mut excluded_patterns = base.excluded_patterns.clone();
	excluded_patterns.extend(over.excluded_patterns.iter().cloned());
	let mut operations = base.operations.clone();
	operations.extend(over.operations.iter().copied());
	CategoryPermissions { patterns, excluded_patterns, operations }
}

pub fn compile_effective(trust_type: &TrustPermissions, over: Option<&TrustPermissions>) -> TrustPermissions {
	let Some(over) = over else {
		return trust_type.clone();
	};
	let categories = [
		Category::Properties,
		Category::Methods,
		Category::Actions,
		Category::Tools,
		Category::Resources,
		Category::Prompts,
	];
	let mut effective = TrustPermissions::default();
	for category in categories {
		*effective.category_mut(category) = merge_category(trust_type.category(category), over.category(category));
	}
	effective
}

/// Cache key: the pair of record versions that produced a compiled
/// effective permission set, so a trust-type edit or an override write
/// invalidates exactly the entries that depended on the old version
/// (spec.md §4.3, §5 "Permission evaluator cache").
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct CacheKey {
	trust_type_name: String,
	trust_type_version: u64,
	override_version: Option<u64>,
}

/// Thread-safe, bounded LRU of compiled effective permissions, grounded on
/// the teacher's keyed rate-limit cache (`core::rate_limit::limiter`).
pub struct PermissionEvaluator {
	cache: Mutex<LruCache<CacheKey, TrustPermissions>>,
}

impl PermissionEvaluator {
	pub fn new(capacity: usize) -> Self {
		let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(256).expect("256 is nonzero"));
		Self { cache: Mutex::new(LruCache::new(capacity)) }
	}

	/// Compiles (or retrieves from cache) the effective permission set for a
	/// trust type plus an optional override, then evaluates `(category,
	/// name, operation)` in deny -> allow -> trust-type-allow -> default-deny
	/// order. `operation` is ignored for existence-only categories.
	pub fn evaluate(
		&self,
		trust_type_name: &str,
		trust_type_version: u64,
		trust_type: &TrustPermissions,
		over: Option<(&TrustPermissions, u64)>,
		category: Category,
		name: &str,
		operation: Option<Operation>,
	) -> bool {
		let key = CacheKey {
			trust_type_name: trust_type_name.to_string(),
			trust_type_version,
			override_version: over.map(|(_, v)| v),
		};

		let effective = {
			let mut cache = self.cache.lock();
			if let Some(cached) = cache.get(&key) {
				cached.clone()
			} else {
				let compiled = compile_effective(trust_type, over.map(|(p, _)| p));
				cache.put(key, compiled.clone());
				compiled
			}
		};

		category_allows(effective.category(category), category, name, operation)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::BTreeSet;

	#[test]
	fn glob_matches_star_and_literal() {
		assert!(glob_match("*", "anything"));
		assert!(glob_match("status", "status"));
		assert!(glob_match("public/*", "public/profile"));
		assert!(!glob_match("public/*", "private/profile"));
		assert!(glob_match("notes://*", "notes://123"));
	}

	#[test]
	fn excluded_pattern_wins_over_allow() {
		let perms = CategoryPermissions {
			patterns: vec!["*".to_string()],
			excluded_patterns: vec!["secret".to_string()],
			operations: BTreeSet::from([Operation::Read]),
		};
		assert!(category_allows(&perms, Category::Properties, "status", Some(Operation::Read)));
		assert!(!category_allows(&perms, Category::Properties, "secret", Some(Operation::Read)));
	}

	#[test]
	fn default_deny_when_no_pattern_matches() {
		let perms = CategoryPermissions::default();
		assert!(!category_allows(&perms, Category::Properties, "status", Some(Operation::Read)));
	}

	#[test]
	fn evaluator_is_deterministic() {
		let evaluator = PermissionEvaluator::new(16);
		let mut trust_type = TrustPermissions::default();
		trust_type.properties = CategoryPermissions::read_only_all();
		let first = evaluator.evaluate("friend", 1, &trust_type, None, Category::Properties, "status", Some(Operation::Read));
		let second = evaluator.evaluate("friend", 1, &trust_type, None, Category::Properties, "status", Some(Operation::Read));
		assert_eq!(first, second);
		assert!(first);
	}

	#[test]
	fn override_excluded_pattern_always_wins() {
		let evaluator = PermissionEvaluator::new(16);
		let mut trust_type = TrustPermissions::default();
		trust_type.properties = CategoryPermissions::allow_all();
		let mut over = TrustPermissions::default();
		over.properties.excluded_patterns.push("status".to_string());
		let allowed =
			evaluator.evaluate("friend", 1, &trust_type, Some((&over, 1)), Category::Properties, "status", Some(Operation::Write));
		assert!(!allowed);
	}
}

// vim: ts=4
