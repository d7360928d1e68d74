//! Trust type catalog: the permission templates a trust relationship can
//! carry (spec.md §3, §4.3).
//!
//! A trust type grants access across six independent resource categories.
//! `properties`, `resources`, and `methods`/`actions`/`tools`/`prompts` all
//! share the same shape - a pattern allow-list, a pattern deny-list, and for
//! the two operation-bearing categories (`properties`, `resources`) the
//! subset of `{read, write, delete, subscribe}` granted. Categories without
//! operations (`methods`, `actions`, `tools`, `prompts`) are existence-only:
//! a name either matches and is callable, or it doesn't exist for that peer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One of the four CRUD-ish verbs a category with operations can grant.
/// Non-operation categories (methods/actions/tools/prompts) ignore this and
/// treat a pattern match as a plain existence check.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
	Read,
	Write,
	Delete,
	Subscribe,
}

/// The six resource categories a trust type's permissions are scoped to.
/// `Properties` and `Resources` use operations; the rest are existence-only.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
	Properties,
	Methods,
	Actions,
	Tools,
	Resources,
	Prompts,
}

impl Category {
	/// Properties and resources are gated by operation; the rest are
	/// existence-only (a name either matches a pattern or it's invisible).
	pub fn has_operations(self) -> bool {
		matches!(self, Category::Properties | Category::Resources)
	}

	/// `Properties`/`Methods`/... match by glob over dotted names;
	/// `Resources` additionally accepts URI-prefix patterns (`notes://*`)
	/// for MCP resource URIs. Matching itself lives in the evaluator - this
	/// just documents which category uses which flavor.
	pub fn pattern_flavor(self) -> PatternFlavor {
		match self {
			Category::Properties => PatternFlavor::PathGlob,
			Category::Resources => PatternFlavor::UriPrefixOrGlob,
			Category::Methods | Category::Actions | Category::Tools | Category::Prompts => PatternFlavor::NameGlob,
		}
	}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PatternFlavor {
	/// Plain shell-style glob over a flat name (`get_*`).
	NameGlob,
	/// Glob over a `/`-separated property path (`status`, `contact/*`).
	PathGlob,
	/// URI prefix (`notes://*`) or a fallback name glob for non-URI names.
	UriPrefixOrGlob,
}

/// The permission rules for one resource category within a trust type or an
/// override. `allowed`/`patterns` lists what matches; `denied`/
/// `excluded_patterns` always wins over an allow, per category.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryPermissions {
	/// Patterns granting access. Empty means "nothing granted" for this
	/// category unless an override's `allowed` adds some.
	#[serde(default)]
	pub patterns: Vec<String>,
	/// Patterns that are always denied, evaluated before `patterns`.
	#[serde(default)]
	pub excluded_patterns: Vec<String>,
	/// Operations granted for matching patterns. Ignored for categories
	/// where [`Category::has_operations`] is `false`.
	#[serde(default)]
	pub operations: BTreeSet<Operation>,
}

impl CategoryPermissions {
	pub fn allow_all() -> Self {
		Self {
			patterns: vec!["*".to_string()],
			excluded_patterns: Vec::new(),
			operations: BTreeSet::from([Operation::Read, Operation::Write, Operation::Delete, Operation::Subscribe]),
		}
	}

	pub fn read_only_all() -> Self {
		Self {
			patterns: vec!["*".to_string()],
			excluded_patterns: Vec::new(),
			operations: BTreeSet::from([Operation::Read, Operation::Subscribe]),
		}
	}

	pub fn deny_all() -> Self {
		Self::default()
	}
}

/// Full permission set of a trust type or override: one [`CategoryPermissions`]
/// per resource category.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustPermissions {
	#[serde(default)]
	pub properties: CategoryPermissions,
	#[serde(default)]
	pub methods: CategoryPermissions,
	#[serde(default)]
	pub actions: CategoryPermissions,
	#[serde(default)]
	pub tools: CategoryPermissions,
	#[serde(default)]
	pub resources: CategoryPermissions,
	#[serde(default)]
	pub prompts: CategoryPermissions,
}

impl TrustPermissions {
	pub fn category(&self, category: Category) -> &CategoryPermissions {
		match category {
			Category::Properties => &self.properties,
			Category::Methods => &self.methods,
			Category::Actions => &self.actions,
			Category::Tools => &self.tools,
			Category::Resources => &self.resources,
			Category::Prompts => &self.prompts,
		}
	}

	pub fn category_mut(&mut self, category: Category) -> &mut CategoryPermissions {
		match category {
			Category::Properties => &mut self.properties,
			Category::Methods => &mut self.methods,
			Category::Actions => &mut self.actions,
			Category::Tools => &mut self.tools,
			Category::Resources => &mut self.resources,
			Category::Prompts => &mut self.prompts,
		}
	}
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustTypeSpec {
	pub name: String,
	pub permissions: TrustPermissions,
}

/// The six relationship templates every actor understands out of the box:
/// `associate` and `friend` as ascending social trust tiers, `partner` for
/// bilateral service integrations, `admin` for an operator console,
/// `viewer` for read-only integrations, and `mcp_client` for OAuth2-issued
/// machine clients (spec.md §3, §4.8). Deployments may register more at
/// `Builder` time; these names are reserved and cannot be overridden.
pub fn builtin_trust_types() -> Vec<TrustTypeSpec> {
	let mut properties_rw = TrustPermissions::default();
	properties_rw.properties = CategoryPermissions::allow_all();

	let mut properties_ro = TrustPermissions::default();
	properties_ro.properties = CategoryPermissions::read_only_all();

	let mut associate = TrustPermissions::default();
	associate.properties = CategoryPermissions {
		patterns: vec!["public/*".to_string()],
		excluded_patterns: Vec::new(),
		operations: BTreeSet::from([Operation::Read]),
	};

	let mut admin = TrustPermissions::default();
	for category in [
		Category::Properties,
		Category::Methods,
		Category::Actions,
		Category::Tools,
		Category::Resources,
		Category::Prompts,
	] {
		*admin.category_mut(category) = CategoryPermissions::allow_all();
	}

	let mut mcp_client = TrustPermissions::default();
	mcp_client.properties = CategoryPermissions::read_only_all();
	mcp_client.tools = CategoryPermissions::allow_all();
	mcp_client.resources = CategoryPermissions::read_only_all();
	mcp_client.prompts = CategoryPermissions::allow_all();

	vec![
		TrustTypeSpec { name: "associate".to_string(), permissions: associate },
		TrustTypeSpec { name: "friend".to_string(), permissions: properties_ro },
		TrustTypeSpec { name: "partner".to_string(), permissions: properties_rw },
		TrustTypeSpec { name: "admin".to_string(), permissions: admin },
		TrustTypeSpec {
			name: "viewer".to_string(),
			permissions: {
				let mut p = TrustPermissions::default();
				p.properties = CategoryPermissions::read_only_all();
				p
			},
		},
		TrustTypeSpec { name: "mcp_client".to_string(), permissions: mcp_client },
	]
}

pub const BUILTIN_TRUST_TYPE_NAMES: &[&str] = &["associate", "friend", "partner", "admin", "viewer", "mcp_client"];

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn builtin_types_are_unique() {
		let names: Vec<_> = builtin_trust_types().into_iter().map(|t| t.name).collect();
		let mut sorted = names.clone();
		sorted.sort();
		sorted.dedup();
		assert_eq!(names.len(), sorted.len());
		assert_eq!(names.len(), BUILTIN_TRUST_TYPE_NAMES.len());
	}

	#[test]
	fn viewer_cannot_write() {
		let viewer = builtin_trust_types().into_iter().find(|t| t.name == "viewer").unwrap();
		assert!(!viewer.permissions.properties.operations.contains(&Operation::Write));
		assert!(viewer.permissions.properties.operations.contains(&Operation::Read));
	}

	#[test]
	fn mcp_client_has_no_write_properties() {
		let mcp = builtin_trust_types().into_iter().find(|t| t.name == "mcp_client").unwrap();
		assert!(!mcp.permissions.properties.operations.contains(&Operation::Write));
		assert!(mcp.permissions.tools.operations.is_empty() || !mcp.permissions.tools.operations.contains(&Operation::Write));
	}
}

// vim: ts=4
