//! Hook dispatch (spec.md §4.9). Registration is a typed, explicit API
//! instead of runtime decoration (spec.md §9 "Decorator-registered hooks ->
//! explicit registration table"): an application builds a [`HookRegistry`]
//! once at startup and freezes it into an immutable dispatch table.
//!
//! Dispatch order is specific-name hooks before `"*"` hooks, and within the
//! same specificity, registration order - so `registry.register_property`
//! calls for `"status"` always run before any `"*"` property hook,
//! regardless of which was registered first.

use async_trait::async_trait;
use std::sync::Arc;

use actingweb_types::prelude::*;

pub const WILDCARD: &str = "*";

/// The four points a property operation can be intercepted at. `Get` lets a
/// hook hide a property (return `None` -> 404); `Put`/`Post`/`Delete` let a
/// hook reject the write (return `None` -> 403) or transform the value
/// before it's persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PropertyOp {
	Get,
	Put,
	Post,
	Delete,
}

#[async_trait]
pub trait PropertyHook: Send + Sync {
	async fn call(&self, actor_id: &ActorId, path: &str, op: PropertyOp, value: Option<serde_json::Value>) -> Option<serde_json::Value>;
}

#[async_trait]
impl<F> PropertyHook for F
where
	F: Fn(&ActorId, &str, PropertyOp, Option<serde_json::Value>) -> Option<serde_json::Value> + Send + Sync,
{
	async fn call(&self, actor_id: &ActorId, path: &str, op: PropertyOp, value: Option<serde_json::Value>) -> Option<serde_json::Value> {
		self(actor_id, path, op, value)
	}
}

#[async_trait]
pub trait CallableHook: Send + Sync {
	/// `None` means "not handled by this hook, try the next one". The first
	/// non-`None` return wins (spec.md §4.9).
	async fn call(&self, actor_id: &ActorId, name: &str, input: serde_json::Value) -> Option<ClResult<serde_json::Value>>;
}

#[async_trait]
pub trait LifecycleHook: Send + Sync {
	async fn call(&self, actor_id: &ActorId, event: LifecycleEvent);
}

/// Fan-out-only lifecycle notifications (spec.md §4.9): every registered
/// hook for the event is invoked, there is no reject/short-circuit
/// semantics like property or method hooks have.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
	ActorCreated,
	ActorDeleted,
	OauthSuccess,
	TrustApproved,
	TrustDeleted,
	EmailVerificationRequired,
	EmailVerified,
}

struct Registered<H: ?Sized> {
	pattern: String,
	hook: Arc<H>,
}

fn specificity_sort<H: ?Sized>(entries: &mut Vec<Registered<H>>) {
	// stable_sort_by_key preserves registration order within a specificity
	// tier, matching spec.md's "within the same specificity, registration
	// order" rule.
	entries.sort_by_key(|e| e.pattern == WILDCARD);
}

#[derive(Default)]
pub struct HookRegistryBuilder {
	property_hooks: std::collections::HashMap<PropertyOp, Vec<Registered<dyn PropertyHook>>>,
	method_hooks: Vec<Registered<dyn CallableHook>>,
	action_hooks: Vec<Registered<dyn CallableHook>>,
	lifecycle_hooks: std::collections::HashMap<LifecycleEvent, Vec<Arc<dyn LifecycleHook>>>,
}

impl HookRegistryBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register_property(mut self, pattern: impl Into<String>, op: PropertyOp, hook: impl PropertyHook + 'static) -> Self {
		self.property_hooks.entry(op).or_default().push(Registered { pattern: pattern.into(), hook: Arc::new(hook) });
		self
	}

	pub fn register_method(mut self, name: impl Into<String>, hook: impl CallableHook + 'static) -> Self {
		self.method_hooks.push(Registered { pattern: name.into(), hook: Arc::new(hook) });
		self
	}

	pub fn register_action(mut self, name: impl Into<String>, hook: impl CallableHook + 'static) -> Self {
		self.action_hooks.push(Registered { pattern: name.into(), hook: Arc::new(hook) });
		self
	}

	pub fn register_lifecycle(mut self, event: LifecycleEvent, hook: impl LifecycleHook + 'static) -> Self {
		self.lifecycle_hooks.entry(event).or_default().push(Arc::new(hook));
		self
	}

	pub fn freeze(mut self) -> HookRegistry {
		for hooks in self.property_hooks.values_mut() {
			specificity_sort(hooks);
		}
		specificity_sort(&mut self.method_hooks);
		specificity_sort(&mut self.action_hooks);
		tracing::info!(
			property = self.property_hooks.values().map(Vec::len).sum::<usize>(),
			methods = self.method_hooks.len(),
			actions = self.action_hooks.len(),
			"hook registry frozen"
		);
		HookRegistry {
			property_hooks: self.property_hooks,
			method_hooks: self.method_hooks,
			action_hooks: self.action_hooks,
			lifecycle_hooks: self.lifecycle_hooks,
		}
	}
}

/// Immutable dispatch table built by [`HookRegistryBuilder::freeze`]. Lookup
/// is a map access plus an ordered scan - no dynamic registration once an
/// `App` is running.
pub struct HookRegistry {
	property_hooks: std::collections::HashMap<PropertyOp, Vec<Registered<dyn PropertyHook>>>,
	method_hooks: Vec<Registered<dyn CallableHook>>,
	action_hooks: Vec<Registered<dyn CallableHook>>,
	lifecycle_hooks: std::collections::HashMap<LifecycleEvent, Vec<Arc<dyn LifecycleHook>>>,
}

fn matches_pattern(pattern: &str, name: &str) -> bool {
	pattern == WILDCARD || pattern == name
}

impl HookRegistry {
	/// Chains every hook registered for `op` matching `path` in dispatch
	/// order. The first one that returns `None` wins (hide/reject); if every
	/// hook runs to completion the last transformed value is returned.
	pub async fn dispatch_property(&self, actor_id: &ActorId, path: &str, op: PropertyOp, mut value: Option<serde_json::Value>) -> Option<serde_json::Value> {
		let Some(hooks) = self.property_hooks.get(&op) else {
			return value;
		};
		for entry in hooks {
			if !matches_pattern(&entry.pattern, path) {
				continue;
			}
			value = Some(entry.hook.call(actor_id, path, op, value).await?);
		}
		value
	}

	pub async fn dispatch_method(&self, actor_id: &ActorId, name: &str, input: serde_json::Value) -> Option<ClResult<serde_json::Value>> {
		Self::dispatch_callable(&self.method_hooks, actor_id, name, input).await
	}

	pub async fn dispatch_action(&self, actor_id: &ActorId, name: &str, input: serde_json::Value) -> Option<ClResult<serde_json::Value>> {
		Self::dispatch_callable(&self.action_hooks, actor_id, name, input).await
	}

	async fn dispatch_callable(hooks: &[Registered<dyn CallableHook>], actor_id: &ActorId, name: &str, input: serde_json::Value) -> Option<ClResult<serde_json::Value>> {
		for entry in hooks {
			if !matches_pattern(&entry.pattern, name) {
				continue;
			}
			if let Some(result) = entry.hook.call(actor_id, name, input.clone()).await {
				return Some(result);
			}
		}
		None
	}

	pub async fn dispatch_lifecycle(&self, actor_id: &ActorId, event: LifecycleEvent) {
		let Some(hooks) = self.lifecycle_hooks.get(&event) else {
			return;
		};
		for hook in hooks {
			hook.call(actor_id, event).await;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct RejectStatus;
	#[async_trait]
	impl PropertyHook for RejectStatus {
		async fn call(&self, _actor_id: &ActorId, path: &str, op: PropertyOp, value: Option<serde_json::Value>) -> Option<serde_json::Value> {
			if path == "secret" && op == PropertyOp::Get {
				None
			} else {
				value
			}
		}
	}

	#[tokio::test]
	async fn specific_hook_can_hide_a_property() {
		let registry = HookRegistryBuilder::new().register_property("secret", PropertyOp::Get, RejectStatus).freeze();
		let actor = ActorId::new("a");
		let out = registry.dispatch_property(&actor, "secret", PropertyOp::Get, Some(serde_json::json!("v"))).await;
		assert!(out.is_none());
	}

	#[tokio::test]
	async fn non_matching_path_passes_through() {
		let registry = HookRegistryBuilder::new().register_property("secret", PropertyOp::Get, RejectStatus).freeze();
		let actor = ActorId::new("a");
		let out = registry.dispatch_property(&actor, "status", PropertyOp::Get, Some(serde_json::json!("online"))).await;
		assert_eq!(out, Some(serde_json::json!("online")));
	}

	struct EchoMethod;
	#[async_trait]
	impl CallableHook for EchoMethod {
		async fn call(&self, _actor_id: &ActorId, _name: &str, input: serde_json::Value) -> Option<ClResult<serde_json::Value>> {
			Some(Ok(input))
		}
	}

	#[tokio::test]
	async fn first_non_none_method_hook_wins() {
		let registry = HookRegistryBuilder::new().register_method("ping", EchoMethod).freeze();
		let actor = ActorId::new("a");
		let out = registry.dispatch_method(&actor, "ping", serde_json::json!({"n": 1})).await;
		assert!(out.is_some());
	}

	#[tokio::test]
	async fn unregistered_method_returns_none() {
		let registry = HookRegistryBuilder::new().freeze();
		let actor = ActorId::new("a");
		let out = registry.dispatch_method(&actor, "ping", serde_json::json!({})).await;
		assert!(out.is_none());
	}
}

// vim: ts=4
