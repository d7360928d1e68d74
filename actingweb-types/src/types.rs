//! Core identifier and value types shared across the actor model (spec.md §3).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::SystemTime;

// ActorId //
//*********//

/// Identifies an actor instance. Actors are addressed by this id in every
/// internal and external interface; the HTTP layer maps it onto the actor's
/// root URL (`/{actor_id}`).
#[derive(Clone, Debug, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub struct ActorId(pub Box<str>);

/// Reserved actor id for process-wide trust-type templates and other
/// system-level attribute buckets.
pub const SYSTEM_ACTOR_ID: &str = "_actingweb_system";
/// Reserved actor id for the OAuth2 authorization server's client/token
/// records and login sessions.
pub const OAUTH2_ACTOR_ID: &str = "_actingweb_oauth2";

impl ActorId {
	pub fn new(id: impl Into<Box<str>>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn system() -> Self {
		Self::new(SYSTEM_ACTOR_ID)
	}

	pub fn oauth2() -> Self {
		Self::new(OAUTH2_ACTOR_ID)
	}

	pub fn is_reserved(&self) -> bool {
		self.0.starts_with("_actingweb_")
	}
}

impl std::fmt::Display for ActorId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<String> for ActorId {
	fn from(id: String) -> Self {
		Self(id.into_boxed_str())
	}
}

impl From<&str> for ActorId {
	fn from(id: &str) -> Self {
		Self(id.into())
	}
}

impl Serialize for ActorId {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&self.0)
	}
}

impl<'de> Deserialize<'de> for ActorId {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		Ok(ActorId(String::deserialize(deserializer)?.into_boxed_str()))
	}
}

/// A peer actor's identity as seen across a trust relationship: its base URL
/// plus the actor id it exposes there. Two actors in the same process still
/// address each other through a `PeerId`, never a bare `ActorId`, because
/// trust is scoped to a specific URL, not a local identifier.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerId {
	pub base_url: String,
	pub actor_id: String,
}

impl std::fmt::Display for PeerId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}/{}", self.base_url, self.actor_id)
	}
}

// Timestamp //
//***********//

#[derive(Clone, Copy, Debug, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
	pub fn now() -> Timestamp {
		let res = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
		Timestamp(res.as_secs() as i64)
	}

	pub fn from_now(delta: i64) -> Timestamp {
		let res = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
		Timestamp(res.as_secs() as i64 + delta)
	}

	pub fn add_seconds(&self, seconds: i64) -> Timestamp {
		Timestamp(self.0 + seconds)
	}

	pub fn is_past(&self) -> bool {
		*self < Timestamp::now()
	}
}

impl std::fmt::Display for Timestamp {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl std::cmp::PartialEq for Timestamp {
	fn eq(&self, other: &Self) -> bool {
		self.0 == other.0
	}
}

impl std::cmp::PartialOrd for Timestamp {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl std::cmp::Eq for Timestamp {}

impl std::cmp::Ord for Timestamp {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		self.0.cmp(&other.0)
	}
}

impl Serialize for Timestamp {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_i64(self.0)
	}
}

impl<'de> Deserialize<'de> for Timestamp {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		Ok(Timestamp(i64::deserialize(deserializer)?))
	}
}

// SequenceId //
//************//

/// Monotonic per-publisher sequence number used by the subscription/diff
/// pipeline (spec.md §4.5) to detect gaps and drive resync.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceId(pub i64);

impl SequenceId {
	pub fn next(self) -> SequenceId {
		SequenceId(self.0 + 1)
	}

	pub fn is_contiguous_after(self, previous: SequenceId) -> bool {
		self.0 == previous.0 + 1
	}
}

impl std::fmt::Display for SequenceId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

// Patch<T> - For PATCH semantics //
//*********************************//

/// A field in a PATCH request, distinguishing "absent" from "explicitly null":
/// - `Undefined`: field not present in JSON - don't change existing value
/// - `Null`: field present with null value - clear the existing value
/// - `Value(T)`: field present with a value - update to this value
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Patch<T> {
	#[default]
	Undefined,
	Null,
	Value(T),
}

impl<T> Patch<T> {
	pub fn is_undefined(&self) -> bool {
		matches!(self, Patch::Undefined)
	}

	pub fn is_null(&self) -> bool {
		matches!(self, Patch::Null)
	}

	pub fn is_value(&self) -> bool {
		matches!(self, Patch::Value(_))
	}

	pub fn value(&self) -> Option<&T> {
		match self {
			Patch::Value(v) => Some(v),
			_ => None,
		}
	}

	/// Undefined -> None, Null -> Some(None), Value(v) -> Some(Some(v))
	pub fn as_option(&self) -> Option<Option<&T>> {
		match self {
			Patch::Undefined => None,
			Patch::Null => Some(None),
			Patch::Value(v) => Some(Some(v)),
		}
	}

	pub fn map<U, F>(self, f: F) -> Patch<U>
	where
		F: FnOnce(T) -> U,
	{
		match self {
			Patch::Undefined => Patch::Undefined,
			Patch::Null => Patch::Null,
			Patch::Value(v) => Patch::Value(f(v)),
		}
	}
}

impl<T> Serialize for Patch<T>
where
	T: Serialize,
{
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		match self {
			Patch::Undefined | Patch::Null => serializer.serialize_none(),
			Patch::Value(v) => v.serialize(serializer),
		}
	}
}

impl<'de, T> Deserialize<'de> for Patch<T>
where
	T: Deserialize<'de>,
{
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		Option::<T>::deserialize(deserializer).map(|opt| match opt {
			None => Patch::Null,
			Some(v) => Patch::Value(v),
		})
	}
}

// vim: ts=4
