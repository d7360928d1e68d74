//! Random id/token generation shared across actors, trust secrets,
//! subscriptions and OAuth2 tokens.

use rand::RngExt;

const ID_LENGTH: usize = 24;
const SAFE: [char; 62] = [
	'0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm',
	'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J',
	'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z',
];

/// An id safe to embed in a URL path segment: actor ids, subscription ids,
/// trust secrets.
pub fn random_id() -> String {
	random_id_of_length(ID_LENGTH)
}

pub fn random_id_of_length(length: usize) -> String {
	let mut rng = rand::rng();
	(0..length).map(|_| SAFE[rng.random_range(0..SAFE.len())]).collect()
}

/// `aw_<urlsafe-random>`, with at least 32 chars of payload (spec.md §6).
pub fn new_bearer_token() -> String {
	format!("aw_{}", random_id_of_length(32))
}

/// `mcp_<urlsafe-random>`, used for dynamically registered OAuth2 clients
/// (spec.md §4.8).
pub fn new_mcp_client_id() -> String {
	format!("mcp_{}", random_id_of_length(24))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bearer_token_has_prefix_and_length() {
		let token = new_bearer_token();
		assert!(token.starts_with("aw_"));
		assert!(token.len() >= 32 + 3);
	}

	#[test]
	fn ids_are_distinct() {
		assert_ne!(random_id(), random_id());
	}
}

// vim: ts=4
