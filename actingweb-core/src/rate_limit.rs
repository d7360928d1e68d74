//! Inbound rate limiting. Protects the callback and trust-handshake
//! endpoints (spec.md §6) from a misbehaving or malicious peer, independent
//! of the fan-out circuit breaker which protects outbound delivery.

use std::net::IpAddr;
use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DashMapStateStore;
use governor::{Quota, RateLimiter};

type KeyedLimiter<K> = RateLimiter<K, DashMapStateStore<K>, DefaultClock>;

/// Keyed by source IP for unauthenticated endpoints (handshake init,
/// OAuth2 token exchange) where no trust relationship exists yet to key on.
pub struct IpRateLimiter {
	limiter: KeyedLimiter<IpAddr>,
}

impl IpRateLimiter {
	/// `burst` requests immediately, refilling at `per_second` requests/sec.
	pub fn new(per_second: NonZeroU32, burst: NonZeroU32) -> Self {
		let quota = Quota::per_second(per_second).allow_burst(burst);
		Self { limiter: RateLimiter::keyed(quota) }
	}

	/// `Ok(())` if the request is allowed, `Err(wait)` with the time until
	/// the next token if not.
	pub fn check(&self, addr: IpAddr) -> Result<(), Duration> {
		self.limiter.check_key(&addr).map_err(|not_until| not_until.wait_time_from(DefaultClock::default().now()))
	}
}

/// Keyed by the peer id of an established trust relationship, used once a
/// request has authenticated to bound how fast a single trusted peer may
/// call back into this actor.
pub struct PeerRateLimiter {
	limiter: KeyedLimiter<String>,
}

impl PeerRateLimiter {
	pub fn new(per_second: NonZeroU32, burst: NonZeroU32) -> Self {
		let quota = Quota::per_second(per_second).allow_burst(burst);
		Self { limiter: RateLimiter::keyed(quota) }
	}

	pub fn check(&self, peer_key: &str) -> Result<(), Duration> {
		self.limiter
			.check_key(&peer_key.to_string())
			.map_err(|not_until| not_until.wait_time_from(DefaultClock::default().now()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn burst_then_throttle() {
		let limiter = PeerRateLimiter::new(NonZeroU32::new(1).expect("nonzero"), NonZeroU32::new(2).expect("nonzero"));
		assert!(limiter.check("peer-a").is_ok());
		assert!(limiter.check("peer-a").is_ok());
		assert!(limiter.check("peer-a").is_err());
	}

	#[test]
	fn independent_keys_have_independent_buckets() {
		let limiter = PeerRateLimiter::new(NonZeroU32::new(1).expect("nonzero"), NonZeroU32::new(1).expect("nonzero"));
		assert!(limiter.check("peer-a").is_ok());
		assert!(limiter.check("peer-b").is_ok());
	}
}

// vim: ts=4
