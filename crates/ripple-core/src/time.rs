//! Process-local monotonic clock, millisecond precision.
//!
//! Entry metadata stores plain `u64` milliseconds instead of
//! `Option<Instant>`: half the size and trivially comparable, at the
//! cost of an epoch anchored at process start.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Sentinel meaning "no expiry".
pub const NO_EXPIRY: u64 = 0;

/// Milliseconds since process start.
#[inline]
pub fn now_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    let start = START.get_or_init(Instant::now);
    // +1 keeps 0 reserved as the NO_EXPIRY sentinel
    start.elapsed().as_millis() as u64 + 1
}

/// Converts an optional TTL into an absolute expiry timestamp.
#[inline]
pub fn expiry_from(ttl: Option<Duration>) -> u64 {
    match ttl {
        Some(d) => now_ms() + d.as_millis() as u64,
        None => NO_EXPIRY,
    }
}

/// True once the given expiry timestamp has passed.
#[inline]
pub fn is_expired(expires_at_ms: u64) -> bool {
    expires_at_ms != NO_EXPIRY && now_ms() >= expires_at_ms
}

/// Remaining TTL in milliseconds, `None` when no expiry is set.
#[inline]
pub fn remaining_ms(expires_at_ms: u64) -> Option<u64> {
    if expires_at_ms == NO_EXPIRY {
        None
    } else {
        Some(expires_at_ms.saturating_sub(now_ms()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_is_monotonic_and_nonzero() {
        let a = now_ms();
        let b = now_ms();
        assert!(a >= 1);
        assert!(b >= a);
    }

    #[test]
    fn no_expiry_never_expires() {
        assert!(!is_expired(NO_EXPIRY));
        assert_eq!(remaining_ms(NO_EXPIRY), None);
    }

    #[test]
    fn future_expiry_has_remaining() {
        let exp = expiry_from(Some(Duration::from_secs(60)));
        assert!(!is_expired(exp));
        assert!(remaining_ms(exp).unwrap() > 59_000);
    }
}
