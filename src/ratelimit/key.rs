//! Identity keys for per-caller rate limiting.

use std::fmt::Display;
use std::hash::Hash;

/// A token identifying the caller being rate limited.
///
/// Anything hashable and comparable qualifies; `Display` is only used to
/// label events. `String`, `u64` and `uuid`-style newtypes all work.
pub trait IdentityKey: Eq + Hash + Clone + Display + Send + Sync + 'static {}

impl<T> IdentityKey for T where T: Eq + Hash + Clone + Display + Send + Sync + 'static {}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_identity_key<K: IdentityKey>() {}

    #[test]
    fn test_common_key_types_qualify() {
        assert_identity_key::<String>();
        assert_identity_key::<u64>();
        assert_identity_key::<std::net::IpAddr>();
    }
}
