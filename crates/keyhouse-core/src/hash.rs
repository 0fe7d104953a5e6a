//! Shard Routing Hash
//!
//! Keys are assigned to shards by `farmhash::fingerprint64` over the UTF-8
//! key bytes, reduced modulo the shard count. The hash is part of the wire
//! contract: data producers shard delta files with the same function the
//! server uses to route lookups, so both sides must agree byte-for-byte.

/// Shard that owns `key` in a deployment with `num_shards` shards.
pub fn shard_id(key: &str, num_shards: i32) -> i32 {
    debug_assert!(num_shards > 0);
    (farmhash::fingerprint64(key.as_bytes()) % num_shards as u64) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_across_calls() {
        assert_eq!(shard_id("key1", 4), shard_id("key1", 4));
    }

    #[test]
    fn test_in_range() {
        for key in ["", "a", "key1", "\u{1F600}", "some-much-longer-key-value"] {
            let id = shard_id(key, 7);
            assert!((0..7).contains(&id));
        }
    }

    #[test]
    fn test_single_shard_always_zero() {
        assert_eq!(shard_id("anything", 1), 0);
    }

    #[test]
    fn test_spreads_keys() {
        // Not a distribution test; just confirms the hash is not constant.
        let ids: std::collections::HashSet<i32> =
            (0..100).map(|i| shard_id(&format!("key{i}"), 8)).collect();
        assert!(ids.len() > 1);
    }
}
