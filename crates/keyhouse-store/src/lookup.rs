//! Lookup Interface and Local Implementation
//!
//! `Lookup` is the capability interface every consumer of the store goes
//! through: the UDF host callbacks, the internal lookup service, and the
//! sharded fan-out all query the same three operations.
//!
//! ## Implementations
//!
//! - **`LocalLookup`** (here): serves this node's in-memory cache
//! - **`ShardedLookup`** (sharding crate): hash-routes keys across peers
//! - remote peers, reached through the lookup client (sharding crate)
//!
//! ## Why the Wire Shape?
//!
//! Results use the internal lookup response directly instead of a local
//! type. Half the callers of this trait are merging local answers with
//! peer answers that arrived in exactly this shape; returning it here
//! means the sharded merge is a map union, no translation layer.
//!
//! ## Per-Key Errors
//!
//! Misses ride inline as `status { code: 5, message: "Key not found" }` on
//! the key's own entry; the call itself succeeds. A partition asking for
//! fifty keys where one is missing still gets the other forty-nine.
//!
//! ## Usage
//!
//! ```ignore
//! let lookup = LocalLookup::new(cache.clone());
//! let response = lookup.get_key_values(&["bid".to_string()]).await?;
//! // response.kv_pairs["bid"] holds the value or an inline status
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use keyhouse_core::Result;
use keyhouse_proto::internal::{
    single_lookup_result, InternalLookupResponse, KeysetValues, SingleLookupResult,
    Status as LookupStatus,
};

use crate::cache::KeyValueCache;
use crate::query;

/// Build a scalar-value lookup result.
pub fn value_result(value: String) -> SingleLookupResult {
    SingleLookupResult {
        single_lookup_result: Some(single_lookup_result::SingleLookupResult::Value(value)),
    }
}

/// Build an inline per-key status result.
pub fn status_result(code: i32, message: impl Into<String>) -> SingleLookupResult {
    SingleLookupResult {
        single_lookup_result: Some(single_lookup_result::SingleLookupResult::Status(
            LookupStatus {
                code,
                message: message.into(),
            },
        )),
    }
}

/// Build a keyset lookup result.
pub fn keyset_result(values: Vec<String>) -> SingleLookupResult {
    SingleLookupResult {
        single_lookup_result: Some(single_lookup_result::SingleLookupResult::KeysetValues(
            KeysetValues { values },
        )),
    }
}

/// Capability interface over the key-value store.
#[async_trait]
pub trait Lookup: Send + Sync {
    /// Point lookup. Every requested key appears in the response, either
    /// with its value or with an inline status.
    async fn get_key_values(&self, keys: &[String]) -> Result<InternalLookupResponse>;

    /// Set lookup. Every requested key appears with its current membership
    /// or an inline status.
    async fn get_key_value_set(&self, keys: &[String]) -> Result<InternalLookupResponse>;

    /// Evaluate a set-algebra query; returns the sorted result set.
    async fn run_query(&self, query: &str) -> Result<Vec<String>>;
}

/// Serves lookups from this node's cache.
pub struct LocalLookup {
    cache: Arc<KeyValueCache>,
}

impl LocalLookup {
    pub fn new(cache: Arc<KeyValueCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Lookup for LocalLookup {
    async fn get_key_values(&self, keys: &[String]) -> Result<InternalLookupResponse> {
        let mut response = InternalLookupResponse::default();
        if keys.is_empty() {
            return Ok(response);
        }
        let key_set: HashSet<&str> = keys.iter().map(String::as_str).collect();
        let mut pairs = self.cache.get_key_value_pairs(&key_set);
        for key in key_set {
            let result = match pairs.remove(key) {
                Some(value) => value_result(value),
                None => status_result(5, "Key not found"),
            };
            response.kv_pairs.insert(key.to_string(), result);
        }
        Ok(response)
    }

    async fn get_key_value_set(&self, keys: &[String]) -> Result<InternalLookupResponse> {
        let mut response = InternalLookupResponse::default();
        if keys.is_empty() {
            return Ok(response);
        }
        let key_set: HashSet<&str> = keys.iter().map(String::as_str).collect();
        let mut sets = self.cache.get_key_value_sets(&key_set);
        for key in key_set {
            let result = match sets.remove(key) {
                Some(values) => keyset_result(values),
                None => status_result(5, "Key not found"),
            };
            response.kv_pairs.insert(key.to_string(), result);
        }
        Ok(response)
    }

    async fn run_query(&self, query: &str) -> Result<Vec<String>> {
        query::eval_query(query, |key| {
            let key_set: HashSet<&str> = HashSet::from([key]);
            self.cache
                .get_key_value_sets(&key_set)
                .remove(key)
                .map(|values| values.into_iter().collect())
                .unwrap_or_default()
        })
    }
}
