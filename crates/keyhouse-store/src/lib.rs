//! KeyHouse Store
//!
//! The in-memory data plane of a serving node.
//!
//! ## Where It Sits
//!
//! ```text
//! delta files ──→ ┌─────────────────┐
//!   (ingestion)   │  KeyValueCache  │ ◄── You are here
//!                 └────────┬────────┘
//!                          │ reads
//!                 ┌────────┴────────┐
//!                 │   LocalLookup   │──→ UDF hooks, peer lookup service,
//!                 └─────────────────┘    sharded fan-out
//! ```
//!
//! ## Modules
//!
//! - [`cache::KeyValueCache`]: key → (value, logical commit time) map with
//!   deletion tombstones and set-valued keys. Writes apply under max-LCT
//!   semantics so out-of-order delta replay converges.
//! - [`lookup::Lookup`]: the capability interface the rest of the system
//!   queries through (point lookups, set lookups, set-algebra queries),
//!   with [`lookup::LocalLookup`] serving this node's cache. Sharded and
//!   remote variants live in the sharding crate.
//! - [`query`]: recursive-descent parser and evaluator for the boolean
//!   set-algebra query language (`a | b & c - d`, parenthesized).
//!
//! ## Usage
//!
//! ```ignore
//! let cache = Arc::new(KeyValueCache::new());
//! cache.update_key_value("bid", "100", 1);
//!
//! let lookup = LocalLookup::new(cache);
//! let response = lookup.get_key_values(&["bid".to_string()]).await?;
//! ```

pub mod cache;
pub mod lookup;
pub mod query;

pub use cache::KeyValueCache;
pub use lookup::{LocalLookup, Lookup};
