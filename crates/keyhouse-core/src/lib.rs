//! KeyHouse Core Types
//!
//! Shared building blocks for the KeyHouse query serving system:
//!
//! - **Error taxonomy**: the `ErrorKind` set every component maps its
//!   failures onto, and the wire-level `Status {code, message}` shape that
//!   carries per-key and per-partition errors inline.
//! - **Value model**: cached values are either a single string or an ordered
//!   set of strings, versioned by a caller-supplied logical commit time.
//! - **Query model**: the JSON request/response envelope served on
//!   `/v2/getvalues` (metadata + partitions of tagged arguments).
//! - **Varints**: QUIC-style variable-length integers used by the Binary
//!   HTTP codec.
//! - **Shard routing**: the stable string hash that assigns keys to shards.
//!
//! Everything here is plain data; the serving logic lives in the other
//! workspace crates.

pub mod error;
pub mod hash;
pub mod request;
pub mod response;
pub mod value;
pub mod varint;

pub use error::{ErrorKind, KvError, Result, Status};
pub use hash::shard_id;
pub use request::{Argument, GetValuesRequest, RequestPartition};
pub use response::{GetValuesResponse, PartitionOutput};
pub use value::Value;
