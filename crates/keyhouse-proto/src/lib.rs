//! KeyHouse Protocol Buffer Definitions
//!
//! Generated message types and tonic service stubs for:
//!
//! - **KeyValueService** (`keyhouse.v2`): the public query service exposed
//!   on port 50051. Three RPCs, one per transport mode (plaintext JSON,
//!   Binary HTTP, Oblivious HTTP), all carrying opaque bodies.
//! - **InternalLookupService** (`keyhouse.internal`): the shard-to-shard
//!   lookup peer endpoint. `SecureLookup` is the production path; payloads
//!   are HPKE-encapsulated and padded.
//! - **Delta records** (`keyhouse.data`): framed record payloads for the
//!   ingestion path (key/value mutations, UDF code updates, shard
//!   mappings) plus the file-level metadata record.
//! - **UDF hook messages** (`keyhouse.udf`): binary encoding returned by
//!   the `getValuesBinary` host callback.

/// Public query service (port 50051).
pub mod v2 {
    tonic::include_proto!("keyhouse.v2");
}

/// Shard-to-shard lookup service (internal port).
pub mod internal {
    tonic::include_proto!("keyhouse.internal");
}

/// Delta file record payloads.
pub mod data {
    tonic::include_proto!("keyhouse.data");
}

/// Host callback wire types.
pub mod udf {
    tonic::include_proto!("keyhouse.udf");
}
