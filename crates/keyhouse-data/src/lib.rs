//! KeyHouse Data Loading
//!
//! Ingestion-side plumbing for delta files:
//!
//! - [`framing`]: the on-disk frame format. Every record is wrapped in a
//!   sync-marked, CRC-guarded frame so a reader dropped at an arbitrary
//!   byte offset can find the next record boundary and corrupted regions
//!   can be skipped without losing the rest of the file.
//! - [`reader`]: the concurrent sharded reader. Splits a seekable stream
//!   into byte ranges, reads them in parallel, and verifies afterwards
//!   that no records fell between adjacent shards.
//! - [`delta`]: typed layer over the frames (mutations, UDF code updates,
//!   shard mappings) plus the writer used by tooling and tests.

pub mod delta;
pub mod framing;
pub mod reader;

pub use delta::{DeltaReader, DeltaWriter};
pub use framing::SkippedRegion;
pub use reader::{ConcurrentRecordReader, ReadOptions, RecordStream, StreamFactory};
