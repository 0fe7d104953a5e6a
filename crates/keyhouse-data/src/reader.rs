//! Concurrent Sharded Record Reader
//!
//! Reads a delta file's record frames in parallel with an exactly-once
//! guarantee: every record in the file reaches the callback once, no
//! matter how the byte ranges land relative to frame boundaries.
//!
//! ## Why Shard the Read?
//!
//! Delta files run to gigabytes and a node must replay them before it can
//! serve. A single sequential reader leaves most of the disk (or object
//! store connection) idle; cutting the file into byte ranges and giving
//! each range its own stream keeps every worker busy.
//!
//! ## How It Works
//!
//! ```text
//! probe stream size S
//!         ↓
//! shard_size = min(S, max(ceil(S / workers), min_shard_bytes))
//!         ↓
//! [0, s] [s+1, 2s+1] ... [.., S]     one blocking task per range
//!         ↓
//! each task: open stream → resync at first marker >= range start
//!            → read every record that BEGINS inside the range
//!         ↓
//! join → pairwise coverage check → done (or "Skipped some records")
//! ```
//!
//! A record whose marker begins past the range end belongs to the next
//! shard; the task stops there and reports that position. After the join,
//! each adjacent pair of outcomes must satisfy
//! `prev.next_shard_first_record_pos >= curr.first_record_pos`. A gap
//! between the two means bytes nobody read held records, and the whole
//! read fails rather than silently dropping data.
//!
//! ## Error Policy
//!
//! - **Callback failures** are soft: logged, counted, and the read goes on
//!   (one bad record must not sink a multi-gigabyte load).
//! - **Shard failures** (I/O errors, corruption the recovery callback
//!   refuses) abort the read.
//!
//! ## Usage
//!
//! ```ignore
//! let reader = ConcurrentRecordReader::new(stream_factory, ReadOptions::default());
//! reader
//!     .read_records(Arc::new(|payload| {
//!         apply(payload)?;
//!         Ok(())
//!     }))
//!     .await?;
//! ```

use std::io::{Read, Seek};
use std::sync::Arc;

use bytes::Bytes;
use keyhouse_core::{KvError, Result};
use tracing::{debug, error, warn};

use crate::framing::{log_and_continue, FrameReader, SkippedRegion};

/// A seekable byte stream over the record file. Factories hand out multiple
/// independent streams over the same underlying bytes.
pub trait RecordStream: Read + Seek + Send {}

impl<T: Read + Seek + Send> RecordStream for T {}

/// Produces independent streams positioned at the file start.
pub type StreamFactory = Arc<dyn Fn() -> Result<Box<dyn RecordStream>> + Send + Sync>;

/// Options for a concurrent read.
#[derive(Clone)]
pub struct ReadOptions {
    /// Worker tasks (and byte-range shards) to aim for.
    pub num_workers: usize,
    /// Lower bound on shard size; small files collapse to fewer shards.
    pub min_shard_bytes: u64,
    /// Invoked for corrupted regions; `true` resumes past the region.
    pub recovery: Arc<dyn Fn(SkippedRegion) -> bool + Send + Sync>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            num_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            min_shard_bytes: 8 * 1024 * 1024,
            recovery: Arc::new(log_and_continue),
        }
    }
}

/// Byte range handled by one shard task. `end_pos` is inclusive: a record
/// whose marker begins at `end_pos` still belongs to this shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ShardRange {
    start_pos: u64,
    end_pos: u64,
}

/// Stats returned by one shard task, used for the coverage check.
#[derive(Debug, Clone, Copy)]
struct ShardOutcome {
    first_record_pos: u64,
    next_shard_first_record_pos: u64,
    num_records_read: u64,
}

/// Reads record frames concurrently across byte-range shards.
pub struct ConcurrentRecordReader {
    stream_factory: StreamFactory,
    options: ReadOptions,
}

impl ConcurrentRecordReader {
    pub fn new(stream_factory: StreamFactory, options: ReadOptions) -> Self {
        Self {
            stream_factory,
            options,
        }
    }

    /// Invoke `callback` exactly once per record frame payload in the file.
    pub async fn read_records(
        &self,
        callback: Arc<dyn Fn(Bytes) -> Result<()> + Send + Sync>,
    ) -> Result<()> {
        let shards = self.build_shards()?;
        if shards.is_empty() {
            return Ok(());
        }
        let mut tasks = Vec::with_capacity(shards.len());
        for shard in &shards {
            let shard = *shard;
            let factory = self.stream_factory.clone();
            let recovery = self.options.recovery.clone();
            let callback = callback.clone();
            tasks.push(tokio::task::spawn_blocking(move || {
                read_shard_records(&factory, shard, &recovery, &callback)
            }));
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        for task in tasks {
            let outcome = task
                .await
                .map_err(|e| KvError::internal(format!("Shard reader task panicked: {e}")))??;
            outcomes.push(outcome);
        }

        let mut total_records_read = outcomes[0].num_records_read;
        for pair in outcomes.windows(2) {
            let (prev, curr) = (pair[0], pair[1]);
            if prev.next_shard_first_record_pos < curr.first_record_pos {
                return Err(KvError::internal(format!(
                    "Skipped some records between byte={} and byte={}.",
                    prev.next_shard_first_record_pos, curr.first_record_pos
                )));
            }
            total_records_read += curr.num_records_read;
        }
        debug!(total_records_read, shards = shards.len(), "Done reading records");
        Ok(())
    }

    /// Total size of the record stream, probed with a fresh stream.
    fn record_stream_size(&self) -> Result<u64> {
        let mut stream = (self.stream_factory)()?;
        stream
            .seek(std::io::SeekFrom::End(0))
            .map_err(|_| KvError::invalid_argument("Input streams do not support seeking."))
    }

    fn build_shards(&self) -> Result<Vec<ShardRange>> {
        let stream_size = self.record_stream_size()?;
        if self.options.num_workers < 1 {
            return Err(KvError::invalid_argument(format!(
                "Num worker tasks {} must be at least 1.",
                self.options.num_workers
            )));
        }
        if stream_size == 0 {
            return Ok(Vec::new());
        }
        let per_worker = stream_size.div_ceil(self.options.num_workers as u64);
        let shard_size = stream_size.min(per_worker.max(self.options.min_shard_bytes));
        let mut shards = Vec::new();
        let mut shard_start_pos = 0u64;
        while shard_start_pos < stream_size {
            let shard_end_pos = (shard_start_pos + shard_size).min(stream_size);
            shards.push(ShardRange {
                start_pos: shard_start_pos,
                end_pos: shard_end_pos,
            });
            shard_start_pos = shard_end_pos + 1;
        }
        if shards.is_empty() || shards.last().unwrap().end_pos != stream_size {
            return Err(KvError::internal("Failed to generate shards."));
        }
        Ok(shards)
    }
}

/// Read every record beginning inside `shard`, reporting boundary stats.
fn read_shard_records(
    factory: &StreamFactory,
    shard: ShardRange,
    recovery: &Arc<dyn Fn(SkippedRegion) -> bool + Send + Sync>,
    callback: &Arc<dyn Fn(Bytes) -> Result<()> + Send + Sync>,
) -> Result<ShardOutcome> {
    debug!(start = shard.start_pos, end = shard.end_pos, "Reading shard");
    let stream = factory()?;
    let mut reader = FrameReader::new(stream)?;
    let first_record_pos = match reader.resync(shard.start_pos)? {
        Some(pos) => pos,
        None => reader.stream_size(),
    };
    let mut next_record_pos = first_record_pos;
    let mut num_records_read = 0u64;
    let mut callback_failures = 0u64;
    while next_record_pos <= shard.end_pos {
        let Some(frame) = reader.read_frame(&**recovery)? else {
            break;
        };
        if frame.start_pos > shard.end_pos {
            // Recovery skipped past the end of our range; the record at
            // this position belongs to the next shard.
            next_record_pos = frame.start_pos;
            break;
        }
        if let Err(e) = callback(frame.payload) {
            callback_failures += 1;
            if callback_failures == 1 {
                error!(error = %e, "Record callback failed to process some records");
            }
        }
        num_records_read += 1;
        next_record_pos = reader.pos();
    }
    if callback_failures > 0 {
        warn!(
            callback_failures,
            start = shard.start_pos,
            end = shard.end_pos,
            "Record callbacks failed in shard"
        );
    }
    Ok(ShardOutcome {
        first_record_pos,
        next_shard_first_record_pos: next_record_pos,
        num_records_read,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{write_frame, METADATA_MARKER, RECORD_MARKER};
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::Mutex;

    fn delta_bytes(records: usize) -> Vec<u8> {
        let mut out = Vec::new();
        write_frame(&mut out, &METADATA_MARKER, b"metadata").unwrap();
        for i in 0..records {
            let payload = format!("record-{i:05}");
            write_frame(&mut out, &RECORD_MARKER, payload.as_bytes()).unwrap();
        }
        out
    }

    fn factory_for(data: Vec<u8>) -> StreamFactory {
        let data = Arc::new(data);
        Arc::new(move || {
            let data = data.clone();
            Ok(Box::new(Cursor::new(data.to_vec())) as Box<dyn RecordStream>)
        })
    }

    fn options(num_workers: usize, min_shard_bytes: u64) -> ReadOptions {
        ReadOptions {
            num_workers,
            min_shard_bytes,
            recovery: Arc::new(log_and_continue),
        }
    }

    async fn collect_records(data: Vec<u8>, opts: ReadOptions) -> Result<HashMap<String, usize>> {
        let reader = ConcurrentRecordReader::new(factory_for(data), opts);
        let seen: Arc<Mutex<HashMap<String, usize>>> = Arc::new(Mutex::new(HashMap::new()));
        let sink = seen.clone();
        reader
            .read_records(Arc::new(move |payload| {
                let record = String::from_utf8(payload.to_vec()).unwrap();
                *sink.lock().unwrap().entry(record).or_insert(0) += 1;
                Ok(())
            }))
            .await?;
        Ok(Arc::try_unwrap(seen).unwrap().into_inner().unwrap())
    }

    #[tokio::test]
    async fn test_exactly_once_single_worker() {
        let seen = collect_records(delta_bytes(25), options(1, 1)).await.unwrap();
        assert_eq!(seen.len(), 25);
        assert!(seen.values().all(|&count| count == 1));
    }

    #[tokio::test]
    async fn test_exactly_once_many_workers_tiny_shards() {
        // Tiny min shard size forces many byte-range shards with the +1
        // boundary arithmetic between them.
        for workers in [2, 3, 7] {
            let seen = collect_records(delta_bytes(40), options(workers, 64))
                .await
                .unwrap();
            assert_eq!(seen.len(), 40, "workers={workers}");
            assert!(seen.values().all(|&count| count == 1), "workers={workers}");
        }
    }

    #[tokio::test]
    async fn test_min_shard_size_collapses_small_file() {
        // An 8 MiB minimum over a small file means one shard regardless of
        // the worker count.
        let seen = collect_records(delta_bytes(10), options(8, 8 * 1024 * 1024))
            .await
            .unwrap();
        assert_eq!(seen.len(), 10);
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let reader = ConcurrentRecordReader::new(factory_for(Vec::new()), options(4, 1));
        let called = Arc::new(Mutex::new(0u32));
        let sink = called.clone();
        reader
            .read_records(Arc::new(move |_| {
                *sink.lock().unwrap() += 1;
                Ok(())
            }))
            .await
            .unwrap();
        assert_eq!(*called.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_callback_failures_do_not_abort() {
        let data = delta_bytes(6);
        let reader = ConcurrentRecordReader::new(factory_for(data), options(2, 64));
        let count = Arc::new(Mutex::new(0usize));
        let sink = count.clone();
        reader
            .read_records(Arc::new(move |payload| {
                *sink.lock().unwrap() += 1;
                if payload.ends_with(b"3") {
                    Err(KvError::invalid_argument("bad record"))
                } else {
                    Ok(())
                }
            }))
            .await
            .unwrap();
        assert_eq!(*count.lock().unwrap(), 6);
    }

    #[tokio::test]
    async fn test_corruption_mid_file_recovers() {
        let mut data = delta_bytes(20);
        // Damage one record payload near the middle of the file.
        let mid = data.len() / 2;
        data[mid] ^= 0xFF;
        let seen = collect_records(data, options(3, 64)).await.unwrap();
        // One record lost to corruption, everything else delivered once.
        assert_eq!(seen.len(), 19);
        assert!(seen.values().all(|&count| count == 1));
    }

    #[tokio::test]
    async fn test_recovery_false_aborts_read() {
        let mut data = delta_bytes(20);
        let mid = data.len() / 2;
        data[mid] ^= 0xFF;
        let mut opts = options(2, 64);
        opts.recovery = Arc::new(|_region| false);
        let reader = ConcurrentRecordReader::new(factory_for(data), opts);
        let err = reader
            .read_records(Arc::new(|_| Ok(())))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), keyhouse_core::ErrorKind::Internal);
    }

    #[tokio::test]
    async fn test_gap_between_shards_detected() {
        // Layout: metadata [0, 24), record A [24, 1000), record B
        // [1000, 1100), record C [1100, 1166). Smashing record B's marker
        // makes it unreadable: shard 0 (range [0, 583]) stops after A with
        // next_shard_first_record_pos = 1000, while shard 1 (range
        // [584, 1166]) first resynchronizes at C = 1100. The uncovered
        // bytes must fail the read.
        let mut data = Vec::new();
        write_frame(&mut data, &METADATA_MARKER, b"metadata").unwrap();
        write_frame(&mut data, &RECORD_MARKER, &vec![b'a'; 960]).unwrap();
        write_frame(&mut data, &RECORD_MARKER, &vec![b'b'; 84]).unwrap();
        write_frame(&mut data, &RECORD_MARKER, &vec![b'c'; 50]).unwrap();
        assert_eq!(data.len(), 1166);
        for byte in &mut data[1000..1008] {
            *byte = 0;
        }

        let reader = ConcurrentRecordReader::new(factory_for(data), options(2, 1));
        let err = reader.read_records(Arc::new(|_| Ok(()))).await.unwrap_err();
        assert_eq!(err.kind(), keyhouse_core::ErrorKind::Internal);
        assert_eq!(
            err.message,
            "Skipped some records between byte=1000 and byte=1100."
        );
    }

    #[tokio::test]
    async fn test_zero_workers_rejected() {
        let reader = ConcurrentRecordReader::new(factory_for(delta_bytes(1)), options(0, 1));
        let err = reader.read_records(Arc::new(|_| Ok(()))).await.unwrap_err();
        assert_eq!(err.kind(), keyhouse_core::ErrorKind::InvalidArgument);
    }
}
