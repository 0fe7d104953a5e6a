//! Typed Delta File Access
//!
//! [`framing`](crate::framing) moves opaque payloads; this module gives
//! them types.
//!
//! ## File Shape
//!
//! ```text
//! | metadata frame | record frame | record frame | ...
//!   DeltaFileMetadata   DeltaRecord (one of):
//!                         - KeyValueMutationRecord (update / delete)
//!                         - UserDefinedFunctionsConfig (code update)
//!                         - ShardMappingRecord
//! ```
//!
//! `DeltaWriter` produces files (tooling and tests); `DeltaReader` wraps
//! the concurrent reader with record decoding and metadata access. File
//! metadata is readable on its own, before (or without) streaming the
//! records, which is how a loader decides whether a file is for its
//! shard at all.
//!
//! ## Usage
//!
//! ```ignore
//! let reader = DeltaReader::new(stream_factory, ReadOptions::default());
//! let metadata = reader.get_metadata()?;
//! reader
//!     .read_records(Arc::new(|record| apply(record)))
//!     .await?;
//! ```

use std::io::Write;
use std::sync::Arc;

use keyhouse_core::{KvError, Result};
use keyhouse_proto::data::{DeltaFileMetadata, DeltaRecord};
use prost::Message;

use crate::framing::{
    read_metadata_frame, write_frame, METADATA_MARKER, RECORD_MARKER,
};
use crate::reader::{ConcurrentRecordReader, ReadOptions, StreamFactory};

/// Writes a delta file: metadata frame first, then record frames.
pub struct DeltaWriter<W: Write> {
    out: W,
}

impl<W: Write> DeltaWriter<W> {
    pub fn new(mut out: W, metadata: &DeltaFileMetadata) -> Result<Self> {
        write_frame(&mut out, &METADATA_MARKER, &metadata.encode_to_vec())?;
        Ok(Self { out })
    }

    pub fn write_record(&mut self, record: &DeltaRecord) -> Result<()> {
        write_frame(&mut self.out, &RECORD_MARKER, &record.encode_to_vec())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Reads a delta file through the concurrent sharded reader.
pub struct DeltaReader {
    stream_factory: StreamFactory,
    options: ReadOptions,
}

impl DeltaReader {
    pub fn new(stream_factory: StreamFactory, options: ReadOptions) -> Self {
        Self {
            stream_factory,
            options,
        }
    }

    /// File-level metadata. May be called before (or without) streaming the
    /// records.
    pub fn get_metadata(&self) -> Result<DeltaFileMetadata> {
        let mut stream = (self.stream_factory)()?;
        let payload = read_metadata_frame(&mut stream)?;
        DeltaFileMetadata::decode(payload)
            .map_err(|e| KvError::internal(format!("Malformed delta file metadata: {e}")))
    }

    /// Invoke `callback` exactly once per record. Undecodable payloads are
    /// per-record soft errors (logged by the reader, read continues).
    pub async fn read_records(
        &self,
        callback: Arc<dyn Fn(DeltaRecord) -> Result<()> + Send + Sync>,
    ) -> Result<()> {
        let reader = ConcurrentRecordReader::new(self.stream_factory.clone(), self.options.clone());
        reader
            .read_records(Arc::new(move |payload| {
                let record = DeltaRecord::decode(payload)
                    .map_err(|e| KvError::invalid_argument(format!("Malformed record: {e}")))?;
                callback(record)
            }))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::RecordStream;
    use keyhouse_proto::data::{
        delta_record::Record, key_value_mutation_record::Value, KeyValueMutationRecord,
        MutationType, StringSet, UserDefinedFunctionsConfig,
    };
    use std::collections::HashSet;
    use std::io::Cursor;
    use std::sync::Mutex;

    fn mutation(key: &str, value: &str, lct: i64) -> DeltaRecord {
        DeltaRecord {
            record: Some(Record::KeyValueMutation(KeyValueMutationRecord {
                mutation_type: MutationType::Update as i32,
                key: key.to_string(),
                logical_commit_time: lct,
                value: Some(Value::StringValue(value.to_string())),
            })),
        }
    }

    fn write_test_file(records: &[DeltaRecord]) -> Vec<u8> {
        let metadata = DeltaFileMetadata {
            key_namespace: "keys".to_string(),
            shard_num: -1,
            num_shards: 1,
        };
        let mut writer = DeltaWriter::new(Vec::new(), &metadata).unwrap();
        for record in records {
            writer.write_record(record).unwrap();
        }
        writer.into_inner()
    }

    fn factory_for(data: Vec<u8>) -> StreamFactory {
        let data = Arc::new(data);
        Arc::new(move || {
            let data = data.clone();
            Ok(Box::new(Cursor::new(data.to_vec())) as Box<dyn RecordStream>)
        })
    }

    #[test]
    fn test_metadata_roundtrip() {
        let data = write_test_file(&[mutation("key1", "v1", 1)]);
        let reader = DeltaReader::new(factory_for(data), ReadOptions::default());
        let metadata = reader.get_metadata().unwrap();
        assert_eq!(metadata.key_namespace, "keys");
        assert_eq!(metadata.shard_num, -1);
    }

    #[tokio::test]
    async fn test_records_roundtrip() {
        let records: Vec<DeltaRecord> =
            (0..30).map(|i| mutation(&format!("key{i}"), &format!("value{i}"), i)).collect();
        let data = write_test_file(&records);
        let mut opts = ReadOptions::default();
        opts.num_workers = 4;
        opts.min_shard_bytes = 64;
        let reader = DeltaReader::new(factory_for(data), opts);

        let seen: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
        let sink = seen.clone();
        reader
            .read_records(Arc::new(move |record| {
                let Some(Record::KeyValueMutation(m)) = record.record else {
                    panic!("unexpected record type");
                };
                assert!(sink.lock().unwrap().insert(m.key), "duplicate record");
                Ok(())
            }))
            .await
            .unwrap();
        assert_eq!(seen.lock().unwrap().len(), 30);
    }

    #[tokio::test]
    async fn test_mixed_record_types() {
        let records = vec![
            mutation("key1", "v1", 1),
            DeltaRecord {
                record: Some(Record::UdfConfig(UserDefinedFunctionsConfig {
                    js: "function HandleRequest() {}".to_string(),
                    wasm: Vec::new(),
                    handler_name: "HandleRequest".to_string(),
                    version: 1,
                    logical_commit_time: 10,
                })),
            },
            DeltaRecord {
                record: Some(Record::KeyValueMutation(KeyValueMutationRecord {
                    mutation_type: MutationType::Update as i32,
                    key: "set1".to_string(),
                    logical_commit_time: 2,
                    value: Some(Value::SetValue(StringSet {
                        values: vec!["a".to_string(), "b".to_string()],
                    })),
                })),
            },
        ];
        let data = write_test_file(&records);
        let reader = DeltaReader::new(factory_for(data), ReadOptions::default());
        let counts = Arc::new(Mutex::new((0u32, 0u32)));
        let sink = counts.clone();
        reader
            .read_records(Arc::new(move |record| {
                let mut counts = sink.lock().unwrap();
                match record.record {
                    Some(Record::KeyValueMutation(_)) => counts.0 += 1,
                    Some(Record::UdfConfig(_)) => counts.1 += 1,
                    other => panic!("unexpected record: {other:?}"),
                }
                Ok(())
            }))
            .await
            .unwrap();
        assert_eq!(*counts.lock().unwrap(), (2, 1));
    }
}
