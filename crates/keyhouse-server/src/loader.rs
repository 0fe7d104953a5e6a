//! Delta File Loading
//!
//! Connects the concurrent reader to the serving state: key/value
//! mutations land in the cache under max-LCT rules, UDF config records go
//! through the UDF client's commit-time gate, and shard mapping records
//! are logged (logical-to-physical remapping is applied by the data
//! producer; the server only observes it).
//!
//! Tombstone cleanup is explicit: after a batch of files is applied,
//! `cleanup(lct)` drops tombstones at or below the watermark the operator
//! considers fully replayed.

use std::path::Path;
use std::sync::Arc;

use keyhouse_core::{KvError, Result};
use keyhouse_data::reader::{ReadOptions, RecordStream, StreamFactory};
use keyhouse_data::DeltaReader;
use keyhouse_proto::data::{delta_record::Record, key_value_mutation_record::Value, MutationType};
use keyhouse_store::KeyValueCache;
use keyhouse_udf::{CodeObject, UdfClient};
use tokio::sync::mpsc;
use tracing::{info, warn};

pub struct DataLoader {
    cache: Arc<KeyValueCache>,
    udf_client: Arc<UdfClient>,
    options: ReadOptions,
}

impl DataLoader {
    pub fn new(cache: Arc<KeyValueCache>, udf_client: Arc<UdfClient>, options: ReadOptions) -> Self {
        Self {
            cache,
            udf_client,
            options,
        }
    }

    /// Load every `.delta` file in `dir`, in name order (delta file names
    /// sort by generation).
    pub async fn load_directory(&self, dir: &Path) -> Result<u64> {
        let mut paths: Vec<_> = std::fs::read_dir(dir)
            .map_err(|e| KvError::internal(format!("Failed to list {}: {e}", dir.display())))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "delta"))
            .collect();
        paths.sort();
        let mut total = 0;
        for path in paths {
            total += self.load_file(&path).await?;
        }
        Ok(total)
    }

    /// Apply one delta file; returns the number of records applied.
    pub async fn load_file(&self, path: &Path) -> Result<u64> {
        let file_path = path.to_path_buf();
        let factory: StreamFactory = Arc::new(move || {
            let file = std::fs::File::open(&file_path)
                .map_err(|e| KvError::internal(format!("Failed to open delta file: {e}")))?;
            Ok(Box::new(std::io::BufReader::new(file)) as Box<dyn RecordStream>)
        });
        let reader = DeltaReader::new(factory, self.options.clone());
        let metadata = reader.get_metadata()?;
        info!(
            path = %path.display(),
            key_namespace = %metadata.key_namespace,
            "Loading delta file"
        );

        // Record callbacks run on blocking shard tasks; UDF code updates
        // need the async client, so they are funneled back here.
        let (udf_tx, mut udf_rx) = mpsc::unbounded_channel::<CodeObject>();
        let cache = self.cache.clone();
        let applied = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let applied_in_callback = applied.clone();
        let read = reader.read_records(Arc::new(move |record| {
            applied_in_callback.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            match record.record {
                Some(Record::KeyValueMutation(mutation)) => {
                    apply_mutation(&cache, mutation)?;
                }
                Some(Record::UdfConfig(config)) => {
                    let _ = udf_tx.send(CodeObject {
                        js: config.js,
                        wasm: config.wasm,
                        handler_name: config.handler_name,
                        version: config.version as u64,
                        logical_commit_time: config.logical_commit_time,
                    });
                }
                Some(Record::ShardMapping(mapping)) => {
                    info!(
                        logical_shard = mapping.logical_shard,
                        physical_shard = mapping.physical_shard,
                        "Observed shard mapping record"
                    );
                }
                None => {
                    return Err(KvError::invalid_argument("Empty delta record"));
                }
            }
            Ok(())
        }));
        read.await?;

        udf_rx.close();
        while let Some(code) = udf_rx.recv().await {
            if let Err(e) = self.udf_client.set_code_object(code).await {
                warn!(error = %e, "Failed to install UDF code object from delta file");
            }
        }
        Ok(applied.load(std::sync::atomic::Ordering::Relaxed))
    }

    /// Drop tombstones with LCT at or below `logical_commit_time`.
    pub fn cleanup(&self, logical_commit_time: i64) {
        self.cache.remove_deleted_keys(logical_commit_time);
    }
}

fn apply_mutation(
    cache: &KeyValueCache,
    mutation: keyhouse_proto::data::KeyValueMutationRecord,
) -> Result<()> {
    let lct = mutation.logical_commit_time;
    let mutation_type = MutationType::try_from(mutation.mutation_type)
        .map_err(|_| KvError::invalid_argument("Unknown mutation type"))?;
    match (mutation_type, mutation.value) {
        (MutationType::Update, Some(Value::StringValue(value))) => {
            cache.update_key_value(&mutation.key, &value, lct);
        }
        (MutationType::Update, Some(Value::SetValue(set))) => {
            cache.update_key_value_set(&mutation.key, &set.values, lct);
        }
        (MutationType::Delete, Some(Value::SetValue(set))) => {
            cache.delete_values_in_set(&mutation.key, &set.values, lct);
        }
        (MutationType::Delete, _) => {
            cache.delete_key(&mutation.key, lct);
        }
        (MutationType::Update, None) => {
            return Err(KvError::invalid_argument(format!(
                "Update for {} carries no value",
                mutation.key
            )));
        }
    }
    Ok(())
}
