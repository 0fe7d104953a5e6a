//! Host Callbacks
//!
//! Functions the sandbox exposes to UDF code. All of them are synchronous
//! from the UDF's point of view: the sandbox worker thread blocks on the
//! async lookup through a runtime handle and hands the result straight
//! back.
//!
//! `getValues` has two output encodings, chosen when the hook is built:
//!
//! - **Json**: a JSON object, `{"kvPairs": {...}, "status": {...}}` on
//!   success and a bare `{"code": ..., "message": ...}` on failure (UDFs
//!   distinguish the two by which field is present).
//! - **Binary**: a serialized `BinaryGetValuesResponse`.
//!
//! Bad input (anything but a list of strings) produces an inline
//! `InvalidArgument` status in the chosen encoding, never an error; a
//! misbehaving UDF should see a structured result, not a trap.
//!
//! The lookup is injected after construction (`finish_init`): hook objects
//! are created early so the sandbox can link them, but the lookup stack
//! spins up later in server initialization.

use std::sync::{Arc, OnceLock};

use keyhouse_core::ErrorKind;
use keyhouse_proto::internal::single_lookup_result::SingleLookupResult;
use keyhouse_proto::internal::InternalLookupResponse;
use keyhouse_proto::udf::{BinaryGetValuesResponse, BinaryValue};
use keyhouse_proto::internal::Status as LookupStatus;
use keyhouse_store::Lookup;
use prost::Message;
use tokio::runtime::Handle;
use tracing::{error, info, warn};

/// Output encoding for `getValues`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Binary,
}

struct LookupBinding {
    lookup: Arc<dyn Lookup>,
    runtime: Handle,
}

/// The `getValues` / `getValuesBinary` callback.
pub struct GetValuesHook {
    format: OutputFormat,
    binding: OnceLock<LookupBinding>,
}

impl GetValuesHook {
    pub fn new(format: OutputFormat) -> Arc<Self> {
        Arc::new(Self {
            format,
            binding: OnceLock::new(),
        })
    }

    /// Wire the lookup in. Later calls are ignored; the first wins.
    pub fn finish_init(&self, lookup: Arc<dyn Lookup>, runtime: Handle) {
        let _ = self.binding.set(LookupBinding { lookup, runtime });
    }

    /// Run the callback. `input` is the raw value the UDF passed.
    pub fn call(&self, input: &serde_json::Value) -> Vec<u8> {
        let Some(binding) = self.binding.get() else {
            error!("getValues hook is not initialized properly: lookup is missing");
            return self.status_output(ErrorKind::Internal, "getValues has not been initialized yet");
        };
        let Some(keys) = parse_string_list(input) else {
            return self.status_output(
                ErrorKind::InvalidArgument,
                "getValues input must be list of strings",
            );
        };
        let result = binding
            .runtime
            .block_on(binding.lookup.get_key_values(&keys));
        match result {
            Ok(response) => self.lookup_output(response),
            Err(e) => self.status_output(e.kind(), &e.message),
        }
    }

    fn status_output(&self, kind: ErrorKind, message: &str) -> Vec<u8> {
        match self.format {
            OutputFormat::Json => serde_json::json!({
                "code": kind.code(),
                "message": message,
            })
            .to_string()
            .into_bytes(),
            OutputFormat::Binary => BinaryGetValuesResponse {
                kv_pairs: Default::default(),
                status: Some(LookupStatus {
                    code: kind.code(),
                    message: message.to_string(),
                }),
            }
            .encode_to_vec(),
        }
    }

    fn lookup_output(&self, response: InternalLookupResponse) -> Vec<u8> {
        match self.format {
            OutputFormat::Json => {
                let mut kv_pairs = serde_json::Map::new();
                for (key, result) in response.kv_pairs {
                    let entry = match result.single_lookup_result {
                        Some(SingleLookupResult::Value(value)) => {
                            serde_json::json!({ "value": value })
                        }
                        Some(SingleLookupResult::Status(status)) => serde_json::json!({
                            "status": { "code": status.code, "message": status.message }
                        }),
                        Some(SingleLookupResult::KeysetValues(keyset)) => {
                            serde_json::json!({ "keysetValues": { "values": keyset.values } })
                        }
                        None => continue,
                    };
                    kv_pairs.insert(key, entry);
                }
                serde_json::json!({
                    "kvPairs": kv_pairs,
                    "status": { "code": 0, "message": "ok" },
                })
                .to_string()
                .into_bytes()
            }
            OutputFormat::Binary => {
                let mut binary = BinaryGetValuesResponse {
                    kv_pairs: Default::default(),
                    status: Some(LookupStatus {
                        code: 0,
                        message: "ok".to_string(),
                    }),
                };
                for (key, result) in response.kv_pairs {
                    let value = match result.single_lookup_result {
                        Some(SingleLookupResult::Value(value)) => BinaryValue {
                            data: value.into_bytes(),
                            status: None,
                        },
                        Some(SingleLookupResult::Status(status)) => BinaryValue {
                            data: Vec::new(),
                            status: Some(status),
                        },
                        _ => continue,
                    };
                    binary.kv_pairs.insert(key, value);
                }
                binary.encode_to_vec()
            }
        }
    }
}

/// The `runQuery` callback.
pub struct RunQueryHook {
    binding: OnceLock<LookupBinding>,
}

impl RunQueryHook {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            binding: OnceLock::new(),
        })
    }

    pub fn finish_init(&self, lookup: Arc<dyn Lookup>, runtime: Handle) {
        let _ = self.binding.set(LookupBinding { lookup, runtime });
    }

    /// Evaluate `query`; failures come back as an empty list.
    pub fn call(&self, input: &serde_json::Value) -> Vec<String> {
        let Some(binding) = self.binding.get() else {
            error!("runQuery hook is not initialized properly: lookup is missing");
            return Vec::new();
        };
        let Some(query) = input.as_str() else {
            warn!("runQuery input must be a string");
            return Vec::new();
        };
        match binding.runtime.block_on(binding.lookup.run_query(query)) {
            Ok(elements) => elements,
            Err(e) => {
                warn!(error = %e, "runQuery failed");
                Vec::new()
            }
        }
    }
}

impl Default for RunQueryHook {
    fn default() -> Self {
        Self {
            binding: OnceLock::new(),
        }
    }
}

/// The `logMessage` callback.
pub fn log_message(message: &str) {
    info!(target: "udf", "{message}");
}

/// The full callback set handed to an engine.
#[derive(Clone)]
pub struct UdfHooks {
    pub get_values: Arc<GetValuesHook>,
    pub get_values_binary: Arc<GetValuesHook>,
    pub run_query: Arc<RunQueryHook>,
}

impl UdfHooks {
    pub fn new() -> Self {
        Self {
            get_values: GetValuesHook::new(OutputFormat::Json),
            get_values_binary: GetValuesHook::new(OutputFormat::Binary),
            run_query: RunQueryHook::new(),
        }
    }

    /// Wire every hook to the lookup stack.
    pub fn finish_init(&self, lookup: Arc<dyn Lookup>, runtime: Handle) {
        self.get_values.finish_init(lookup.clone(), runtime.clone());
        self.get_values_binary
            .finish_init(lookup.clone(), runtime.clone());
        self.run_query.finish_init(lookup, runtime);
    }
}

impl Default for UdfHooks {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_string_list(input: &serde_json::Value) -> Option<Vec<String>> {
    let items = input.as_array()?;
    let mut keys = Vec::with_capacity(items.len());
    for item in items {
        keys.push(item.as_str()?.to_string());
    }
    Some(keys)
}
