//! UDF Client
//!
//! The request handler's view of the sandbox: install code, run code.
//!
//! ## Installing Code
//!
//! `set_code_object` installs a new code object iff its logical commit
//! time is strictly newer than the installed one. Stale objects are a
//! silent no-op, not an error; code updates arrive in delta files and
//! replay out of order just like data mutations. Loads that do not finish
//! within the configured load timeout fail with
//! `Timed out setting UDF code object.` and leave the previous handler in
//! place.
//!
//! ## Running Code
//!
//! ```text
//! execute_code(metadata, arguments)
//!         ↓ serialize to JSON (metadata first, then each argument)
//! Invoke command + oneshot reply ──→ sandbox worker thread
//!         ↓                                  ↓
//! await reply with udf_timeout        handler runs, may call hooks
//!         ↓
//! output string, or "Timed out waiting for UDF result."
//! ```
//!
//! The metadata argument always carries `udfInterfaceVersion: 1`. An
//! argument with no tags serializes as bare `data`; a tagged argument
//! serializes whole. A timed-out invocation is abandoned: the worker
//! finishes in the background and the result is discarded.
//!
//! ## Example
//!
//! ```ignore
//! let client = UdfClient::new(engine, UdfConfig::default());
//! client.set_code_object(code_object).await?;
//! let output = client.execute_code(&request.metadata, &partition.arguments).await?;
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use keyhouse_core::request::Argument;
use keyhouse_core::{KvError, Result};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::debug;

use crate::config::UdfConfig;
use crate::engine::{CodeObject, Command, Invocation, SandboxDispatcher, SandboxEngine};

/// Interface version injected into every invocation's metadata.
const UDF_INTERFACE_VERSION: u64 = 1;

#[derive(Default)]
struct InstalledCode {
    handler_name: String,
    version: u64,
    logical_commit_time: i64,
}

/// Client for the sandboxed UDF runtime.
pub struct UdfClient {
    config: UdfConfig,
    dispatcher: SandboxDispatcher,
    installed: RwLock<InstalledCode>,
}

impl UdfClient {
    pub fn new(engine: Arc<dyn SandboxEngine>, config: UdfConfig) -> Self {
        let dispatcher = SandboxDispatcher::start(engine, config.worker_threads);
        Self {
            config,
            dispatcher,
            installed: RwLock::new(InstalledCode {
                handler_name: String::new(),
                version: 0,
                logical_commit_time: -1,
            }),
        }
    }

    /// Install `code` unless it is stale under the max-LCT rule.
    pub async fn set_code_object(&self, code: CodeObject) -> Result<()> {
        {
            let installed = self.installed.read().unwrap();
            if installed.logical_commit_time >= code.logical_commit_time {
                debug!(
                    logical_commit_time = code.logical_commit_time,
                    installed = installed.logical_commit_time,
                    "Not updating code object, logical commit time too small"
                );
                return Ok(());
            }
        }
        let (reply, rx) = oneshot::channel();
        self.dispatcher.send(Command::Load {
            code: code.clone(),
            reply,
        })?;
        let load_result = timeout(self.config.load_timeout, rx)
            .await
            .map_err(|_| KvError::internal("Timed out setting UDF code object."))?
            .map_err(|_| KvError::internal("Sandbox worker dropped the load reply"))?;
        load_result?;

        let mut installed = self.installed.write().unwrap();
        if installed.logical_commit_time < code.logical_commit_time {
            installed.handler_name = code.handler_name;
            installed.version = code.version;
            installed.logical_commit_time = code.logical_commit_time;
        }
        Ok(())
    }

    /// Logical commit time of the installed code object, if any.
    pub fn code_logical_commit_time(&self) -> Option<i64> {
        let installed = self.installed.read().unwrap();
        (installed.logical_commit_time >= 0).then_some(installed.logical_commit_time)
    }

    /// Execute the installed handler for one partition.
    pub async fn execute_code(
        &self,
        metadata: &BTreeMap<String, String>,
        arguments: &[Argument],
    ) -> Result<String> {
        let (handler_name, version) = {
            let installed = self.installed.read().unwrap();
            if installed.handler_name.is_empty() {
                return Err(KvError::internal("No UDF code object is installed"));
            }
            (installed.handler_name.clone(), installed.version)
        };

        let mut args = Vec::with_capacity(arguments.len() + 1);
        args.push(
            serde_json::json!({
                "udfInterfaceVersion": UDF_INTERFACE_VERSION,
                "requestMetadata": metadata,
            })
            .to_string(),
        );
        for argument in arguments {
            args.push(argument.to_udf_json().to_string());
        }

        let (reply, rx) = oneshot::channel();
        self.dispatcher.send(Command::Invoke {
            invocation: Invocation {
                handler_name,
                version,
                args,
            },
            reply,
        })?;
        let output = timeout(self.config.udf_timeout, rx)
            .await
            .map_err(|_| KvError::internal("Timed out waiting for UDF result."))?
            .map_err(|_| KvError::internal("Sandbox worker dropped the invoke reply"))?;
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Engine that records what it was asked to do.
    struct RecordingEngine {
        loaded: Mutex<Vec<CodeObject>>,
        invocations: Mutex<Vec<Invocation>>,
        load_delay: Duration,
        invoke_delay: Duration,
    }

    impl RecordingEngine {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                loaded: Mutex::new(Vec::new()),
                invocations: Mutex::new(Vec::new()),
                load_delay: Duration::ZERO,
                invoke_delay: Duration::ZERO,
            })
        }
    }

    impl SandboxEngine for RecordingEngine {
        fn load(&self, code: &CodeObject) -> Result<()> {
            std::thread::sleep(self.load_delay);
            self.loaded.lock().unwrap().push(code.clone());
            Ok(())
        }

        fn invoke(&self, invocation: &Invocation) -> Result<String> {
            std::thread::sleep(self.invoke_delay);
            self.invocations.lock().unwrap().push(invocation.clone());
            Ok(format!("output of {}", invocation.handler_name))
        }
    }

    fn code(js: &str, handler: &str, lct: i64) -> CodeObject {
        CodeObject {
            js: js.to_string(),
            wasm: Vec::new(),
            handler_name: handler.to_string(),
            version: 1,
            logical_commit_time: lct,
        }
    }

    fn config_with_timeouts(udf_ms: u64, load_ms: u64) -> UdfConfig {
        UdfConfig {
            udf_timeout: Duration::from_millis(udf_ms),
            load_timeout: Duration::from_millis(load_ms),
            worker_threads: 2,
        }
    }

    #[tokio::test]
    async fn test_execute_uses_installed_handler() {
        let engine = RecordingEngine::new();
        let client = UdfClient::new(engine.clone(), UdfConfig::default());
        client.set_code_object(code("A", "HandlerA", 5)).await.unwrap();
        let output = client
            .execute_code(&BTreeMap::new(), &[])
            .await
            .unwrap();
        assert_eq!(output, "output of HandlerA");
    }

    #[tokio::test]
    async fn test_lct_gate_keeps_newer_code() {
        let engine = RecordingEngine::new();
        let client = UdfClient::new(engine.clone(), UdfConfig::default());
        client.set_code_object(code("A", "HandlerA", 5)).await.unwrap();
        // Equal and lower commit times are silent no-ops.
        client.set_code_object(code("B", "HandlerB", 3)).await.unwrap();
        client.set_code_object(code("C", "HandlerC", 5)).await.unwrap();

        let output = client.execute_code(&BTreeMap::new(), &[]).await.unwrap();
        assert_eq!(output, "output of HandlerA");
        assert_eq!(engine.loaded.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_newer_code_replaces() {
        let engine = RecordingEngine::new();
        let client = UdfClient::new(engine.clone(), UdfConfig::default());
        client.set_code_object(code("A", "HandlerA", 5)).await.unwrap();
        client.set_code_object(code("B", "HandlerB", 6)).await.unwrap();
        let output = client.execute_code(&BTreeMap::new(), &[]).await.unwrap();
        assert_eq!(output, "output of HandlerB");
        assert_eq!(client.code_logical_commit_time(), Some(6));
    }

    #[tokio::test]
    async fn test_execute_without_code_fails() {
        let engine = RecordingEngine::new();
        let client = UdfClient::new(engine, UdfConfig::default());
        let err = client.execute_code(&BTreeMap::new(), &[]).await.unwrap_err();
        assert_eq!(err.kind(), keyhouse_core::ErrorKind::Internal);
    }

    #[tokio::test]
    async fn test_metadata_and_argument_serialization() {
        let engine = RecordingEngine::new();
        let client = UdfClient::new(engine.clone(), UdfConfig::default());
        client.set_code_object(code("A", "Handler", 1)).await.unwrap();

        let metadata = BTreeMap::from([("hostname".to_string(), "example.com".to_string())]);
        let arguments = vec![
            Argument {
                tags: vec!["custom".to_string(), "keys".to_string()],
                data: serde_json::json!(["hi"]),
            },
            Argument {
                tags: vec![],
                data: serde_json::json!("bare"),
            },
        ];
        client.execute_code(&metadata, &arguments).await.unwrap();

        let invocations = engine.invocations.lock().unwrap();
        let args = &invocations[0].args;
        assert_eq!(args.len(), 3);
        let parsed_metadata: serde_json::Value = serde_json::from_str(&args[0]).unwrap();
        assert_eq!(parsed_metadata["udfInterfaceVersion"], 1);
        assert_eq!(parsed_metadata["requestMetadata"]["hostname"], "example.com");
        // Tagged argument serializes whole, untagged serializes bare data.
        let tagged: serde_json::Value = serde_json::from_str(&args[1]).unwrap();
        assert_eq!(tagged["tags"][0], "custom");
        assert_eq!(args[2], "\"bare\"");
    }

    #[tokio::test]
    async fn test_invoke_timeout() {
        let mut engine = RecordingEngine::new();
        Arc::get_mut(&mut engine).unwrap().invoke_delay = Duration::from_millis(500);
        let client = UdfClient::new(engine, config_with_timeouts(50, 1000));
        client.set_code_object(code("A", "Handler", 1)).await.unwrap();
        let err = client.execute_code(&BTreeMap::new(), &[]).await.unwrap_err();
        assert_eq!(err.message, "Timed out waiting for UDF result.");
    }

    #[tokio::test]
    async fn test_load_timeout() {
        let mut engine = RecordingEngine::new();
        Arc::get_mut(&mut engine).unwrap().load_delay = Duration::from_millis(500);
        let client = UdfClient::new(engine, config_with_timeouts(1000, 50));
        let err = client.set_code_object(code("A", "Handler", 1)).await.unwrap_err();
        assert_eq!(err.message, "Timed out setting UDF code object.");
        // The failed load did not install anything.
        assert_eq!(client.code_logical_commit_time(), None);
    }
}
