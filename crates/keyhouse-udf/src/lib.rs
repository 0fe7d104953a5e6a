//! KeyHouse UDF Host
//!
//! Executes the user-defined function that turns a request partition into
//! its output. The moving parts:
//!
//! - [`config::UdfConfig`]: explicit timeouts and worker count, passed at
//!   construction.
//! - [`engine::SandboxEngine`]: the sandbox seam. Engines are synchronous
//!   and run on a dedicated worker-thread pool; replies travel back over
//!   single-shot channels so the async client can await them with a
//!   deadline.
//! - [`client::UdfClient`]: the public interface. Installs code objects
//!   under the logical-commit-time gate and dispatches invocations with
//!   JSON-serialized arguments.
//! - [`hooks`]: the host callbacks a UDF can make mid-execution
//!   (`getValues`, `getValuesBinary`, `runQuery`, `logMessage`), bridged
//!   synchronously into the async lookup stack.
//! - [`wasm::WasmEngine`]: the WebAssembly engine implementation.

pub mod client;
pub mod config;
pub mod engine;
pub mod hooks;
pub mod wasm;

pub use client::UdfClient;
pub use config::UdfConfig;
pub use engine::{CodeObject, Invocation, SandboxEngine};
pub use hooks::{GetValuesHook, OutputFormat, RunQueryHook, UdfHooks};
