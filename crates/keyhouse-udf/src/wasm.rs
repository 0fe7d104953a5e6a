//! WebAssembly Sandbox Engine
//!
//! Runs the `wasm` half of a code object under wasmtime.
//!
//! ## Isolation Model
//!
//! ```text
//! load:    code.wasm ──compile──→ Module (shared, swapped on update)
//! invoke:  Module ──instantiate──→ fresh Store + Instance per call
//! ```
//!
//! One compiled `Module` is shared across workers; every invocation gets
//! a fresh `Store` and instance, so UDF executions cannot observe each
//! other's memory and a crashed invocation takes nothing down with it.
//! Compilation is the expensive step and happens once per code update,
//! not per request.
//!
//! ## Guest ABI
//!
//! Strings and byte buffers cross the boundary as `(ptr, len)` pairs into
//! the guest's exported linear `memory`; results come back packed into a
//! `u64` (`ptr << 32 | len`). The guest must export:
//!
//! - `memory`: linear memory
//! - `kh_alloc(len: u32) -> u32`: allocate a buffer for host writes
//! - the handler named by the code object: `fn(ptr: u32, len: u32) -> u64`,
//!   receiving a JSON array of the serialized invocation arguments and
//!   returning the UTF-8 output string
//!
//! Host imports live under the `keyhouse` module, all `(ptr, len) -> u64`:
//! `get_values`, `get_values_binary`, `run_query`, and `log_message`
//! (which returns 0).

use std::sync::RwLock;

use keyhouse_core::{KvError, Result};
use tracing::debug;
use wasmtime::{Caller, Engine, Extern, Linker, Module, Store};

use crate::engine::{CodeObject, Invocation, SandboxEngine};
use crate::hooks::{log_message, UdfHooks};

struct HostState {
    hooks: UdfHooks,
}

/// wasmtime-backed [`SandboxEngine`].
pub struct WasmEngine {
    engine: Engine,
    hooks: UdfHooks,
    module: RwLock<Option<Module>>,
}

impl WasmEngine {
    pub fn new(hooks: UdfHooks) -> Self {
        Self {
            engine: Engine::default(),
            hooks,
            module: RwLock::new(None),
        }
    }

    fn linker(&self) -> Result<Linker<HostState>> {
        let mut linker: Linker<HostState> = Linker::new(&self.engine);
        let wire = |e: wasmtime::Error| KvError::internal(format!("Failed to link host import: {e}"));

        linker
            .func_wrap(
                "keyhouse",
                "get_values",
                |mut caller: Caller<'_, HostState>, ptr: u32, len: u32| -> anyhow::Result<u64> {
                    let input = read_guest_json(&mut caller, ptr, len)?;
                    let hook = caller.data().hooks.get_values.clone();
                    let output = hook.call(&input);
                    write_guest_bytes(&mut caller, &output)
                },
            )
            .map_err(wire)?;
        linker
            .func_wrap(
                "keyhouse",
                "get_values_binary",
                |mut caller: Caller<'_, HostState>, ptr: u32, len: u32| -> anyhow::Result<u64> {
                    let input = read_guest_json(&mut caller, ptr, len)?;
                    let hook = caller.data().hooks.get_values_binary.clone();
                    let output = hook.call(&input);
                    write_guest_bytes(&mut caller, &output)
                },
            )
            .map_err(wire)?;
        linker
            .func_wrap(
                "keyhouse",
                "run_query",
                |mut caller: Caller<'_, HostState>, ptr: u32, len: u32| -> anyhow::Result<u64> {
                    let input = read_guest_json(&mut caller, ptr, len)?;
                    let hook = caller.data().hooks.run_query.clone();
                    let elements = hook.call(&input);
                    let output = serde_json::to_vec(&elements)?;
                    write_guest_bytes(&mut caller, &output)
                },
            )
            .map_err(wire)?;
        linker
            .func_wrap(
                "keyhouse",
                "log_message",
                |mut caller: Caller<'_, HostState>, ptr: u32, len: u32| -> anyhow::Result<u64> {
                    let message = read_guest_string(&mut caller, ptr, len)?;
                    log_message(&message);
                    Ok(0)
                },
            )
            .map_err(wire)?;
        Ok(linker)
    }
}

impl SandboxEngine for WasmEngine {
    fn load(&self, code: &CodeObject) -> Result<()> {
        if code.wasm.is_empty() {
            return Err(KvError::invalid_argument(
                "This engine requires a WebAssembly module; JS-only code objects are unsupported",
            ));
        }
        let module = Module::new(&self.engine, &code.wasm)
            .map_err(|e| KvError::invalid_argument(format!("Failed to compile UDF module: {e}")))?;
        debug!(
            handler = %code.handler_name,
            version = code.version,
            "Compiled UDF module"
        );
        *self.module.write().unwrap() = Some(module);
        Ok(())
    }

    fn invoke(&self, invocation: &Invocation) -> Result<String> {
        let module = self
            .module
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| KvError::internal("No UDF code object is installed"))?;

        let mut store = Store::new(
            &self.engine,
            HostState {
                hooks: self.hooks.clone(),
            },
        );
        let linker = self.linker()?;
        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(|e| KvError::internal(format!("Failed to instantiate UDF module: {e}")))?;

        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| KvError::invalid_argument("UDF module does not export memory"))?;
        let alloc = instance
            .get_typed_func::<u32, u32>(&mut store, "kh_alloc")
            .map_err(|_| KvError::invalid_argument("UDF module does not export kh_alloc"))?;
        let handler = instance
            .get_typed_func::<(u32, u32), u64>(&mut store, &invocation.handler_name)
            .map_err(|_| {
                KvError::invalid_argument(format!(
                    "UDF module does not export handler {}",
                    invocation.handler_name
                ))
            })?;

        let input = serde_json::to_vec(&invocation.args)
            .map_err(|e| KvError::internal(format!("Failed to serialize UDF arguments: {e}")))?;
        let input_ptr = alloc
            .call(&mut store, input.len() as u32)
            .map_err(|e| KvError::internal(format!("UDF allocation trapped: {e}")))?;
        memory
            .write(&mut store, input_ptr as usize, &input)
            .map_err(|e| KvError::internal(format!("Failed to write UDF input: {e}")))?;

        let packed = handler
            .call(&mut store, (input_ptr, input.len() as u32))
            .map_err(|e| KvError::internal(format!("UDF execution error: {e}")))?;
        let (out_ptr, out_len) = ((packed >> 32) as usize, (packed & 0xFFFF_FFFF) as usize);
        let mut output = vec![0u8; out_len];
        memory
            .read(&store, out_ptr, &mut output)
            .map_err(|e| KvError::internal(format!("Failed to read UDF output: {e}")))?;
        String::from_utf8(output)
            .map_err(|_| KvError::internal("UDF output is not valid UTF-8"))
    }
}

fn guest_memory(caller: &mut Caller<'_, HostState>) -> anyhow::Result<wasmtime::Memory> {
    match caller.get_export("memory") {
        Some(Extern::Memory(memory)) => Ok(memory),
        _ => anyhow::bail!("UDF module does not export memory"),
    }
}

fn read_guest_string(caller: &mut Caller<'_, HostState>, ptr: u32, len: u32) -> anyhow::Result<String> {
    let memory = guest_memory(caller)?;
    let mut buffer = vec![0u8; len as usize];
    memory.read(&*caller, ptr as usize, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

fn read_guest_json(
    caller: &mut Caller<'_, HostState>,
    ptr: u32,
    len: u32,
) -> anyhow::Result<serde_json::Value> {
    let raw = read_guest_string(caller, ptr, len)?;
    // Hooks answer malformed input with a structured status, so parse
    // failures degrade to null rather than trapping the UDF.
    Ok(serde_json::from_str(&raw).unwrap_or(serde_json::Value::Null))
}

fn write_guest_bytes(caller: &mut Caller<'_, HostState>, bytes: &[u8]) -> anyhow::Result<u64> {
    let alloc = match caller.get_export("kh_alloc") {
        Some(Extern::Func(func)) => func.typed::<u32, u32>(&*caller)?,
        _ => anyhow::bail!("UDF module does not export kh_alloc"),
    };
    let ptr = alloc.call(&mut *caller, bytes.len() as u32)?;
    let memory = guest_memory(caller)?;
    memory.write(&mut *caller, ptr as usize, bytes)?;
    Ok((u64::from(ptr) << 32) | bytes.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SandboxEngine;

    #[test]
    fn test_js_only_code_object_rejected() {
        let engine = WasmEngine::new(UdfHooks::new());
        let err = engine
            .load(&CodeObject {
                js: "function HandleRequest() {}".to_string(),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.kind(), keyhouse_core::ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_malformed_wasm_rejected() {
        let engine = WasmEngine::new(UdfHooks::new());
        let err = engine
            .load(&CodeObject {
                wasm: vec![0xDE, 0xAD, 0xBE, 0xEF],
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.kind(), keyhouse_core::ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_invoke_without_load_fails() {
        let engine = WasmEngine::new(UdfHooks::new());
        let err = engine
            .invoke(&Invocation {
                handler_name: "HandleRequest".to_string(),
                version: 1,
                args: vec![],
            })
            .unwrap_err();
        assert_eq!(err.kind(), keyhouse_core::ErrorKind::Internal);
    }

    // A minimal valid module in WAT form: exports memory, kh_alloc, and a
    // handler that returns its input unchanged (an echo UDF).
    const ECHO_MODULE_WAT: &str = r#"
        (module
          (memory (export "memory") 1)
          (global $next (mut i32) (i32.const 1024))
          (func (export "kh_alloc") (param i32) (result i32)
            (local $ptr i32)
            (local.set $ptr (global.get $next))
            (global.set $next
              (i32.add (global.get $next) (local.get 0)))
            (local.get $ptr))
          (func (export "HandleRequest") (param i32 i32) (result i64)
            (i64.or
              (i64.shl (i64.extend_i32_u (local.get 0)) (i64.const 32))
              (i64.extend_i32_u (local.get 1)))))
    "#;

    #[test]
    fn test_echo_module_roundtrip() {
        let engine = WasmEngine::new(UdfHooks::new());
        engine
            .load(&CodeObject {
                wasm: wat_to_wasm(ECHO_MODULE_WAT),
                handler_name: "HandleRequest".to_string(),
                version: 1,
                logical_commit_time: 1,
                ..Default::default()
            })
            .unwrap();
        let output = engine
            .invoke(&Invocation {
                handler_name: "HandleRequest".to_string(),
                version: 1,
                args: vec!["{\"hello\":1}".to_string()],
            })
            .unwrap();
        // The echo handler returns the serialized argument array verbatim.
        assert_eq!(output, "[\"{\\\"hello\\\":1}\"]");
    }

    #[test]
    fn test_missing_handler_export() {
        let engine = WasmEngine::new(UdfHooks::new());
        engine
            .load(&CodeObject {
                wasm: wat_to_wasm(ECHO_MODULE_WAT),
                handler_name: "NoSuchHandler".to_string(),
                version: 1,
                logical_commit_time: 1,
                ..Default::default()
            })
            .unwrap();
        let err = engine
            .invoke(&Invocation {
                handler_name: "NoSuchHandler".to_string(),
                version: 1,
                args: vec![],
            })
            .unwrap_err();
        assert_eq!(err.kind(), keyhouse_core::ErrorKind::InvalidArgument);
    }

    fn wat_to_wasm(wat: &str) -> Vec<u8> {
        // Module::new accepts WAT text with wasmtime's default features.
        wat.as_bytes().to_vec()
    }
}
