//! Sandbox Engine Seam and Worker Dispatch
//!
//! The boundary between the async serving path and the synchronous
//! sandbox runtime.
//!
//! ## The Seam
//!
//! A [`SandboxEngine`] is synchronous: loading compiles a code object,
//! invoking runs a handler to completion. Implementations share one
//! engine across workers (loads swap the compiled artifact, invocations
//! instantiate from it), which is why the trait takes `&self`.
//!
//! ## The Dispatch
//!
//! ```text
//! async caller                         udf-worker-0 .. udf-worker-N
//!      │                                        │
//!      ├─ send Command + oneshot reply ──→ shared queue
//!      │                                        │ idle worker takes it
//!      ├─ await reply with timeout        engine.load / engine.invoke
//!      │←──────── reply.send(result) ──────────┘
//! ```
//!
//! The single-shot reply channel is what makes deadlines enforceable: the
//! caller times out on the channel while a wedged worker finishes (or
//! never finishes) in the background, and a late reply lands in a dropped
//! receiver.
//!
//! ## Workers
//!
//! Dedicated OS threads, not runtime tasks: UDF execution is CPU-bound
//! and its host callbacks block on the async lookup stack, neither of
//! which belongs on the request-serving runtime.

use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use keyhouse_core::Result;
use tokio::sync::oneshot;
use tracing::debug;

/// An installable UDF code object.
#[derive(Debug, Clone, Default)]
pub struct CodeObject {
    pub js: String,
    pub wasm: Vec<u8>,
    pub handler_name: String,
    pub version: u64,
    pub logical_commit_time: i64,
}

/// One handler invocation: serialized JSON arguments, in call order.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub handler_name: String,
    pub version: u64,
    pub args: Vec<String>,
}

/// A synchronous sandbox. Implementations share one engine across workers
/// (loads swap the compiled artifact; invocations instantiate from it), so
/// the methods take `&self`.
pub trait SandboxEngine: Send + Sync {
    fn load(&self, code: &CodeObject) -> Result<()>;
    fn invoke(&self, invocation: &Invocation) -> Result<String>;
}

pub(crate) enum Command {
    Load {
        code: CodeObject,
        reply: oneshot::Sender<Result<()>>,
    },
    Invoke {
        invocation: Invocation,
        reply: oneshot::Sender<Result<String>>,
    },
}

/// Worker pool in front of a sandbox engine.
pub(crate) struct SandboxDispatcher {
    sender: mpsc::Sender<Command>,
}

impl SandboxDispatcher {
    pub(crate) fn start(engine: Arc<dyn SandboxEngine>, worker_threads: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Command>();
        let receiver = Arc::new(Mutex::new(receiver));
        for worker in 0..worker_threads.max(1) {
            let engine = engine.clone();
            let receiver = receiver.clone();
            thread::Builder::new()
                .name(format!("udf-worker-{worker}"))
                .spawn(move || worker_loop(worker, engine, receiver))
                .expect("failed to spawn sandbox worker");
        }
        Self { sender }
    }

    pub(crate) fn send(&self, command: Command) -> Result<()> {
        self.sender
            .send(command)
            .map_err(|_| keyhouse_core::KvError::internal("Sandbox workers have shut down"))
    }
}

fn worker_loop(
    worker: usize,
    engine: Arc<dyn SandboxEngine>,
    receiver: Arc<Mutex<mpsc::Receiver<Command>>>,
) {
    loop {
        // Holding the lock while blocked in recv hands each command to
        // exactly one idle worker; busy workers are not holding the lock.
        let command = {
            let guard = receiver.lock().unwrap();
            guard.recv()
        };
        let Ok(command) = command else {
            debug!(worker, "Sandbox worker shutting down");
            return;
        };
        match command {
            Command::Load { code, reply } => {
                let _ = reply.send(engine.load(&code));
            }
            Command::Invoke { invocation, reply } => {
                let _ = reply.send(engine.invoke(&invocation));
            }
        }
    }
}
