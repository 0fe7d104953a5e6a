//! UDF Host Configuration
//!
//! All knobs are explicit and travel with the client at construction;
//! there is no ambient flag state.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct UdfConfig {
    /// Deadline for one UDF invocation.
    pub udf_timeout: Duration,
    /// Deadline for installing a code object.
    pub load_timeout: Duration,
    /// Sandbox worker threads; invocations beyond this queue.
    pub worker_threads: usize,
}

impl Default for UdfConfig {
    fn default() -> Self {
        Self {
            udf_timeout: Duration::from_secs(60),
            load_timeout: Duration::from_secs(1),
            worker_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}
