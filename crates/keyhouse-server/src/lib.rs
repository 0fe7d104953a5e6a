//! KeyHouse Serving Node
//!
//! Ties the workspace together into one process:
//!
//! - [`handler::RequestHandler`]: splits a query into partitions, runs the
//!   UDF for each concurrently, aggregates the outputs (C8).
//! - [`protocol::ProtocolCodec`]: the three transport layerings over that
//!   handler: plaintext JSON, Binary HTTP, Oblivious HTTP (C7).
//! - [`services::KeyValueServiceImpl`]: the public gRPC surface.
//! - [`http`]: the axum HTTP surface for the same three endpoints.
//! - [`loader::DataLoader`]: applies delta files to the cache and the UDF
//!   host at startup.
//! - [`discovery`]: environment-variable instance inventory for local and
//!   single-cluster deployments.
//! - [`config::ServerConfig`]: all of it configured from `KEYHOUSE_*`
//!   environment variables.

pub mod config;
pub mod discovery;
pub mod handler;
pub mod http;
pub mod loader;
pub mod protocol;
pub mod services;

pub use config::ServerConfig;
pub use handler::RequestHandler;
pub use protocol::ProtocolCodec;
pub use services::KeyValueServiceImpl;
