//! Server Configuration
//!
//! Everything is configured through `KEYHOUSE_*` environment variables
//! with serviceable defaults, the same way the rest of the deployment
//! tooling expects:
//!
//! - `KEYHOUSE_GRPC_ADDR` (default `0.0.0.0:50051`)
//! - `KEYHOUSE_HTTP_ADDR` (default `0.0.0.0:51052`)
//! - `KEYHOUSE_INTERNAL_ADDR` (default `0.0.0.0:50099`)
//! - `KEYHOUSE_ENVIRONMENT` (default `local`)
//! - `KEYHOUSE_NUM_SHARDS` (default `1`: no remote fan-out)
//! - `KEYHOUSE_SHARD_NUM` (default `0`)
//! - `KEYHOUSE_UDF_TIMEOUT_MS` (default 60000)
//! - `KEYHOUSE_UDF_LOAD_TIMEOUT_MS` (default 1000)
//! - `KEYHOUSE_UDF_WORKERS` (default: one per vCPU)
//! - `KEYHOUSE_MAPPING_REFRESH_MS` (default 30000)
//! - `KEYHOUSE_DELTA_DIR` (optional: delta files to load at boot)
//! - `KEYHOUSE_CLUSTER_MAP` (see [`crate::discovery`])

use std::net::SocketAddr;
use std::time::Duration;

use keyhouse_core::{KvError, Result};
use keyhouse_udf::UdfConfig;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub grpc_addr: SocketAddr,
    pub http_addr: SocketAddr,
    pub internal_addr: SocketAddr,
    pub environment: String,
    pub num_shards: i32,
    pub current_shard_num: i32,
    pub udf: UdfConfig,
    pub mapping_refresh: Duration,
    pub delta_dir: Option<String>,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| KvError::invalid_argument(format!("Invalid value for {name}: {raw}")))
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let grpc_addr = parse("KEYHOUSE_GRPC_ADDR", &env_or("KEYHOUSE_GRPC_ADDR", "0.0.0.0:50051"))?;
        let http_addr = parse("KEYHOUSE_HTTP_ADDR", &env_or("KEYHOUSE_HTTP_ADDR", "0.0.0.0:51052"))?;
        let internal_addr = parse(
            "KEYHOUSE_INTERNAL_ADDR",
            &env_or("KEYHOUSE_INTERNAL_ADDR", "0.0.0.0:50099"),
        )?;
        let num_shards: i32 =
            parse("KEYHOUSE_NUM_SHARDS", &env_or("KEYHOUSE_NUM_SHARDS", "1"))?;
        let current_shard_num: i32 =
            parse("KEYHOUSE_SHARD_NUM", &env_or("KEYHOUSE_SHARD_NUM", "0"))?;
        if num_shards < 1 {
            return Err(KvError::invalid_argument("KEYHOUSE_NUM_SHARDS must be >= 1"));
        }
        if !(0..num_shards).contains(&current_shard_num) {
            return Err(KvError::invalid_argument(
                "KEYHOUSE_SHARD_NUM must be in [0, KEYHOUSE_NUM_SHARDS)",
            ));
        }

        let defaults = UdfConfig::default();
        let udf = UdfConfig {
            udf_timeout: Duration::from_millis(parse(
                "KEYHOUSE_UDF_TIMEOUT_MS",
                &env_or("KEYHOUSE_UDF_TIMEOUT_MS", "60000"),
            )?),
            load_timeout: Duration::from_millis(parse(
                "KEYHOUSE_UDF_LOAD_TIMEOUT_MS",
                &env_or("KEYHOUSE_UDF_LOAD_TIMEOUT_MS", "1000"),
            )?),
            worker_threads: match std::env::var("KEYHOUSE_UDF_WORKERS") {
                Ok(raw) => parse("KEYHOUSE_UDF_WORKERS", &raw)?,
                Err(_) => defaults.worker_threads,
            },
        };

        Ok(Self {
            grpc_addr,
            http_addr,
            internal_addr,
            environment: env_or("KEYHOUSE_ENVIRONMENT", "local"),
            num_shards,
            current_shard_num,
            udf,
            mapping_refresh: Duration::from_millis(parse(
                "KEYHOUSE_MAPPING_REFRESH_MS",
                &env_or("KEYHOUSE_MAPPING_REFRESH_MS", "30000"),
            )?),
            delta_dir: std::env::var("KEYHOUSE_DELTA_DIR").ok(),
        })
    }
}
