//! Query Response Model
//!
//! The JSON envelope returned for a query. Single-partition requests are
//! answered under `singlePartition`; multi-partition requests aggregate
//! their outputs under `partitions`. Each partition output carries either
//! the UDF's string output or an inline failure status; partitions never
//! fail each other.

use serde::{Deserialize, Serialize};

use crate::error::Status;

/// Output for one request partition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionOutput {
    pub id: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
}

impl PartitionOutput {
    pub fn output(id: i32, string_output: String) -> Self {
        Self {
            id,
            string_output: Some(string_output),
            status: None,
        }
    }

    pub fn failed(id: i32, status: Status) -> Self {
        Self {
            id,
            string_output: None,
            status: Some(status),
        }
    }
}

/// The full query response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetValuesResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub single_partition: Option<PartitionOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitions: Option<Vec<PartitionOutput>>,
}

impl GetValuesResponse {
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self)
            .map_err(|e| crate::KvError::internal(format!("Failed to serialize response: {e}")))
    }

    pub fn parse(body: &[u8]) -> crate::Result<Self> {
        serde_json::from_slice(body)
            .map_err(|e| crate::KvError::invalid_argument(format!("Malformed response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_partition_shape() {
        let response = GetValuesResponse {
            single_partition: Some(PartitionOutput::output(0, "{}".to_string())),
            partitions: None,
        };
        let json: serde_json::Value =
            serde_json::from_str(&response.to_json().unwrap()).unwrap();
        assert_eq!(json["singlePartition"]["id"], 0);
        assert_eq!(json["singlePartition"]["stringOutput"], "{}");
        assert!(json.get("partitions").is_none());
    }

    #[test]
    fn test_failed_partition_carries_status() {
        let out = PartitionOutput::failed(
            2,
            Status {
                code: 13,
                message: "UDF execution error".to_string(),
            },
        );
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["status"]["code"], 13);
        assert!(json.get("stringOutput").is_none());
    }

    #[test]
    fn test_roundtrip() {
        let response = GetValuesResponse {
            single_partition: None,
            partitions: Some(vec![
                PartitionOutput::output(0, "a".to_string()),
                PartitionOutput::failed(1, Status { code: 5, message: String::new() }),
            ]),
        };
        let parsed =
            GetValuesResponse::parse(response.to_json().unwrap().as_bytes()).unwrap();
        assert_eq!(parsed, response);
    }
}
