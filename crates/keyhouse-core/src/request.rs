//! Query Request Model
//!
//! The JSON envelope accepted on `/v2/getvalues` (and, wrapped in Binary
//! HTTP / Oblivious HTTP, on the other two endpoints). A request carries
//! free-form string metadata plus a sequence of partitions; each partition
//! is one unit of UDF execution with its own tagged arguments.
//!
//! Wire field names are camelCase:
//!
//! ```json
//! {
//!   "metadata": { "hostname": "example.com" },
//!   "partitions": [
//!     { "id": 0, "compressionGroupId": 0,
//!       "arguments": [ { "tags": ["custom", "keys"], "data": ["hi"] } ] }
//!   ]
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One tagged argument passed to the UDF handler.
///
/// `data` is opaque to the server: a string, list, struct, or nested list.
/// The tag set controls argument serialization: an argument with no tags is
/// passed to the UDF as bare `data`; a tagged argument is passed whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Argument {
    /// The JSON the UDF receives for this argument.
    pub fn to_udf_json(&self) -> serde_json::Value {
        if self.tags.is_empty() {
            self.data.clone()
        } else {
            serde_json::json!({ "tags": self.tags, "data": self.data })
        }
    }
}

/// One unit of UDF execution within a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPartition {
    #[serde(default)]
    pub id: i32,
    #[serde(default)]
    pub compression_group_id: i32,
    #[serde(default)]
    pub arguments: Vec<Argument>,
}

/// The full query request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetValuesRequest {
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub partitions: Vec<RequestPartition>,
}

impl GetValuesRequest {
    pub fn parse(body: &[u8]) -> crate::Result<Self> {
        serde_json::from_slice(body)
            .map_err(|e| crate::KvError::invalid_argument(format!("Malformed request: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_glossary_example() {
        let body = br#"{
            "metadata": { "hostname": "example.com" },
            "partitions": [
                { "id": 0, "compressionGroupId": 0,
                  "arguments": [ { "tags": ["custom", "keys"], "data": ["hi"] } ] },
                { "id": 1, "compressionGroupId": 0,
                  "arguments": [ { "tags": ["custom", "keys"], "data": ["hi"] } ] }
            ]
        }"#;
        let request = GetValuesRequest::parse(body).unwrap();
        assert_eq!(request.metadata["hostname"], "example.com");
        assert_eq!(request.partitions.len(), 2);
        assert_eq!(request.partitions[1].id, 1);
        assert_eq!(request.partitions[0].arguments[0].tags, vec!["custom", "keys"]);
    }

    #[test]
    fn test_parse_rejects_malformed_json() {
        let err = GetValuesRequest::parse(b"{ not json").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_untagged_argument_serializes_bare_data() {
        let arg = Argument {
            tags: vec![],
            data: serde_json::json!(["k1", "k2"]),
        };
        assert_eq!(arg.to_udf_json(), serde_json::json!(["k1", "k2"]));
    }

    #[test]
    fn test_tagged_argument_serializes_whole_object() {
        let arg = Argument {
            tags: vec!["custom".to_string()],
            data: serde_json::json!("payload"),
        };
        assert_eq!(
            arg.to_udf_json(),
            serde_json::json!({ "tags": ["custom"], "data": "payload" })
        );
    }

    #[test]
    fn test_compression_group_id_wire_name() {
        let partition = RequestPartition {
            id: 3,
            compression_group_id: 7,
            arguments: vec![],
        };
        let json = serde_json::to_value(&partition).unwrap();
        assert_eq!(json["compressionGroupId"], 7);
    }
}
