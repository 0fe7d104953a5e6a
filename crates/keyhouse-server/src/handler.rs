//! Request Handler
//!
//! Executes one query request: every partition becomes one UDF invocation,
//! run concurrently, and partitions are isolated: a UDF failure turns
//! into that partition's inline status while the others return normally.
//! Single-partition requests answer under `singlePartition`, the adapter
//! path's required shape.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use keyhouse_core::request::RequestPartition;
use keyhouse_core::{GetValuesRequest, GetValuesResponse, KvError, PartitionOutput, Result};
use keyhouse_udf::UdfClient;
use tracing::debug;

pub struct RequestHandler {
    udf_client: Arc<UdfClient>,
}

impl RequestHandler {
    pub fn new(udf_client: Arc<UdfClient>) -> Self {
        Self { udf_client }
    }

    pub async fn get_values(&self, request: GetValuesRequest) -> Result<GetValuesResponse> {
        if request.partitions.is_empty() {
            return Err(KvError::internal("At least 1 partition is required"));
        }
        if request.partitions.len() == 1 {
            let output = self
                .process_partition(&request.metadata, &request.partitions[0])
                .await;
            return Ok(GetValuesResponse {
                single_partition: Some(output),
                partitions: None,
            });
        }
        let outputs = join_all(
            request
                .partitions
                .iter()
                .map(|partition| self.process_partition(&request.metadata, partition)),
        )
        .await;
        Ok(GetValuesResponse {
            single_partition: None,
            partitions: Some(outputs),
        })
    }

    async fn process_partition(
        &self,
        metadata: &BTreeMap<String, String>,
        partition: &RequestPartition,
    ) -> PartitionOutput {
        match self
            .udf_client
            .execute_code(metadata, &partition.arguments)
            .await
        {
            Ok(string_output) => {
                debug!(partition = partition.id, "UDF output ready");
                PartitionOutput::output(partition.id, string_output)
            }
            Err(e) => PartitionOutput::failed(partition.id, e.to_status()),
        }
    }
}
