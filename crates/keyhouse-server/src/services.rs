//! Public gRPC Service
//!
//! `KeyValueService` mirrors the HTTP endpoints one-to-one; all three RPCs
//! take an opaque raw body and return an `HttpBody`. The outer RPC
//! succeeds whenever the envelope could be processed into a response
//! body; with the Binary HTTP and Oblivious HTTP transports, application
//! errors ride inside that body. Only transport-level failures (a body
//! that cannot be decapsulated at all) surface as gRPC statuses.

use std::sync::Arc;

use keyhouse_core::{ErrorKind, KvError};
use keyhouse_ohttp::OHTTP_RESPONSE_CONTENT_TYPE;
use keyhouse_proto::v2::key_value_service_server::KeyValueService;
use keyhouse_proto::v2::{
    BinaryHttpGetValuesRequest, GetValuesHttpRequest, HttpBody, ObliviousGetValuesRequest,
};
use tonic::{Request, Response, Status};

use crate::protocol::ProtocolCodec;

pub struct KeyValueServiceImpl {
    codec: Arc<ProtocolCodec>,
}

impl KeyValueServiceImpl {
    pub fn new(codec: Arc<ProtocolCodec>) -> Self {
        Self { codec }
    }
}

fn to_grpc_status(err: KvError) -> Status {
    let code = match err.kind() {
        ErrorKind::InvalidArgument => tonic::Code::InvalidArgument,
        ErrorKind::DeadlineExceeded => tonic::Code::DeadlineExceeded,
        ErrorKind::NotFound => tonic::Code::NotFound,
        ErrorKind::PermissionDenied => tonic::Code::PermissionDenied,
        ErrorKind::Unavailable => tonic::Code::Unavailable,
        ErrorKind::Internal => tonic::Code::Internal,
    };
    Status::new(code, err.message)
}

#[tonic::async_trait]
impl KeyValueService for KeyValueServiceImpl {
    #[tracing::instrument(skip(self, request))]
    async fn get_values_http(
        &self,
        request: Request<GetValuesHttpRequest>,
    ) -> Result<Response<HttpBody>, Status> {
        let body = request
            .into_inner()
            .raw_body
            .map(|raw| raw.data)
            .unwrap_or_default();
        let json = self
            .codec
            .get_values_json(&body)
            .await
            .map_err(to_grpc_status)?;
        Ok(Response::new(HttpBody {
            content_type: "application/json".to_string(),
            data: json.into_bytes(),
        }))
    }

    #[tracing::instrument(skip(self, request))]
    async fn binary_http_get_values(
        &self,
        request: Request<BinaryHttpGetValuesRequest>,
    ) -> Result<Response<HttpBody>, Status> {
        let body = request
            .into_inner()
            .raw_body
            .map(|raw| raw.data)
            .unwrap_or_default();
        let response = self.codec.get_values_bhttp(&body).await;
        Ok(Response::new(HttpBody {
            content_type: "message/bhttp".to_string(),
            data: response.to_vec(),
        }))
    }

    #[tracing::instrument(skip(self, request))]
    async fn oblivious_get_values(
        &self,
        request: Request<ObliviousGetValuesRequest>,
    ) -> Result<Response<HttpBody>, Status> {
        let body = request
            .into_inner()
            .raw_body
            .map(|raw| raw.data)
            .unwrap_or_default();
        let data = self
            .codec
            .get_values_ohttp(&body)
            .await
            .map_err(to_grpc_status)?;
        Ok(Response::new(HttpBody {
            content_type: OHTTP_RESPONSE_CONTENT_TYPE.to_string(),
            data,
        }))
    }
}
