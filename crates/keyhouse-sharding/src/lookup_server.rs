//! Internal Lookup Service
//!
//! The peer-facing half of remote lookup: exposes this node's `Lookup`
//! (normally the local cache) on the internal port. `SecureLookup` is the
//! production entry point; its payload is an HPKE-encapsulated, padded
//! `InternalLookupRequest`, and the response is encrypted under the same
//! request context. `InternalLookup` and `InternalRunQuery` serve
//! plaintext for loopback use and tests.

use std::sync::Arc;

use keyhouse_core::KvError;
use keyhouse_ohttp::{KeyProvider, ServerContext};
use keyhouse_proto::internal::internal_lookup_service_server::InternalLookupService;
use keyhouse_proto::internal::{
    InternalLookupRequest, InternalLookupResponse, InternalRunQueryRequest,
    InternalRunQueryResponse, SecureLookupRequest, SecureLookupResponse,
};
use keyhouse_store::Lookup;
use prost::Message;
use tonic::{Request, Response, Status};
use tracing::debug;

use crate::padding::unpad;

/// tonic implementation of the peer lookup service.
pub struct LookupServiceImpl {
    lookup: Arc<dyn Lookup>,
    key_provider: Arc<dyn KeyProvider>,
}

impl LookupServiceImpl {
    pub fn new(lookup: Arc<dyn Lookup>, key_provider: Arc<dyn KeyProvider>) -> Self {
        Self {
            lookup,
            key_provider,
        }
    }

    async fn process(&self, request: InternalLookupRequest) -> InternalLookupResponse {
        if request.keys.is_empty() {
            return InternalLookupResponse::default();
        }
        let result = if request.lookup_sets {
            self.lookup.get_key_value_set(&request.keys).await
        } else {
            self.lookup.get_key_values(&request.keys).await
        };
        // Lookup failures degrade to an empty response; per-key statuses
        // are the error channel peers act on.
        result.unwrap_or_default()
    }

    fn internal_status(err: &KvError) -> Status {
        Status::internal(format!("{} : {}", err.kind.code(), err.message))
    }
}

#[tonic::async_trait]
impl InternalLookupService for LookupServiceImpl {
    async fn internal_lookup(
        &self,
        request: Request<InternalLookupRequest>,
    ) -> Result<Response<InternalLookupResponse>, Status> {
        let response = self.process(request.into_inner()).await;
        Ok(Response::new(response))
    }

    async fn internal_run_query(
        &self,
        request: Request<InternalRunQueryRequest>,
    ) -> Result<Response<InternalRunQueryResponse>, Status> {
        let req = request.into_inner();
        let elements = self
            .lookup
            .run_query(&req.query)
            .await
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        Ok(Response::new(InternalRunQueryResponse { elements }))
    }

    #[tracing::instrument(skip(self, request))]
    async fn secure_lookup(
        &self,
        request: Request<SecureLookupRequest>,
    ) -> Result<Response<SecureLookupResponse>, Status> {
        let req = request.into_inner();
        debug!("SecureLookup incoming");
        let (padded_request, context) =
            ServerContext::decapsulate_request(self.key_provider.as_ref(), &req.ohttp_request)
                .map_err(|e| Self::internal_status(&e))?;
        let serialized_request =
            unpad(&padded_request).map_err(|e| Self::internal_status(&e))?;
        let lookup_request = InternalLookupRequest::decode(serialized_request)
            .map_err(|e| Status::internal(format!("Malformed lookup request: {e}")))?;

        let response = self.process(lookup_request).await;
        let ohttp_response = context
            .encapsulate_response(&response.encode_to_vec())
            .map_err(|e| Self::internal_status(&e))?;
        Ok(Response::new(SecureLookupResponse { ohttp_response }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyhouse_ohttp::{ClientContext, StaticKeyProvider, TEST_KEY_ID, TEST_PUBLIC_KEY};
    use keyhouse_store::{KeyValueCache, LocalLookup};

    use crate::padding::pad;

    fn service() -> LookupServiceImpl {
        let cache = Arc::new(KeyValueCache::new());
        cache.update_key_value("key1", "value1", 1);
        cache.update_key_value_set("set1", &["a".into(), "b".into()], 1);
        LookupServiceImpl::new(
            Arc::new(LocalLookup::new(cache)),
            Arc::new(StaticKeyProvider::with_test_key()),
        )
    }

    #[tokio::test]
    async fn test_internal_lookup_plaintext() {
        let service = service();
        let response = service
            .internal_lookup(Request::new(InternalLookupRequest {
                keys: vec!["key1".to_string(), "missing".to_string()],
                lookup_sets: false,
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.kv_pairs.len(), 2);
    }

    #[tokio::test]
    async fn test_internal_run_query() {
        let service = service();
        let response = service
            .internal_run_query(Request::new(InternalRunQueryRequest {
                query: "set1".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.elements, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_secure_lookup_roundtrip() {
        let service = service();
        let lookup_request = InternalLookupRequest {
            keys: vec!["key1".to_string()],
            lookup_sets: false,
        };
        let padded = pad(&lookup_request.encode_to_vec(), 0);
        let (ohttp_request, client_context) =
            ClientContext::encapsulate_request(TEST_KEY_ID, &TEST_PUBLIC_KEY, &padded).unwrap();

        let response = service
            .secure_lookup(Request::new(SecureLookupRequest { ohttp_request }))
            .await
            .unwrap()
            .into_inner();

        let serialized = client_context
            .decapsulate_response(&response.ohttp_response)
            .unwrap();
        let lookup_response = InternalLookupResponse::decode(serialized.as_slice()).unwrap();
        assert!(lookup_response.kv_pairs.contains_key("key1"));
    }

    #[tokio::test]
    async fn test_secure_lookup_rejects_garbage() {
        let service = service();
        let status = service
            .secure_lookup(Request::new(SecureLookupRequest {
                ohttp_request: vec![0u8; 4],
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::Internal);
    }
}
