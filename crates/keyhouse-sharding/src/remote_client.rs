//! Remote Lookup Client
//!
//! One client per peer replica. The wire flow for a lookup:
//!
//! 1. Pad the serialized request so its length reveals only a bucket.
//! 2. Fetch the peer's current public key from the key provider and HPKE
//!    encapsulate the padded request.
//! 3. Call `SecureLookup` over gRPC.
//! 4. Decrypt the reply with the client half of the same HPKE context.
//!
//! The tonic channel is established lazily on first use and reused for
//! the client's lifetime; one replica address maps to one client.

use async_trait::async_trait;
use bytes::Bytes;
use keyhouse_core::{KvError, Result};
use keyhouse_ohttp::{ClientContext, KeyProvider};
use keyhouse_proto::internal::internal_lookup_service_client::InternalLookupServiceClient;
use keyhouse_proto::internal::{InternalLookupResponse, SecureLookupRequest};
use prost::Message;
use std::sync::Arc;
use tonic::transport::Channel;
use tracing::debug;

use crate::padding::pad;

/// Lookup RPC to one remote shard replica.
#[async_trait]
pub trait RemoteLookupClient: Send + Sync {
    /// Send an already-serialized `InternalLookupRequest`; `padding` is the
    /// extra length to add so concurrent fan-out requests match in size.
    async fn get_values(
        &self,
        serialized_request: Bytes,
        padding: usize,
    ) -> Result<InternalLookupResponse>;
}

/// Production client: HPKE over tonic.
pub struct GrpcRemoteLookupClient {
    address: String,
    key_id: u8,
    key_provider: Arc<dyn KeyProvider>,
    channel: tokio::sync::Mutex<Option<InternalLookupServiceClient<Channel>>>,
}

impl GrpcRemoteLookupClient {
    pub fn new(address: String, key_id: u8, key_provider: Arc<dyn KeyProvider>) -> Self {
        Self {
            address,
            key_id,
            key_provider,
            channel: tokio::sync::Mutex::new(None),
        }
    }

    async fn client(&self) -> Result<InternalLookupServiceClient<Channel>> {
        let mut slot = self.channel.lock().await;
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }
        debug!(address = %self.address, "Connecting to shard replica");
        let client = InternalLookupServiceClient::connect(self.address.clone())
            .await
            .map_err(|e| {
                KvError::unavailable(format!("Failed to connect to {}: {e}", self.address))
            })?;
        *slot = Some(client.clone());
        Ok(client)
    }
}

#[async_trait]
impl RemoteLookupClient for GrpcRemoteLookupClient {
    async fn get_values(
        &self,
        serialized_request: Bytes,
        padding: usize,
    ) -> Result<InternalLookupResponse> {
        let public_key = self.key_provider.public_key(self.key_id)?;
        let padded = pad(&serialized_request, padding);
        let (ohttp_request, context) =
            ClientContext::encapsulate_request(self.key_id, &public_key, &padded)?;

        let mut client = self.client().await?;
        let response = client
            .secure_lookup(SecureLookupRequest { ohttp_request })
            .await
            .map_err(|status| {
                // A replica that cannot be reached or answers with an error
                // degrades to per-key statuses upstream.
                KvError::unavailable(format!(
                    "SecureLookup to {} failed: {status}",
                    self.address
                ))
            })?
            .into_inner();

        let serialized_response = context.decapsulate_response(&response.ohttp_response)?;
        InternalLookupResponse::decode(serialized_response.as_slice())
            .map_err(|e| KvError::internal(format!("Malformed peer lookup response: {e}")))
    }
}
