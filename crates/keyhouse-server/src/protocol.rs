//! Protocol Codec
//!
//! Three transports terminate at the same JSON handler; this module is
//! the layering between them.
//!
//! ## The Layers
//!
//! ```text
//! plaintext:  body ─────────────────────────────→ JSON handler
//! bhttp:      body ──decode RFC 9292──→ inner body ──→ JSON handler
//! ohttp:      body ──HPKE decap──→ bhttp request ──→ (bhttp path)
//!                        │
//!                 request context kept
//!                        ↓
//!             response encap under the SAME context
//! ```
//!
//! - **Plaintext**: the body is the JSON request, the answer is JSON.
//! - **Binary HTTP**: the answer is always a serialized Binary HTTP
//!   response. Application failures become an inner status code
//!   (`InvalidArgument → 400`, `PermissionDenied → 403`, `NotFound → 404`,
//!   anything else → 500) rather than a transport error, so a client that
//!   could encrypt to us always gets a decryptable answer.
//! - **Oblivious HTTP**: the HPKE request context established during
//!   decapsulation encrypts the response, binding request and response to
//!   the same key exchange. Only envelope failures (unknown key id, bad
//!   ciphertext) surface as errors from this path.

use std::sync::Arc;

use bytes::Bytes;
use keyhouse_core::{ErrorKind, KvError, Result};
use keyhouse_ohttp::{BinaryHttpRequest, BinaryHttpResponse, KeyProvider, ServerContext};
use tracing::debug;

use crate::handler::RequestHandler;

/// HTTP status carried in the Binary HTTP layer for an application error.
pub fn bhttp_status(kind: ErrorKind) -> u16 {
    match kind {
        ErrorKind::InvalidArgument => 400,
        ErrorKind::PermissionDenied => 403,
        ErrorKind::NotFound => 404,
        _ => 500,
    }
}

pub struct ProtocolCodec {
    handler: Arc<RequestHandler>,
    key_provider: Arc<dyn KeyProvider>,
}

impl ProtocolCodec {
    pub fn new(handler: Arc<RequestHandler>, key_provider: Arc<dyn KeyProvider>) -> Self {
        Self {
            handler,
            key_provider,
        }
    }

    /// Plaintext path: JSON in, JSON out.
    pub async fn get_values_json(&self, body: &[u8]) -> Result<String> {
        let request = keyhouse_core::GetValuesRequest::parse(body)?;
        let response = self.handler.get_values(request).await?;
        response.to_json()
    }

    /// Binary HTTP path. The return value is always a serialized Binary
    /// HTTP response; errors live in its status code.
    pub async fn get_values_bhttp(&self, body: &[u8]) -> Bytes {
        let response = match self.bhttp_inner(body).await {
            Ok(response) => response,
            Err(e) => {
                debug!(kind = %e.kind(), "Binary HTTP request failed");
                BinaryHttpResponse::with_body(bhttp_status(e.kind()), e.message)
            }
        };
        response.encode()
    }

    async fn bhttp_inner(&self, body: &[u8]) -> Result<BinaryHttpResponse> {
        let request = BinaryHttpRequest::decode(body)
            .map_err(|e| KvError::invalid_argument(format!("Failed to deserialize binary http request: {}", e.message)))?;
        let json = self.get_values_json(&request.body).await?;
        Ok(BinaryHttpResponse::with_body(200, json))
    }

    /// Oblivious HTTP path: decapsulate, run the Binary HTTP path, and
    /// encapsulate under the same request context. Errors here are
    /// transport-level (bad envelope, unknown key, failed decryption).
    pub async fn get_values_ohttp(&self, body: &[u8]) -> Result<Vec<u8>> {
        let (bhttp_request, context) =
            ServerContext::decapsulate_request(self.key_provider.as_ref(), body)?;
        let bhttp_response = self.get_values_bhttp(&bhttp_request).await;
        context.encapsulate_response(&bhttp_response)
    }
}
