//! Oblivious HTTP Encapsulation (RFC 9458)
//!
//! The outermost privacy layer: clients seal a Binary HTTP request to the
//! service's published key, so a relay in between sees who is talking but
//! never what is asked.
//!
//! ## Request Wire Layout
//!
//! ```text
//! | key id (1) | kem id (2) | kdf id (2) | aead id (2) | enc (32) | ct |
//! ```
//!
//! The header names the key and suite; `enc` is the sender's encapsulated
//! KEM share; `ct` is the sealed Binary HTTP request. The header also
//! rides inside the HPKE info string, so tampering with it breaks
//! decryption.
//!
//! ## Why the Response Needs No Second Key Exchange
//!
//! The response is keyed off the *same* HPKE context the request
//! established: a secret exported under `"message/bhttp response"`, mixed
//! with a fresh response nonce, yields the response AEAD key and nonce.
//!
//! ```text
//! secret = context.Export("message/bhttp response", 16)
//! prk    = Extract(salt = enc || response_nonce, secret)
//! key    = Expand(prk, "key"),  nonce = Expand(prk, "nonce")
//! response = response_nonce || Seal(key, nonce, bhttp_response)
//! ```
//!
//! [`ServerContext`] carries the context from decapsulation to response
//! encapsulation and is consumed by it; one context answers exactly one
//! request. [`ClientContext`] is its mirror image.
//!
//! ## Usage
//!
//! ```ignore
//! // client
//! let (payload, ctx) = ClientContext::encapsulate_request(key_id, &pk, &bhttp)?;
//! // gateway
//! let (bhttp, server_ctx) = ServerContext::decapsulate_request(&keys, &payload)?;
//! let sealed = server_ctx.encapsulate_response(&answer)?;
//! // client
//! let answer = ctx.decapsulate_response(&sealed)?;
//! ```

use hkdf::Hkdf;
use keyhouse_core::{KvError, Result};
use rand::RngCore;
use sha2::Sha256;

use crate::hpke::{
    self, setup_base_receiver, setup_base_sender, AEAD_AES_128_GCM, KDF_HKDF_SHA256,
    KEM_X25519_HKDF_SHA256, NENC, NK, NN,
};
use crate::keys::KeyProvider;

/// Media type of an encapsulated response body.
pub const OHTTP_RESPONSE_CONTENT_TYPE: &str = "message/ohttp-res";

const REQUEST_INFO_LABEL: &[u8] = b"message/bhttp request";
const RESPONSE_EXPORT_LABEL: &[u8] = b"message/bhttp response";

const HEADER_LEN: usize = 7;
/// Response secret/nonce length: max(Nn, Nk).
const SECRET_LEN: usize = 16;

fn header(key_id: u8) -> [u8; HEADER_LEN] {
    let mut hdr = [0u8; HEADER_LEN];
    hdr[0] = key_id;
    hdr[1..3].copy_from_slice(&KEM_X25519_HKDF_SHA256.to_be_bytes());
    hdr[3..5].copy_from_slice(&KDF_HKDF_SHA256.to_be_bytes());
    hdr[5..7].copy_from_slice(&AEAD_AES_128_GCM.to_be_bytes());
    hdr
}

fn request_info(hdr: &[u8; HEADER_LEN]) -> Vec<u8> {
    let mut info = Vec::with_capacity(REQUEST_INFO_LABEL.len() + 1 + HEADER_LEN);
    info.extend_from_slice(REQUEST_INFO_LABEL);
    info.push(0);
    info.extend_from_slice(hdr);
    info
}

/// Derive the response AEAD key and nonce from the request context.
fn response_key_nonce(
    context: &hpke::Context,
    enc: &[u8; NENC],
    response_nonce: &[u8; SECRET_LEN],
) -> ([u8; NK], [u8; NN]) {
    let mut secret = [0u8; SECRET_LEN];
    context.export(RESPONSE_EXPORT_LABEL, &mut secret);

    let mut salt = Vec::with_capacity(NENC + SECRET_LEN);
    salt.extend_from_slice(enc);
    salt.extend_from_slice(response_nonce);

    let (prk, _) = Hkdf::<Sha256>::extract(Some(&salt), &secret);
    let hk = Hkdf::<Sha256>::from_prk(&prk).expect("PRK is always hash-sized");
    let mut key = [0u8; NK];
    hk.expand(b"key", &mut key).expect("fixed-size expand");
    let mut nonce = [0u8; NN];
    hk.expand(b"nonce", &mut nonce).expect("fixed-size expand");
    (key, nonce)
}

fn aead_seal(key: &[u8; NK], nonce: &[u8; NN], plaintext: &[u8]) -> Result<Vec<u8>> {
    use aes_gcm::aead::{Aead, KeyInit};
    use aes_gcm::{Aes128Gcm, Key, Nonce};
    Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(key))
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|_| KvError::internal("Response encryption failed"))
}

fn aead_open(key: &[u8; NK], nonce: &[u8; NN], ciphertext: &[u8]) -> Result<Vec<u8>> {
    use aes_gcm::aead::{Aead, KeyInit};
    use aes_gcm::{Aes128Gcm, Key, Nonce};
    Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(key))
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| KvError::permission_denied("Response decryption failed"))
}

/// Gateway-side state carried from request decapsulation to response
/// encapsulation. Consumed by the response; one context answers exactly
/// one request.
#[derive(Debug)]
pub struct ServerContext {
    context: hpke::Context,
    enc: [u8; NENC],
}

impl ServerContext {
    /// Decapsulate `payload`, returning the inner plaintext and the context
    /// to answer with.
    pub fn decapsulate_request(
        key_provider: &dyn KeyProvider,
        payload: &[u8],
    ) -> Result<(Vec<u8>, ServerContext)> {
        if payload.len() < HEADER_LEN + NENC {
            return Err(KvError::invalid_argument(
                "Encapsulated request is too short",
            ));
        }
        let key_id = payload[0];
        let kem_id = u16::from_be_bytes(payload[1..3].try_into().unwrap());
        let kdf_id = u16::from_be_bytes(payload[3..5].try_into().unwrap());
        let aead_id = u16::from_be_bytes(payload[5..7].try_into().unwrap());
        if kem_id != KEM_X25519_HKDF_SHA256
            || kdf_id != KDF_HKDF_SHA256
            || aead_id != AEAD_AES_128_GCM
        {
            return Err(KvError::invalid_argument(format!(
                "Unsupported HPKE suite: kem={kem_id:#06x} kdf={kdf_id:#06x} aead={aead_id:#06x}"
            )));
        }
        let private_key = key_provider.private_key(key_id)?;

        let mut enc = [0u8; NENC];
        enc.copy_from_slice(&payload[HEADER_LEN..HEADER_LEN + NENC]);
        let ciphertext = &payload[HEADER_LEN + NENC..];

        let info = request_info(&header(key_id));
        let mut context = setup_base_receiver(&enc, &private_key, &info)?;
        let plaintext = context.open(b"", ciphertext)?;
        Ok((plaintext, ServerContext { context, enc }))
    }

    /// Encrypt `response` under the request's context.
    pub fn encapsulate_response(self, response: &[u8]) -> Result<Vec<u8>> {
        let mut response_nonce = [0u8; SECRET_LEN];
        rand::rngs::OsRng.fill_bytes(&mut response_nonce);
        let (key, nonce) = response_key_nonce(&self.context, &self.enc, &response_nonce);
        let ciphertext = aead_seal(&key, &nonce, response)?;
        let mut out = Vec::with_capacity(SECRET_LEN + ciphertext.len());
        out.extend_from_slice(&response_nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }
}

/// Client-side state carried from request encapsulation to response
/// decapsulation.
pub struct ClientContext {
    context: hpke::Context,
    enc: [u8; NENC],
}

impl ClientContext {
    /// Encrypt `request` to the key identified by `(key_id, public_key)`.
    pub fn encapsulate_request(
        key_id: u8,
        public_key: &[u8; 32],
        request: &[u8],
    ) -> Result<(Vec<u8>, ClientContext)> {
        let hdr = header(key_id);
        let info = request_info(&hdr);
        let mut sender = setup_base_sender(public_key, &info)?;
        let ciphertext = sender.context.seal(b"", request)?;

        let mut out = Vec::with_capacity(HEADER_LEN + NENC + ciphertext.len());
        out.extend_from_slice(&hdr);
        out.extend_from_slice(&sender.enc);
        out.extend_from_slice(&ciphertext);
        Ok((
            out,
            ClientContext {
                context: sender.context,
                enc: sender.enc,
            },
        ))
    }

    /// Decrypt the gateway's `payload`.
    pub fn decapsulate_response(self, payload: &[u8]) -> Result<Vec<u8>> {
        if payload.len() < SECRET_LEN {
            return Err(KvError::invalid_argument(
                "Encapsulated response is too short",
            ));
        }
        let mut response_nonce = [0u8; SECRET_LEN];
        response_nonce.copy_from_slice(&payload[..SECRET_LEN]);
        let (key, nonce) = response_key_nonce(&self.context, &self.enc, &response_nonce);
        aead_open(&key, &nonce, &payload[SECRET_LEN..])
    }
}
