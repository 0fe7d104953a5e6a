//! HPKE (RFC 9180), Base Mode, Single Suite
//!
//! Hybrid Public Key Encryption is the primitive under every encrypted
//! payload this service handles: Oblivious HTTP requests from clients and
//! the shard-to-shard lookup traffic both seal with it.
//!
//! ## The One Suite
//!
//! The wire contract pins a single ciphersuite; anything else is rejected
//! before decryption is attempted:
//!
//! - **KEM** `0x0020`: DHKEM(X25519, HKDF-SHA256)
//! - **KDF** `0x0001`: HKDF-SHA256
//! - **AEAD** `0x0001`: AES-128-GCM
//!
//! ## How a Message Flows
//!
//! ```text
//! Sender                                    Recipient
//! ------                                    ---------
//! ephemeral X25519 keypair
//! dh = X25519(skE, pkR)
//! shared_secret = ExtractAndExpand(dh)      shared_secret = same, from skR
//!         ↓                                         ↓
//! KeySchedule(shared_secret, info) ───────→ identical key / nonce / exporter
//!         ↓                                         ↓
//! ct = Seal(key, nonce ^ seq, aad, pt)      pt = Open(...)
//! ship (enc = pkE) alongside ct
//! ```
//!
//! Both sides end up holding the same [`Context`]: an AEAD key, a base
//! nonce XORed with a per-message sequence number, and an exporter secret.
//! The exporter is what lets Oblivious HTTP derive response keys that are
//! bound to the request without another key exchange.
//!
//! ## What Is Left Out
//!
//! No PSK or auth modes, no other KEMs/KDFs/AEADs, no multi-recipient
//! support. Base mode with the one wire-contract suite is the whole
//! surface.
//!
//! ## Usage
//!
//! ```ignore
//! let mut sender = setup_base_sender(&recipient_pk, b"app info")?;
//! let ct = sender.context.seal(b"", b"hello")?;
//!
//! // ship (sender.enc, ct) to the recipient
//! let mut recipient = setup_base_receiver(&sender.enc, &recipient_sk, b"app info")?;
//! assert_eq!(recipient.open(b"", &ct)?, b"hello");
//! ```

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Key, Nonce};
use hkdf::Hkdf;
use keyhouse_core::{KvError, Result};
use rand::rngs::OsRng;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};

pub const KEM_X25519_HKDF_SHA256: u16 = 0x0020;
pub const KDF_HKDF_SHA256: u16 = 0x0001;
pub const AEAD_AES_128_GCM: u16 = 0x0001;

/// AEAD key length (AES-128-GCM).
pub const NK: usize = 16;
/// AEAD nonce length.
pub const NN: usize = 12;
/// KDF output length (SHA-256).
pub const NH: usize = 32;
/// Encapsulated key length (X25519 public key).
pub const NENC: usize = 32;

const MODE_BASE: u8 = 0x00;

fn kem_suite_id() -> [u8; 5] {
    let mut id = [0u8; 5];
    id[..3].copy_from_slice(b"KEM");
    id[3..].copy_from_slice(&KEM_X25519_HKDF_SHA256.to_be_bytes());
    id
}

fn hpke_suite_id() -> [u8; 10] {
    let mut id = [0u8; 10];
    id[..4].copy_from_slice(b"HPKE");
    id[4..6].copy_from_slice(&KEM_X25519_HKDF_SHA256.to_be_bytes());
    id[6..8].copy_from_slice(&KDF_HKDF_SHA256.to_be_bytes());
    id[8..].copy_from_slice(&AEAD_AES_128_GCM.to_be_bytes());
    id
}

/// `LabeledExtract(salt, label, ikm)` from RFC 9180 §4.
fn labeled_extract(suite_id: &[u8], salt: &[u8], label: &[u8], ikm: &[u8]) -> [u8; NH] {
    let mut labeled_ikm = Vec::with_capacity(7 + suite_id.len() + label.len() + ikm.len());
    labeled_ikm.extend_from_slice(b"HPKE-v1");
    labeled_ikm.extend_from_slice(suite_id);
    labeled_ikm.extend_from_slice(label);
    labeled_ikm.extend_from_slice(ikm);
    let (prk, _) = Hkdf::<Sha256>::extract(Some(salt), &labeled_ikm);
    prk.into()
}

/// `LabeledExpand(prk, label, info, L)` from RFC 9180 §4.
fn labeled_expand(suite_id: &[u8], prk: &[u8; NH], label: &[u8], info: &[u8], out: &mut [u8]) {
    let mut labeled_info = Vec::with_capacity(9 + suite_id.len() + label.len() + info.len());
    labeled_info.extend_from_slice(&(out.len() as u16).to_be_bytes());
    labeled_info.extend_from_slice(b"HPKE-v1");
    labeled_info.extend_from_slice(suite_id);
    labeled_info.extend_from_slice(label);
    labeled_info.extend_from_slice(info);
    Hkdf::<Sha256>::from_prk(prk)
        .expect("PRK is always hash-sized")
        .expand(&labeled_info, out)
        .expect("expand length bounded by 255 * hash len");
}

/// `ExtractAndExpand(dh, kem_context)` for DHKEM.
fn extract_and_expand(dh: &[u8], kem_context: &[u8]) -> [u8; NH] {
    let suite_id = kem_suite_id();
    let eae_prk = labeled_extract(&suite_id, b"", b"eae_prk", dh);
    let mut shared_secret = [0u8; NH];
    labeled_expand(&suite_id, &eae_prk, b"shared_secret", kem_context, &mut shared_secret);
    shared_secret
}

/// An established HPKE context: sealing/opening plus the exporter.
#[derive(Debug)]
pub struct Context {
    key: [u8; NK],
    base_nonce: [u8; NN],
    exporter_secret: [u8; NH],
    seq: u64,
}

impl Context {
    fn compute_nonce(&self) -> [u8; NN] {
        let mut nonce = self.base_nonce;
        let seq_bytes = self.seq.to_be_bytes();
        for (nonce_byte, seq_byte) in nonce[NN - 8..].iter_mut().zip(seq_bytes.iter()) {
            *nonce_byte ^= seq_byte;
        }
        nonce
    }

    /// Encrypt `plaintext`, advancing the sequence number.
    pub fn seal(&mut self, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = self.compute_nonce();
        self.seq += 1;
        let cipher = Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(&self.key));
        cipher
            .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad })
            .map_err(|_| KvError::internal("HPKE seal failed"))
    }

    /// Decrypt `ciphertext`, advancing the sequence number.
    pub fn open(&mut self, aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        let nonce = self.compute_nonce();
        self.seq += 1;
        let cipher = Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(&self.key));
        cipher
            .decrypt(Nonce::from_slice(&nonce), Payload { msg: ciphertext, aad })
            .map_err(|_| KvError::permission_denied("HPKE open failed"))
    }

    /// `Export(exporter_context, L)` from RFC 9180 §5.3.
    pub fn export(&self, exporter_context: &[u8], out: &mut [u8]) {
        labeled_expand(
            &hpke_suite_id(),
            &self.exporter_secret,
            b"sec",
            exporter_context,
            out,
        );
    }
}

/// `KeySchedule(mode_base, shared_secret, info)` with empty PSK.
fn key_schedule(shared_secret: &[u8; NH], info: &[u8]) -> Context {
    let suite_id = hpke_suite_id();
    let psk_id_hash = labeled_extract(&suite_id, b"", b"psk_id_hash", b"");
    let info_hash = labeled_extract(&suite_id, b"", b"info_hash", info);

    let mut key_schedule_context = Vec::with_capacity(1 + NH + NH);
    key_schedule_context.push(MODE_BASE);
    key_schedule_context.extend_from_slice(&psk_id_hash);
    key_schedule_context.extend_from_slice(&info_hash);

    let secret = labeled_extract(&suite_id, shared_secret, b"secret", b"");

    let mut key = [0u8; NK];
    labeled_expand(&suite_id, &secret, b"key", &key_schedule_context, &mut key);
    let mut base_nonce = [0u8; NN];
    labeled_expand(&suite_id, &secret, b"base_nonce", &key_schedule_context, &mut base_nonce);
    let mut exporter_secret = [0u8; NH];
    labeled_expand(&suite_id, &secret, b"exp", &key_schedule_context, &mut exporter_secret);

    Context {
        key,
        base_nonce,
        exporter_secret,
        seq: 0,
    }
}

/// Sender side: context plus the encapsulated key to ship.
pub struct SenderContext {
    pub context: Context,
    pub enc: [u8; NENC],
}

/// `SetupBaseS(pkR, info)`: encapsulate to `recipient_public_key`.
pub fn setup_base_sender(recipient_public_key: &[u8; 32], info: &[u8]) -> Result<SenderContext> {
    let ephemeral = StaticSecret::random_from_rng(OsRng);
    setup_base_sender_with_ephemeral(recipient_public_key, info, ephemeral)
}

/// Deterministic variant for tests: the caller supplies the ephemeral key.
pub fn setup_base_sender_with_ephemeral(
    recipient_public_key: &[u8; 32],
    info: &[u8],
    ephemeral: StaticSecret,
) -> Result<SenderContext> {
    let pk_r = PublicKey::from(*recipient_public_key);
    let enc = PublicKey::from(&ephemeral).to_bytes();
    let dh = ephemeral.diffie_hellman(&pk_r);

    let mut kem_context = [0u8; 64];
    kem_context[..32].copy_from_slice(&enc);
    kem_context[32..].copy_from_slice(recipient_public_key);
    let shared_secret = extract_and_expand(dh.as_bytes(), &kem_context);

    Ok(SenderContext {
        context: key_schedule(&shared_secret, info),
        enc,
    })
}

/// `SetupBaseR(enc, skR, info)`: decapsulate with the recipient's key.
pub fn setup_base_receiver(
    enc: &[u8; NENC],
    recipient_private_key: &[u8; 32],
    info: &[u8],
) -> Result<Context> {
    let sk_r = StaticSecret::from(*recipient_private_key);
    let pk_r = PublicKey::from(&sk_r);
    let dh = sk_r.diffie_hellman(&PublicKey::from(*enc));

    let mut kem_context = [0u8; 64];
    kem_context[..32].copy_from_slice(enc);
    kem_context[32..].copy_from_slice(pk_r.as_bytes());
    let shared_secret = extract_and_expand(dh.as_bytes(), &kem_context);

    Ok(key_schedule(&shared_secret, info))
}
