//! KeyHouse Oblivious HTTP Stack
//!
//! The three protocol layers that sit between the network and the JSON
//! query handler:
//!
//! - [`hpke`]: Hybrid Public Key Encryption (RFC 9180), base mode, pinned
//!   to the one suite the service speaks: DHKEM(X25519, HKDF-SHA256),
//!   HKDF-SHA256, AES-128-GCM.
//! - [`bhttp`]: Binary HTTP messages (RFC 9292), known-length form.
//! - [`ohttp`]: Oblivious HTTP encapsulation (RFC 9458). The gateway side
//!   keeps the HPKE request context alive from decapsulation through
//!   response encapsulation; the client side mirrors it.
//! - [`keys`]: the private-key seam. Production keys come from an external
//!   key fetcher implementing [`keys::KeyProvider`]; a static provider
//!   carries the published test key (`key_id = 64`) for protocol tests.

pub mod bhttp;
pub mod hpke;
pub mod keys;
pub mod ohttp;

pub use bhttp::{BinaryHttpRequest, BinaryHttpResponse};
pub use keys::{KeyProvider, StaticKeyProvider, TEST_KEY_ID, TEST_PRIVATE_KEY, TEST_PUBLIC_KEY};
pub use ohttp::{ClientContext, ServerContext, OHTTP_RESPONSE_CONTENT_TYPE};
