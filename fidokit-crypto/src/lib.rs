//! Cryptographic primitives for the fidokit CTAP2 authenticator core.
//!
//! Everything the protocol layer needs and nothing protocol-specific:
//!
//! - **ECDSA**: ES256 (P-256 + SHA-256) key generation and signing for
//!   attestation and assertions
//! - **ECDH**: P-256 key agreement for the PIN protocol and hmac-secret
//! - **PIN protocols**: MAC computation/verification and AES-256-CBC
//!   transport encryption for protocol versions 1 and 2

pub mod ecdh;
pub mod ecdsa;
pub mod error;
pub mod pin_protocol;

pub use error::{CryptoError, Result};

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

/// SHA-256 digest of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Full HMAC-SHA-256 of `data` under `key`.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key size");
    mac.update(data);
    mac.finalize().into_bytes().into()
}
