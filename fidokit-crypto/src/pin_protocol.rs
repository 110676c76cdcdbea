//! PIN/UV auth protocols, versions 1 and 2
//!
//! Both versions authenticate messages with HMAC-SHA-256 under a 32-byte key
//! and move PINs/tokens under AES-256-CBC. They differ in two places:
//!
//! - **MAC width**: V1 truncates the HMAC to its first 16 bytes, V2 uses the
//!   full 32 bytes.
//! - **Encryption framing**: V1 uses a zero IV, V2 generates a random IV and
//!   prepends it to the ciphertext.
//!
//! Key derivation: V1 hashes the ECDH shared secret once and uses the result
//! for both encryption and authentication; V2 derives independent keys with
//! HKDF-SHA-256.

use crate::error::{CryptoError, Result};

use aes::Aes256;
use cbc::cipher::{
    BlockDecryptMut, BlockEncryptMut, KeyIvInit,
    block_padding::{NoPadding, Pkcs7},
};
use hmac::{Hmac, Mac};
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

fn hmac_sha256(key: &[u8; 32], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key size");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// PIN protocol version 1
pub mod v1 {
    use super::*;

    /// Compute the V1 MAC: first 16 bytes of HMAC-SHA-256.
    pub fn authenticate(key: &[u8; 32], data: &[u8]) -> [u8; 16] {
        let full = hmac_sha256(key, data);
        let mut out = [0u8; 16];
        out.copy_from_slice(&full[..16]);
        out
    }

    /// Constant-time MAC verification. `expected` must be exactly 16 bytes.
    pub fn verify(key: &[u8; 32], data: &[u8], expected: &[u8]) -> bool {
        if expected.len() != 16 {
            return false;
        }
        let computed = authenticate(key, data);
        computed.ct_eq(expected).into()
    }

    /// AES-256-CBC encryption with zero IV and PKCS#7 padding.
    pub fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
        let iv = [0u8; 16];
        let cipher = Aes256CbcEnc::new(key.into(), &iv.into());
        Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
    }

    /// AES-256-CBC decryption with zero IV, PKCS#7 padding removed.
    pub fn decrypt(key: &[u8; 32], ciphertext: &[u8]) -> Result<Vec<u8>> {
        let iv = [0u8; 16];
        let cipher = Aes256CbcDec::new(key.into(), &iv.into());
        cipher
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)
    }

    /// Derive `(encryption_key, hmac_key)` from the ECDH shared secret.
    /// V1 uses SHA-256 of the secret for both.
    pub fn derive_keys(shared_secret: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
        let key: [u8; 32] = Sha256::digest(shared_secret).into();
        (key, key)
    }
}

/// PIN protocol version 2
pub mod v2 {
    use super::*;
    use hkdf::Hkdf;

    /// Compute the V2 MAC: the full 32-byte HMAC-SHA-256.
    pub fn authenticate(key: &[u8; 32], data: &[u8]) -> [u8; 32] {
        hmac_sha256(key, data)
    }

    /// Constant-time MAC verification. `expected` must be exactly 32 bytes.
    pub fn verify(key: &[u8; 32], data: &[u8], expected: &[u8]) -> bool {
        if expected.len() != 32 {
            return false;
        }
        let computed = authenticate(key, data);
        computed.ct_eq(expected).into()
    }

    /// AES-256-CBC encryption with a random IV prepended to the ciphertext.
    ///
    /// Plaintext length must be a multiple of the block size; V2 carries no
    /// padding.
    pub fn encrypt<R: RngCore + CryptoRng>(
        key: &[u8; 32],
        plaintext: &[u8],
        rng: &mut R,
    ) -> Result<Vec<u8>> {
        if plaintext.is_empty() || plaintext.len() % 16 != 0 {
            return Err(CryptoError::EncryptionFailed);
        }

        let mut iv = [0u8; 16];
        rng.fill_bytes(&mut iv);

        let cipher = Aes256CbcEnc::new(key.into(), &iv.into());
        let ciphertext = cipher.encrypt_padded_vec_mut::<NoPadding>(plaintext);

        let mut out = Vec::with_capacity(16 + ciphertext.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// AES-256-CBC decryption of IV-prepended ciphertext.
    pub fn decrypt(key: &[u8; 32], ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < 32 || (ciphertext.len() - 16) % 16 != 0 {
            return Err(CryptoError::DecryptionFailed);
        }

        let (iv, body) = ciphertext.split_at(16);
        let iv: [u8; 16] = iv.try_into().expect("split at 16");

        let cipher = Aes256CbcDec::new(key.into(), &iv.into());
        cipher
            .decrypt_padded_vec_mut::<NoPadding>(body)
            .map_err(|_| CryptoError::DecryptionFailed)
    }

    /// HKDF-SHA-256 HMAC key: salt = 32 zero bytes, info = "CTAP2 HMAC key".
    pub fn derive_hmac_key(shared_secret: &[u8; 32]) -> [u8; 32] {
        hkdf_expand(shared_secret, b"CTAP2 HMAC key")
    }

    /// HKDF-SHA-256 AES key: salt = 32 zero bytes, info = "CTAP2 AES key".
    pub fn derive_encryption_key(shared_secret: &[u8; 32]) -> [u8; 32] {
        hkdf_expand(shared_secret, b"CTAP2 AES key")
    }

    fn hkdf_expand(shared_secret: &[u8; 32], info: &[u8]) -> [u8; 32] {
        let salt = [0u8; 32];
        let hkdf = Hkdf::<Sha256>::new(Some(&salt), shared_secret);
        let mut key = [0u8; 32];
        hkdf.expand(info, &mut key)
            .expect("32 bytes is a valid HKDF-SHA-256 output length");
        key
    }
}
