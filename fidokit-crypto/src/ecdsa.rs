//! P-256 ECDSA (ES256) signatures for attestation and assertions
//!
//! COSE algorithm identifier: -7 (ES256). ES256 uses curve P-256
//! (secp256r1), SHA-256, and DER-encoded signatures on the CTAP wire.

use crate::error::{CryptoError, Result};

use p256::ecdsa::{Signature, SigningKey, VerifyingKey, signature::Signer, signature::Verifier};
use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

/// Generate a new ES256 key pair from the supplied random source.
///
/// Returns `(private_key, public_key)`:
/// - `private_key`: 32-byte scalar, zeroed on drop
/// - `public_key`: 65-byte uncompressed SEC1 point (`0x04 || x || y`)
pub fn generate_keypair<R: RngCore + CryptoRng>(rng: &mut R) -> (Zeroizing<[u8; 32]>, Vec<u8>) {
    let signing_key = SigningKey::random(rng);
    let verifying_key = signing_key.verifying_key();

    let private_key = Zeroizing::new(signing_key.to_bytes().into());
    let public_key = verifying_key.to_encoded_point(false).as_bytes().to_vec();

    (private_key, public_key)
}

/// Sign `data` with ES256. Hashing is internal to the signing operation.
///
/// Returns a DER-encoded ECDSA signature (typically 70-72 bytes).
pub fn sign(private_key: &[u8; 32], data: &[u8]) -> Result<Vec<u8>> {
    let signing_key =
        SigningKey::from_bytes(private_key.into()).map_err(|_| CryptoError::InvalidPrivateKey)?;

    let signature: Signature = signing_key.sign(data);
    Ok(signature.to_der().to_bytes().to_vec())
}

/// Verify a DER-encoded ES256 signature against `data`.
///
/// `public_key` is a 65-byte uncompressed SEC1 point.
pub fn verify(public_key: &[u8], data: &[u8], signature: &[u8]) -> Result<()> {
    let verifying_key =
        VerifyingKey::from_sec1_bytes(public_key).map_err(|_| CryptoError::InvalidPublicKey)?;
    let sig = Signature::from_der(signature).map_err(|_| CryptoError::InvalidSignature)?;

    verifying_key
        .verify(data, &sig)
        .map_err(|_| CryptoError::InvalidSignature)
}

/// Derive the public key for an existing private scalar.
pub fn public_from_private(private_key: &[u8; 32]) -> Result<Vec<u8>> {
    let signing_key =
        SigningKey::from_bytes(private_key.into()).map_err(|_| CryptoError::InvalidPrivateKey)?;
    Ok(signing_key
        .verifying_key()
        .to_encoded_point(false)
        .as_bytes()
        .to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn keypair_shape() {
        let (private_key, public_key) = generate_keypair(&mut OsRng);

        assert_eq!(private_key.len(), 32);
        assert_ne!(*private_key, [0u8; 32]);
        assert_eq!(public_key.len(), 65);
        assert_eq!(public_key[0], 0x04);
    }

    #[test]
    fn sign_and_verify() {
        let (private_key, public_key) = generate_keypair(&mut OsRng);
        let message = b"authData || clientDataHash";

        let signature = sign(&private_key, message).unwrap();
        assert!((68..=72).contains(&signature.len()));
        assert!(verify(&public_key, message, &signature).is_ok());
    }

    #[test]
    fn verify_rejects_wrong_message() {
        let (private_key, public_key) = generate_keypair(&mut OsRng);
        let signature = sign(&private_key, b"signed").unwrap();
        assert!(verify(&public_key, b"not signed", &signature).is_err());
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let (private_key, _) = generate_keypair(&mut OsRng);
        let (_, other_public) = generate_keypair(&mut OsRng);
        let signature = sign(&private_key, b"signed").unwrap();
        assert!(verify(&other_public, b"signed", &signature).is_err());
    }

    #[test]
    fn verify_rejects_garbage_signature() {
        let (_, public_key) = generate_keypair(&mut OsRng);
        assert!(verify(&public_key, b"signed", &[0u8; 72]).is_err());
    }

    #[test]
    fn public_key_derivation_is_deterministic() {
        let (private_key, expected) = generate_keypair(&mut OsRng);
        assert_eq!(public_from_private(&private_key).unwrap(), expected);
    }

    #[test]
    fn zero_scalar_is_rejected() {
        assert!(sign(&[0u8; 32], b"test").is_err());
        assert!(public_from_private(&[0u8; 32]).is_err());
    }
}
