//! P-256 ECDH key agreement for the CTAP PIN protocol
//!
//! The shared secret is the x-coordinate of the Diffie-Hellman result, which
//! the PIN protocols feed into their key derivation.

use crate::error::{CryptoError, Result};

use p256::{PublicKey, SecretKey, elliptic_curve::sec1::ToEncodedPoint};
use rand::{CryptoRng, RngCore};

/// Ephemeral P-256 key pair for key agreement.
pub struct KeyAgreementKey {
    secret: SecretKey,
    public: PublicKey,
}

impl KeyAgreementKey {
    /// Generate a fresh key pair from the supplied random source.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let secret = SecretKey::random(rng);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Public key as `(x, y)` coordinate pair, each 32 bytes, for COSE_Key
    /// encoding (kty: 2, alg: -25, crv: 1).
    pub fn public_coordinates(&self) -> ([u8; 32], [u8; 32]) {
        let point = self.public.to_encoded_point(false);
        let mut x = [0u8; 32];
        let mut y = [0u8; 32];
        x.copy_from_slice(point.x().expect("uncompressed point has x"));
        y.copy_from_slice(point.y().expect("uncompressed point has y"));
        (x, y)
    }

    /// Public key as a 65-byte uncompressed SEC1 point (`0x04 || x || y`).
    pub fn public_bytes(&self) -> Vec<u8> {
        self.public.to_encoded_point(false).as_bytes().to_vec()
    }

    /// Compute the shared secret with a peer public key in uncompressed SEC1
    /// form. Returns the x-coordinate of the resulting point.
    pub fn shared_secret(&self, peer_public_key: &[u8]) -> Result<[u8; 32]> {
        let peer = PublicKey::from_sec1_bytes(peer_public_key)
            .map_err(|_| CryptoError::InvalidPublicKey)?;

        let shared = p256::ecdh::diffie_hellman(self.secret.to_nonzero_scalar(), peer.as_affine());

        let mut secret = [0u8; 32];
        secret.copy_from_slice(shared.raw_secret_bytes());
        Ok(secret)
    }
}
