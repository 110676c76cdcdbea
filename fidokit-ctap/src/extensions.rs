//! CTAP extension processing
//!
//! Two extensions are supported end to end:
//!
//! - **credProtect**: a per-credential visibility policy recorded at
//!   creation and enforced by both the excludeList walk and assertion
//!   candidate filtering.
//! - **hmac-secret**: at creation, two independent 32-byte seeds are stored
//!   with the credential; at assertion time the platform sends encrypted
//!   salts, and the authenticator answers with HMACs over the seed matching
//!   the achieved UV state.
//!
//! Unknown extensions in a request are ignored, never errors.

use crate::attestation::parse_ec2_public_key;
use crate::cbor::Value;
use crate::status::Result;
use crate::types::CredentialPolicy;

use fidokit_crypto::{ecdh::KeyAgreementKey, hmac_sha256, pin_protocol};
use rand::{CryptoRng, RngCore};

/// Extension identifiers as they appear on the wire.
pub mod ext_ids {
    pub const CRED_PROTECT: &str = "credProtect";
    pub const HMAC_SECRET: &str = "hmac-secret";
}

/// Parsed extension inputs of a MakeCredential request.
#[derive(Debug, Clone, Default)]
pub struct MakeCredentialExtensions {
    /// Requested credential protection policy
    pub cred_protect: Option<CredentialPolicy>,

    /// `hmac-secret: true` asks for seed creation
    pub hmac_secret: Option<bool>,
}

impl MakeCredentialExtensions {
    /// Parse the request's extensions map. Unknown entries and
    /// wrongly-typed values are skipped.
    pub fn from_value(value: &Value) -> Result<Self> {
        let mut exts = Self::default();

        let Value::Map(map) = value else {
            return Ok(exts);
        };

        for (key, val) in map {
            let Value::Text(name) = key else { continue };
            match (name.as_str(), val) {
                (ext_ids::CRED_PROTECT, Value::Integer(policy)) => {
                    exts.cred_protect = u8::try_from(*policy)
                        .ok()
                        .and_then(CredentialPolicy::from_u8);
                }
                (ext_ids::HMAC_SECRET, Value::Bool(create)) => {
                    exts.hmac_secret = Some(*create);
                }
                _ => {}
            }
        }

        Ok(exts)
    }
}

/// Parsed extension inputs of a GetAssertion request.
#[derive(Debug, Clone, Default)]
pub struct GetAssertionExtensions {
    pub hmac_secret: Option<HmacSecretInput>,
}

/// hmac-secret assertion input: the platform's ephemeral key, encrypted
/// salt(s), and the MAC over them.
#[derive(Debug, Clone)]
pub struct HmacSecretInput {
    /// Platform public key, uncompressed SEC1
    pub key_agreement: Vec<u8>,
    /// One or two encrypted 32-byte salts
    pub salt_enc: Vec<u8>,
    /// MAC over `salt_enc`
    pub salt_auth: Vec<u8>,
    /// PIN protocol governing the salt encryption (defaults to 1)
    pub pin_uv_auth_protocol: u8,
}

impl GetAssertionExtensions {
    pub fn from_value(value: &Value) -> Result<Self> {
        let mut exts = Self::default();

        let Value::Map(map) = value else {
            return Ok(exts);
        };

        for (key, val) in map {
            let Value::Text(name) = key else { continue };
            if name == ext_ids::HMAC_SECRET {
                exts.hmac_secret = parse_hmac_secret_input(val);
            }
        }

        Ok(exts)
    }
}

/// hmac-secret input map: 1 = keyAgreement (COSE_Key), 2 = saltEnc,
/// 3 = saltAuth, 4 = pinUvAuthProtocol.
fn parse_hmac_secret_input(value: &Value) -> Option<HmacSecretInput> {
    let Value::Map(map) = value else { return None };

    let mut key_agreement = None;
    let mut salt_enc = None;
    let mut salt_auth = None;
    let mut protocol = 1u8;

    for (key, val) in map {
        let Value::Integer(key) = key else { continue };
        match (*key, val) {
            (1, cose_key) => key_agreement = parse_ec2_public_key(cose_key).ok(),
            (2, Value::Bytes(bytes)) => salt_enc = Some(bytes.clone()),
            (3, Value::Bytes(bytes)) => salt_auth = Some(bytes.clone()),
            (4, Value::Integer(version)) => {
                protocol = u8::try_from(*version).ok()?;
            }
            _ => {}
        }
    }

    Some(HmacSecretInput {
        key_agreement: key_agreement?,
        salt_enc: salt_enc?,
        salt_auth: salt_auth?,
        pin_uv_auth_protocol: protocol,
    })
}

/// Compute the encrypted hmac-secret assertion output.
///
/// `key_agreement` is the authenticator-side ephemeral key established via
/// ClientPin getKeyAgreement; `cred_random` is the stored 32-byte seed for
/// the achieved UV state. Returns `None` when the input does not verify —
/// the extension output is then simply omitted from the response.
pub fn compute_hmac_secret<R: RngCore + CryptoRng>(
    input: &HmacSecretInput,
    cred_random: &[u8],
    key_agreement: &KeyAgreementKey,
    rng: &mut R,
) -> Option<Vec<u8>> {
    if cred_random.len() != 32 {
        return None;
    }

    let shared_secret = key_agreement.shared_secret(&input.key_agreement).ok()?;

    let (enc_key, salt_auth_ok) = match input.pin_uv_auth_protocol {
        1 => {
            let (enc, hmac) = pin_protocol::v1::derive_keys(&shared_secret);
            let ok = pin_protocol::v1::verify(&hmac, &input.salt_enc, &input.salt_auth);
            (enc, ok)
        }
        2 => {
            let enc = pin_protocol::v2::derive_encryption_key(&shared_secret);
            let hmac = pin_protocol::v2::derive_hmac_key(&shared_secret);
            let ok = pin_protocol::v2::verify(&hmac, &input.salt_enc, &input.salt_auth);
            (enc, ok)
        }
        _ => return None,
    };
    if !salt_auth_ok {
        return None;
    }

    let salts = match input.pin_uv_auth_protocol {
        1 => pin_protocol::v1::decrypt(&enc_key, &input.salt_enc).ok()?,
        _ => pin_protocol::v2::decrypt(&enc_key, &input.salt_enc).ok()?,
    };
    if salts.len() != 32 && salts.len() != 64 {
        return None;
    }

    let mut output = Vec::with_capacity(salts.len());
    for salt in salts.chunks(32) {
        output.extend_from_slice(&hmac_sha256(cred_random, salt));
    }

    match input.pin_uv_auth_protocol {
        1 => pin_protocol::v1::encrypt(&enc_key, &output).ok(),
        _ => pin_protocol::v2::encrypt(&enc_key, &output, rng).ok(),
    }
}
