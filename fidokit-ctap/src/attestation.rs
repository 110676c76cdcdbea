//! Authenticator data and attestation assembly
//!
//! Binary layout (no padding):
//!
//! ```text
//! offset  size  field
//! 0       32    rpIdHash (SHA-256 of the RP id)
//! 32      1     flags: bit0=up bit2=uv bit6=at bit7=ed
//! 33      4     signCount (big-endian u32)
//! 37      16    AAGUID                        (if at)
//! 53      2     credentialIdLength (BE u16)   (if at)
//! 55      L     credentialId                  (if at)
//! 55+L    *     COSE public key (CBOR map)    (if at)
//! ...     *     extensions (CBOR map)         (if ed)
//! ```
//!
//! The `ed` bit is set iff the extensions map is non-empty, and the RFU
//! bits are zero.

use crate::cbor::{self, MapBuilder, Value};
use crate::status::{Result, StatusCode};

use fidokit_crypto::sha256;

const FLAG_UP: u8 = 0x01;
const FLAG_UV: u8 = 0x04;
const FLAG_AT: u8 = 0x40;
const FLAG_ED: u8 = 0x80;

/// Attestation statement variants the authenticator can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttestationType {
    /// "packed" with an empty statement
    #[default]
    None,
    /// "packed" self-attestation: signed with the credential key itself
    SelfAttestation,
}

/// The attestedCredentialData block of authenticator data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestedCredentialData {
    pub aaguid: [u8; 16],
    pub credential_id: Vec<u8>,
    /// CBOR-encoded COSE public key
    pub public_key: Vec<u8>,
}

/// Typed authenticator data, convertible to and from the wire layout
/// byte-for-byte.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; 32],
    pub user_present: bool,
    pub user_verified: bool,
    pub sign_count: u32,
    pub attested_credential: Option<AttestedCredentialData>,
    /// Extension outputs; `None` when empty so the `ed` bit tracks presence
    pub extensions: Option<Value>,
}

impl AuthenticatorData {
    /// Start from an RP id: hashes it, everything else cleared.
    pub fn for_rp_id(rp_id: &str) -> Self {
        Self {
            rp_id_hash: sha256(rp_id.as_bytes()),
            user_present: false,
            user_verified: false,
            sign_count: 0,
            attested_credential: None,
            extensions: None,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(128);
        out.extend_from_slice(&self.rp_id_hash);

        let mut flags = 0u8;
        if self.user_present {
            flags |= FLAG_UP;
        }
        if self.user_verified {
            flags |= FLAG_UV;
        }
        if self.attested_credential.is_some() {
            flags |= FLAG_AT;
        }
        if self.extensions.is_some() {
            flags |= FLAG_ED;
        }
        out.push(flags);

        out.extend_from_slice(&self.sign_count.to_be_bytes());

        if let Some(cred) = &self.attested_credential {
            if cred.credential_id.len() > u16::MAX as usize {
                return Err(StatusCode::InvalidLength);
            }
            out.extend_from_slice(&cred.aaguid);
            out.extend_from_slice(&(cred.credential_id.len() as u16).to_be_bytes());
            out.extend_from_slice(&cred.credential_id);
            out.extend_from_slice(&cred.public_key);
        }

        if let Some(extensions) = &self.extensions {
            out.extend_from_slice(&cbor::encode(extensions)?);
        }

        Ok(out)
    }

    /// Parse the wire layout. The input must be exactly one authenticator
    /// data block; trailing bytes or RFU flag bits are rejected.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 37 {
            return Err(StatusCode::InvalidLength);
        }

        let mut rp_id_hash = [0u8; 32];
        rp_id_hash.copy_from_slice(&data[..32]);

        let flags = data[32];
        if flags & !(FLAG_UP | FLAG_UV | FLAG_AT | FLAG_ED) != 0 {
            return Err(StatusCode::InvalidParameter);
        }

        let sign_count = u32::from_be_bytes(
            data[33..37].try_into().expect("4-byte slice"),
        );

        let mut offset = 37;
        let attested_credential = if flags & FLAG_AT != 0 {
            if data.len() < offset + 18 {
                return Err(StatusCode::InvalidLength);
            }
            let mut aaguid = [0u8; 16];
            aaguid.copy_from_slice(&data[offset..offset + 16]);
            offset += 16;

            let id_len = u16::from_be_bytes(
                data[offset..offset + 2].try_into().expect("2-byte slice"),
            ) as usize;
            offset += 2;

            if data.len() < offset + id_len {
                return Err(StatusCode::InvalidLength);
            }
            let credential_id = data[offset..offset + id_len].to_vec();
            offset += id_len;

            let key_len = cbor_item_len(&data[offset..])?;
            if data.len() < offset + key_len {
                return Err(StatusCode::InvalidLength);
            }
            let public_key = data[offset..offset + key_len].to_vec();
            offset += key_len;

            Some(AttestedCredentialData {
                aaguid,
                credential_id,
                public_key,
            })
        } else {
            None
        };

        let extensions = if flags & FLAG_ED != 0 {
            let ext_len = cbor_item_len(&data[offset..])?;
            if data.len() < offset + ext_len {
                return Err(StatusCode::InvalidLength);
            }
            let extensions: Value = cbor::decode(&data[offset..offset + ext_len])?;
            offset += ext_len;
            Some(extensions)
        } else {
            None
        };

        if offset != data.len() {
            return Err(StatusCode::InvalidLength);
        }

        Ok(Self {
            rp_id_hash,
            user_present: flags & FLAG_UP != 0,
            user_verified: flags & FLAG_UV != 0,
            sign_count,
            attested_credential,
            extensions,
        })
    }
}

/// Encoded length of the single definite-length CBOR item at the front of
/// `data`. CTAP forbids indefinite-length items.
fn cbor_item_len(data: &[u8]) -> Result<usize> {
    let first = *data.first().ok_or(StatusCode::InvalidCbor)?;
    let major = first >> 5;
    let info = first & 0x1F;

    let (head, arg): (usize, u64) = match info {
        0..=23 => (1, info as u64),
        24 => (2, *data.get(1).ok_or(StatusCode::InvalidCbor)? as u64),
        25 => {
            let bytes = data.get(1..3).ok_or(StatusCode::InvalidCbor)?;
            (3, u16::from_be_bytes(bytes.try_into().expect("2 bytes")) as u64)
        }
        26 => {
            let bytes = data.get(1..5).ok_or(StatusCode::InvalidCbor)?;
            (5, u32::from_be_bytes(bytes.try_into().expect("4 bytes")) as u64)
        }
        27 => {
            let bytes = data.get(1..9).ok_or(StatusCode::InvalidCbor)?;
            (9, u64::from_be_bytes(bytes.try_into().expect("8 bytes")))
        }
        _ => return Err(StatusCode::InvalidCbor),
    };

    let item_count = |n: u64| usize::try_from(n).map_err(|_| StatusCode::InvalidCbor);

    match major {
        // integers, simple values, floats: the head is the whole item
        0 | 1 | 7 => Ok(head),
        // byte and text strings: head plus payload
        2 | 3 => Ok(head + item_count(arg)?),
        // arrays and maps: head plus each member item
        4 | 5 => {
            let members = item_count(arg)? * if major == 5 { 2 } else { 1 };
            let mut offset = head;
            for _ in 0..members {
                offset += cbor_item_len(data.get(offset..).ok_or(StatusCode::InvalidCbor)?)?;
            }
            Ok(offset)
        }
        // tag: head plus the tagged item
        6 => Ok(head + cbor_item_len(data.get(head..).ok_or(StatusCode::InvalidCbor)?)?),
        _ => Err(StatusCode::InvalidCbor),
    }
}

/// COSE_Key encoding of an ES256 public key:
/// `{1: 2 (EC2), 3: alg, -1: 1 (P-256), -2: x, -3: y}`.
pub fn encode_es256_public_key(sec1_public_key: &[u8], alg: i32) -> Result<Vec<u8>> {
    if sec1_public_key.len() != 65 || sec1_public_key[0] != 0x04 {
        return Err(StatusCode::InvalidParameter);
    }

    MapBuilder::new()
        .insert(1, 2)?
        .insert(3, alg)?
        .insert(-1, 1)?
        .insert_bytes(-2, &sec1_public_key[1..33])?
        .insert_bytes(-3, &sec1_public_key[33..65])?
        .build()
}

/// Extract an EC2 COSE_Key's point as an uncompressed SEC1 encoding
/// (`0x04 || x || y`). Used for platform key-agreement keys.
pub fn parse_ec2_public_key(cose_key: &Value) -> Result<Vec<u8>> {
    let Value::Map(map) = cose_key else {
        return Err(StatusCode::InvalidParameter);
    };

    let mut x: Option<&[u8]> = None;
    let mut y: Option<&[u8]> = None;

    for (key, value) in map {
        let Value::Integer(key) = key else { continue };
        match (*key, value) {
            (-2, Value::Bytes(bytes)) => x = Some(bytes.as_slice()),
            (-3, Value::Bytes(bytes)) => y = Some(bytes.as_slice()),
            _ => {}
        }
    }

    let (x, y) = (
        x.ok_or(StatusCode::InvalidParameter)?,
        y.ok_or(StatusCode::InvalidParameter)?,
    );
    if x.len() != 32 || y.len() != 32 {
        return Err(StatusCode::InvalidParameter);
    }

    let mut sec1 = Vec::with_capacity(65);
    sec1.push(0x04);
    sec1.extend_from_slice(x);
    sec1.extend_from_slice(y);
    Ok(sec1)
}

/// "packed" attestation statement for self-attestation: `{alg, sig}`.
pub fn self_attestation_statement(alg: i32, signature: &[u8]) -> Value {
    Value::Map(vec![
        (
            Value::Text("alg".to_string()),
            Value::Integer(alg as i128),
        ),
        (
            Value::Text("sig".to_string()),
            Value::Bytes(signature.to_vec()),
        ),
    ])
}

/// Empty "packed" statement used for attestation type `None`.
pub fn empty_attestation_statement() -> Value {
    Value::Map(Vec::new())
}
