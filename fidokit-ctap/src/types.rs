//! CTAP wire-level data types
//!
//! Request and response structures shared by the command handlers. All of
//! them round-trip through CBOR with the field names WebAuthn mandates.

use serde::{Deserialize, Serialize};

/// Relying Party information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelyingParty {
    /// Relying party identifier (e.g. "example.com")
    pub id: String,

    /// Human-readable name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl RelyingParty {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }
}

/// User account being registered or authenticated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Opaque user handle, at most 64 bytes
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,

    /// Account name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Display name
    #[serde(
        default,
        rename = "displayName",
        skip_serializing_if = "Option::is_none"
    )]
    pub display_name: Option<String>,
}

impl User {
    pub fn new(id: Vec<u8>) -> Self {
        Self {
            id,
            name: None,
            display_name: None,
        }
    }
}

/// Credential reference in allowList/excludeList.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyCredentialDescriptor {
    /// Credential type; "public-key" is the only type CTAP2 defines
    #[serde(rename = "type")]
    pub cred_type: String,

    /// Credential id
    #[serde(with = "serde_bytes")]
    pub id: Vec<u8>,

    /// Transport hints, ignored by the authenticator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transports: Option<Vec<String>>,
}

impl PublicKeyCredentialDescriptor {
    pub fn new(id: Vec<u8>) -> Self {
        Self {
            cred_type: "public-key".to_string(),
            id,
            transports: None,
        }
    }
}

/// One acceptable credential type + algorithm pair, in platform preference
/// order within pubKeyCredParams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyCredentialParameters {
    #[serde(rename = "type")]
    pub cred_type: String,

    /// COSE algorithm identifier
    pub alg: i32,
}

impl PublicKeyCredentialParameters {
    pub fn es256() -> Self {
        Self {
            cred_type: "public-key".to_string(),
            alg: CoseAlgorithm::Es256.to_i32(),
        }
    }
}

/// COSE algorithm identifiers this codebase knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum CoseAlgorithm {
    /// ECDSA with P-256 and SHA-256
    Es256 = -7,
    /// Ed25519
    EdDsa = -8,
    /// RSASSA-PKCS1-v1_5 with SHA-256
    Rs256 = -257,
}

impl CoseAlgorithm {
    pub fn to_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            -7 => Some(Self::Es256),
            -8 => Some(Self::EdDsa),
            -257 => Some(Self::Rs256),
            _ => None,
        }
    }
}

/// Per-credential protection policy, set via the credProtect extension.
///
/// An absent policy means `UserVerificationOptional`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum CredentialPolicy {
    #[default]
    UserVerificationOptional = 0x01,
    UserVerificationOptionalWithCredentialIdList = 0x02,
    UserVerificationRequired = 0x03,
}

impl CredentialPolicy {
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::UserVerificationOptional),
            0x02 => Some(Self::UserVerificationOptionalWithCredentialIdList),
            0x03 => Some(Self::UserVerificationRequired),
            _ => None,
        }
    }

    /// Whether a credential under this policy is visible to the current
    /// request: UV-required credentials exist only for verified requests,
    /// and list-gated credentials require either an allowList mention or UV.
    pub fn visible(self, uv: bool, listed: bool) -> bool {
        match self {
            Self::UserVerificationOptional => true,
            Self::UserVerificationOptionalWithCredentialIdList => listed || uv,
            Self::UserVerificationRequired => uv,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cbor;

    #[test]
    fn user_id_encodes_as_byte_string() {
        let user = User::new(vec![1, 2, 3]);
        let bytes = cbor::encode(&user).unwrap();
        let decoded: User = cbor::decode(&bytes).unwrap();
        assert_eq!(decoded, user);
    }

    #[test]
    fn descriptor_round_trip() {
        let desc = PublicKeyCredentialDescriptor::new(vec![9u8; 32]);
        let bytes = cbor::encode(&desc).unwrap();
        let decoded: PublicKeyCredentialDescriptor = cbor::decode(&bytes).unwrap();
        assert_eq!(decoded.id, vec![9u8; 32]);
        assert_eq!(decoded.cred_type, "public-key");
    }

    #[test]
    fn cose_algorithm_values() {
        assert_eq!(CoseAlgorithm::Es256.to_i32(), -7);
        assert_eq!(CoseAlgorithm::from_i32(-7), Some(CoseAlgorithm::Es256));
        assert_eq!(CoseAlgorithm::from_i32(17), None);
    }

    #[test]
    fn policy_visibility() {
        use CredentialPolicy::*;
        assert!(UserVerificationOptional.visible(false, false));
        assert!(!UserVerificationRequired.visible(false, true));
        assert!(UserVerificationRequired.visible(true, false));
        assert!(UserVerificationOptionalWithCredentialIdList.visible(false, true));
        assert!(!UserVerificationOptionalWithCredentialIdList.visible(false, false));
    }

    #[test]
    fn policy_wire_values() {
        assert_eq!(CredentialPolicy::UserVerificationRequired.to_u8(), 0x03);
        assert_eq!(
            CredentialPolicy::from_u8(0x02),
            Some(CredentialPolicy::UserVerificationOptionalWithCredentialIdList)
        );
        assert_eq!(CredentialPolicy::from_u8(0), None);
    }
}
