//! PIN/UV auth tokens
//!
//! A token is a per-protocol-version shared secret the platform obtains via
//! ClientPin and presents back as an HMAC over the client data hash. The
//! authenticator keeps one slot per protocol version; issuing into a slot
//! replaces whatever token was there.
//!
//! State per token: permission bitmask, optional bound RP id, and the
//! userPresent/userVerified flags the MakeCredential and GetAssertion
//! handlers consume and clear.

use crate::status::{Result, StatusCode};

use fidokit_crypto::pin_protocol;
use zeroize::Zeroizing;

/// Token permission bits.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// authenticatorMakeCredential
    MakeCredential = 0x01,
    /// authenticatorGetAssertion
    GetAssertion = 0x02,
    /// authenticatorCredentialManagement
    CredentialManagement = 0x04,
    /// authenticatorBioEnrollment
    BioEnrollment = 0x08,
    /// Large blob writes
    LargeBlobWrite = 0x10,
    /// authenticatorConfig
    AuthenticatorConfig = 0x20,
}

impl Permission {
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// PIN/UV auth protocol version. Determines MAC width: V1 truncates
/// HMAC-SHA-256 to 16 bytes, V2 uses all 32.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinUvAuthProtocol {
    V1,
    V2,
}

impl PinUvAuthProtocol {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::V1),
            2 => Some(Self::V2),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }
}

/// One PIN/UV auth token slot.
pub struct PinUvAuthToken {
    protocol: PinUvAuthProtocol,
    key: Zeroizing<[u8; 32]>,
    permissions: u8,
    rp_id: Option<String>,
    user_present: bool,
    user_verified: bool,
    in_use: bool,
}

impl PinUvAuthToken {
    /// A fresh, inactive slot. The key is all zeroes until the first issue.
    pub fn new(protocol: PinUvAuthProtocol) -> Self {
        Self {
            protocol,
            key: Zeroizing::new([0u8; 32]),
            permissions: 0,
            rp_id: None,
            user_present: false,
            user_verified: false,
            in_use: false,
        }
    }

    pub fn protocol(&self) -> PinUvAuthProtocol {
        self.protocol
    }

    /// Activate the slot with a fresh key and grant state. Issuance follows
    /// PIN verification, so the token starts `user_verified`, and a
    /// verified token is `user_present` as well.
    pub fn issue(&mut self, key: [u8; 32], permissions: u8, rp_id: Option<String>) {
        self.key = Zeroizing::new(key);
        self.permissions = permissions;
        self.rp_id = rp_id;
        self.user_verified = true;
        self.set_user_present();
        self.in_use = true;
    }

    /// Deactivate the slot and zero its key.
    pub fn invalidate(&mut self) {
        self.key = Zeroizing::new([0u8; 32]);
        self.permissions = 0;
        self.rp_id = None;
        self.user_present = false;
        self.user_verified = false;
        self.in_use = false;
    }

    pub fn is_in_use(&self) -> bool {
        self.in_use
    }

    /// Constant-time MAC check of `mac` over `client_data_hash` under the
    /// slot key. An inactive slot verifies nothing.
    pub fn verify_token(&self, client_data_hash: &[u8], mac: &[u8]) -> bool {
        if !self.in_use {
            return false;
        }
        match self.protocol {
            PinUvAuthProtocol::V1 => pin_protocol::v1::verify(&self.key, client_data_hash, mac),
            PinUvAuthProtocol::V2 => pin_protocol::v2::verify(&self.key, client_data_hash, mac),
        }
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions & permission.to_u8() != 0
    }

    pub fn rp_id(&self) -> Option<&str> {
        self.rp_id.as_deref()
    }

    /// Bind the token to an RP on first use. Fails once bound to a
    /// different RP.
    pub fn set_rp_id(&mut self, rp_id: &str) -> Result<()> {
        match &self.rp_id {
            Some(bound) if bound != rp_id => Err(StatusCode::PinAuthInvalid),
            _ => {
                self.rp_id = Some(rp_id.to_string());
                Ok(())
            }
        }
    }

    pub fn user_present(&self) -> bool {
        self.user_present
    }

    pub fn user_verified(&self) -> bool {
        self.user_verified
    }

    /// Record a satisfied user-presence test against this token.
    pub fn set_user_present(&mut self) {
        self.user_present = true;
    }

    pub fn clear_user_present(&mut self) {
        self.user_present = false;
    }

    pub fn clear_user_verified(&mut self) {
        self.user_verified = false;
    }

    /// Drop every permission except `lbw`. The RP binding goes with the
    /// permissions unless `lbw` survives (CTAP 6.5.5.7).
    pub fn clear_permissions_except_lbw(&mut self) {
        self.permissions &= Permission::LargeBlobWrite.to_u8();
        if self.permissions & Permission::LargeBlobWrite.to_u8() == 0 {
            self.rp_id = None;
        }
    }
}
