//! Authenticator state
//!
//! [`Authenticator`] owns everything that outlives a single request: the
//! capability configuration, the two PIN/UV auth token slots, the PIN retry
//! counter, the per-protocol key-agreement keys, and the continuation state
//! GetAssertion leaves behind for GetNextAssertion. Command handlers borrow
//! it mutably for the duration of one request; the transport serializes
//! requests, so there is never more than one in flight.

use crate::callbacks::{AuthenticatorCallbacks, CallbackRng};
use crate::pin_token::{PinUvAuthProtocol, PinUvAuthToken};
use crate::status::{Result, StatusCode};
use crate::store::CREDENTIAL_ID_LEN;
use crate::types::CoseAlgorithm;
use crate::attestation::AttestationType;

use std::collections::BTreeMap;
use std::sync::Arc;

use fidokit_crypto::{ecdh::KeyAgreementKey, sha256};
use subtle::ConstantTimeEq;

/// PIN retries granted after a successful verification.
const MAX_PIN_RETRIES: u8 = 8;

/// How long a GetAssertion continuation stays consumable, in milliseconds.
const ASSERTION_STATE_LIFETIME_MS: u64 = 30_000;

/// Boolean capability flags, read by every request.
#[derive(Debug, Clone)]
pub struct AuthenticatorOptions {
    /// Discoverable-credential storage available
    pub rk: bool,

    /// Built-in user verification method available; `None` means the
    /// authenticator has no such method at all
    pub uv: Option<bool>,

    /// Client PIN feature: `None` = unsupported, `Some(set)` = supported
    /// with a PIN currently set or not
    pub client_pin: Option<bool>,

    /// Every credential operation must be UV-verified
    pub always_uv: bool,

    /// UV not required for non-discoverable credential creation
    pub make_cred_uv_not_rqd: bool,

    /// With a client PIN set, MC/GA permissions cannot be obtained;
    /// surfaces `operation_denied` where the spec allows the choice
    pub no_mc_ga_permissions_with_client_pin: bool,

    /// PIN/UV auth token feature
    pub pin_uv_auth_token: bool,
}

impl AuthenticatorOptions {
    pub fn new() -> Self {
        Self {
            rk: true,
            uv: None,
            client_pin: Some(false),
            always_uv: false,
            make_cred_uv_not_rqd: true,
            no_mc_ga_permissions_with_client_pin: false,
            pin_uv_auth_token: true,
        }
    }

    pub fn with_rk(mut self, rk: bool) -> Self {
        self.rk = rk;
        self
    }

    pub fn with_uv(mut self, uv: Option<bool>) -> Self {
        self.uv = uv;
        self
    }

    pub fn with_always_uv(mut self, always_uv: bool) -> Self {
        self.always_uv = always_uv;
        self
    }

    pub fn with_make_cred_uv_not_rqd(mut self, value: bool) -> Self {
        self.make_cred_uv_not_rqd = value;
        self
    }
}

impl Default for AuthenticatorOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Static configuration of an authenticator instance.
#[derive(Debug, Clone)]
pub struct AuthenticatorConfig {
    /// Authenticator model identifier (16 bytes)
    pub aaguid: [u8; 16],

    /// Supported COSE algorithms, most preferred first
    pub algorithms: Vec<i32>,

    /// Supported extension identifiers
    pub extensions: Vec<String>,

    /// Capability flags
    pub options: AuthenticatorOptions,

    /// Attestation statement variant produced by MakeCredential
    pub attestation: AttestationType,

    /// Supported PIN/UV auth protocol versions
    pub pin_uv_auth_protocols: Vec<u8>,

    /// Advertised maximum message size
    pub max_msg_size: usize,
}

impl AuthenticatorConfig {
    pub fn new() -> Self {
        Self {
            aaguid: [0u8; 16],
            algorithms: vec![CoseAlgorithm::Es256.to_i32()],
            extensions: vec![
                "credProtect".to_string(),
                "hmac-secret".to_string(),
            ],
            options: AuthenticatorOptions::new(),
            attestation: AttestationType::None,
            pin_uv_auth_protocols: vec![2, 1],
            max_msg_size: 7609,
        }
    }

    pub fn with_aaguid(mut self, aaguid: [u8; 16]) -> Self {
        self.aaguid = aaguid;
        self
    }

    pub fn with_algorithms(mut self, algorithms: Vec<i32>) -> Self {
        self.algorithms = algorithms;
        self
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn with_options(mut self, options: AuthenticatorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_attestation(mut self, attestation: AttestationType) -> Self {
        self.attestation = attestation;
        self
    }

    /// Whether `name` appears in the supported extension set.
    pub fn supports_extension(&self, name: &str) -> bool {
        self.extensions.iter().any(|ext| ext == name)
    }
}

impl Default for AuthenticatorConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Continuation primed by GetAssertion when several credentials match.
pub struct AssertionState {
    /// Credential ids not yet returned, next-up last
    pub remaining: Vec<[u8; CREDENTIAL_ID_LEN]>,
    pub rp_id: String,
    pub client_data_hash: Vec<u8>,
    /// UP/UV flags of the originating assertion; carried into follow-ups
    pub user_present: bool,
    pub user_verified: bool,
    started_at: u64,
}

impl AssertionState {
    pub fn new(
        remaining: Vec<[u8; CREDENTIAL_ID_LEN]>,
        rp_id: String,
        client_data_hash: Vec<u8>,
        user_present: bool,
        user_verified: bool,
        now: u64,
    ) -> Self {
        Self {
            remaining,
            rp_id,
            client_data_hash,
            user_present,
            user_verified,
            started_at: now,
        }
    }

    pub fn is_fresh(&self, now: u64) -> bool {
        now.saturating_sub(self.started_at) < ASSERTION_STATE_LIFETIME_MS
    }
}

/// The authenticator singleton (spec-wise; one per logical device).
pub struct Authenticator<C: AuthenticatorCallbacks> {
    config: AuthenticatorConfig,
    callbacks: Arc<C>,
    pin_retries: u8,
    token_v1: PinUvAuthToken,
    token_v2: PinUvAuthToken,
    key_agreement_keys: BTreeMap<u8, KeyAgreementKey>,
    assertion_state: Option<AssertionState>,
}

impl<C: AuthenticatorCallbacks> Authenticator<C> {
    pub fn new(config: AuthenticatorConfig, callbacks: C) -> Self {
        Self {
            config,
            callbacks: Arc::new(callbacks),
            pin_retries: MAX_PIN_RETRIES,
            token_v1: PinUvAuthToken::new(PinUvAuthProtocol::V1),
            token_v2: PinUvAuthToken::new(PinUvAuthProtocol::V2),
            key_agreement_keys: BTreeMap::new(),
            assertion_state: None,
        }
    }

    pub fn config(&self) -> &AuthenticatorConfig {
        &self.config
    }

    pub fn callbacks(&self) -> &C {
        &self.callbacks
    }

    /// The environment clock.
    pub fn now(&self) -> u64 {
        self.callbacks.millis()
    }

    /// The environment random source as an [`rand::RngCore`].
    pub fn rng(&self) -> CallbackRng<'_, C> {
        CallbackRng(self.callbacks.as_ref())
    }

    // ---- PIN state -------------------------------------------------------

    /// Whether a client PIN is currently set.
    pub fn is_pin_set(&self) -> bool {
        matches!(self.callbacks.load_pin_hash(), Ok(Some(_)))
    }

    /// The stored PIN hash, for ClientPin verification.
    pub fn pin_hash(&self) -> Result<Option<[u8; 32]>> {
        self.callbacks.load_pin_hash()
    }

    /// Whether the authenticator is protected by some form of user
    /// verification: a built-in method or a set PIN.
    pub fn is_protected(&self) -> bool {
        self.config.options.uv == Some(true) || self.is_pin_set()
    }

    /// Whether the PIN/UV auth token feature is usable at all.
    pub fn supports_pin_uv_auth_token(&self) -> bool {
        self.config.options.pin_uv_auth_token && !self.config.pin_uv_auth_protocols.is_empty()
    }

    pub fn pin_retries(&self) -> u8 {
        self.pin_retries
    }

    pub fn is_pin_blocked(&self) -> bool {
        self.pin_retries == 0
    }

    /// Set or replace the PIN. Length bounds are byte-wise: 4..=63.
    pub fn set_pin(&mut self, pin: &str) -> Result<()> {
        let len = pin.len();
        if !(4..=63).contains(&len) {
            return Err(StatusCode::PinPolicyViolation);
        }

        let hash = sha256(pin.as_bytes());
        self.callbacks.store_pin_hash(Some(&hash))?;
        self.pin_retries = MAX_PIN_RETRIES;
        // tokens minted under the previous PIN die with it
        self.token_v1.invalidate();
        self.token_v2.invalidate();
        Ok(())
    }

    /// Verify the left half of the PIN hash as ClientPin transports it.
    /// Failure burns a retry; the counter refills on success.
    pub fn verify_pin_hash_prefix(&mut self, prefix: &[u8]) -> Result<()> {
        let stored = self.pin_hash()?.ok_or(StatusCode::PinNotSet)?;
        if self.is_pin_blocked() {
            return Err(StatusCode::PinBlocked);
        }
        if prefix.len() < 16 {
            return Err(StatusCode::PinAuthInvalid);
        }

        if bool::from(stored[..16].ct_eq(&prefix[..16])) {
            self.pin_retries = MAX_PIN_RETRIES;
            Ok(())
        } else {
            self.pin_retries -= 1;
            // a wrong guess invalidates every outstanding token
            self.token_v1.invalidate();
            self.token_v2.invalidate();
            if self.is_pin_blocked() {
                Err(StatusCode::PinBlocked)
            } else {
                Err(StatusCode::PinInvalid)
            }
        }
    }

    // ---- PIN/UV auth tokens ---------------------------------------------

    pub fn token(&self, protocol: PinUvAuthProtocol) -> &PinUvAuthToken {
        match protocol {
            PinUvAuthProtocol::V1 => &self.token_v1,
            PinUvAuthProtocol::V2 => &self.token_v2,
        }
    }

    pub fn token_mut(&mut self, protocol: PinUvAuthProtocol) -> &mut PinUvAuthToken {
        match protocol {
            PinUvAuthProtocol::V1 => &mut self.token_v1,
            PinUvAuthProtocol::V2 => &mut self.token_v2,
        }
    }

    /// Issue a fresh token into the protocol's slot and return the key the
    /// platform will MAC with.
    pub fn issue_pin_uv_auth_token(
        &mut self,
        protocol: PinUvAuthProtocol,
        permissions: u8,
        rp_id: Option<String>,
    ) -> [u8; 32] {
        let mut key = [0u8; 32];
        self.callbacks.fill_random(&mut key);
        self.token_mut(protocol).issue(key, permissions, rp_id);
        key
    }

    // ---- ClientPin key agreement ----------------------------------------

    pub fn set_key_agreement_key(&mut self, protocol: u8, key: KeyAgreementKey) {
        self.key_agreement_keys.insert(protocol, key);
    }

    pub fn key_agreement_key(&self, protocol: u8) -> Option<&KeyAgreementKey> {
        self.key_agreement_keys.get(&protocol)
    }

    // ---- GetNextAssertion continuation ----------------------------------

    pub fn set_assertion_state(&mut self, state: Option<AssertionState>) {
        self.assertion_state = state;
    }

    /// Take the continuation if one exists and is still fresh.
    pub fn take_assertion_state(&mut self) -> Option<AssertionState> {
        let now = self.now();
        match self.assertion_state.take() {
            Some(state) if state.is_fresh(now) => Some(state),
            _ => None,
        }
    }

    // ---- Reset -----------------------------------------------------------

    /// Factory reset: wipe credentials, PIN state, tokens, key-agreement
    /// keys, and any assertion continuation.
    pub fn reset(&mut self) -> Result<()> {
        self.callbacks.erase_all()?;
        self.callbacks.store_pin_hash(None)?;
        self.pin_retries = MAX_PIN_RETRIES;
        self.token_v1.invalidate();
        self.token_v2.invalidate();
        self.key_agreement_keys.clear();
        self.assertion_state = None;
        Ok(())
    }
}
