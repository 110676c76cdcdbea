//! Environment callbacks
//!
//! Everything the core cannot do itself crosses one of these traits: user
//! presence and verification prompts, the random source, the millisecond
//! clock, PIN-hash persistence, and credential storage (see
//! [`crate::store::CredentialStore`]). The combined [`AuthenticatorCallbacks`]
//! bound is what [`crate::Authenticator`] is generic over.
//!
//! Only the UP prompt, the UV prompt and `persist` may block; all other
//! callbacks return immediately. The transport serializes requests, so
//! implementations never see concurrent calls.

use crate::status::Result;
use crate::store::CredentialStore;
use crate::types::{RelyingParty, User};

use rand::{CryptoRng, RngCore};

/// Why a user-presence prompt is being shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpIntent {
    /// Registering a new credential
    MakeCredential,
    /// Signing an assertion
    GetAssertion,
    /// Factory reset
    Reset,
}

/// Outcome of a user-presence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpResult {
    /// Presence confirmed
    Accepted,
    /// User declined
    Denied,
    /// Prompt timed out
    Timeout,
    /// Prompt was cancelled by the transport
    Cancelled,
}

impl UpResult {
    pub fn is_accepted(self) -> bool {
        self == Self::Accepted
    }
}

/// Outcome of a built-in user-verification attempt.
///
/// The callback owns its retry policy; `RetriesExhausted` means it gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UvResult {
    Accepted,
    Denied,
    RetriesExhausted,
}

impl UvResult {
    pub fn is_verified(self) -> bool {
        self == Self::Accepted
    }
}

/// User interaction prompts.
pub trait UserInteractionCallbacks {
    /// Ask for a test of user presence (e.g. a touch). `user` and `rp` are
    /// display context and may be absent.
    fn request_up(
        &self,
        intent: UpIntent,
        user: Option<&User>,
        rp: Option<&RelyingParty>,
    ) -> Result<UpResult>;

    /// Run the built-in user-verification method (biometric or equivalent).
    fn request_uv(&self) -> Result<UvResult>;
}

/// Platform services: entropy, clock, PIN-hash persistence.
pub trait PlatformCallbacks {
    /// Fill `dest` with cryptographically secure random bytes.
    fn fill_random(&self, dest: &mut [u8]);

    /// Monotonic wall clock in milliseconds.
    fn millis(&self) -> u64;

    /// Load the persisted PIN hash, if a PIN has been set.
    fn load_pin_hash(&self) -> Result<Option<[u8; 32]>>;

    /// Persist a new PIN hash; `None` clears it (reset).
    fn store_pin_hash(&self, hash: Option<&[u8; 32]>) -> Result<()>;
}

/// The full capability set the authenticator is generic over.
pub trait AuthenticatorCallbacks:
    UserInteractionCallbacks + PlatformCallbacks + CredentialStore
{
}

impl<T> AuthenticatorCallbacks for T where
    T: UserInteractionCallbacks + PlatformCallbacks + CredentialStore
{
}

/// Adapter exposing the platform random callback as a [`RngCore`], so key
/// generation in `fidokit-crypto` draws from the same source as credential
/// ids and token keys.
pub struct CallbackRng<'a, C: PlatformCallbacks>(pub &'a C);

impl<C: PlatformCallbacks> RngCore for CallbackRng<'_, C> {
    fn next_u32(&mut self) -> u32 {
        let mut buf = [0u8; 4];
        self.fill_bytes(&mut buf);
        u32::from_le_bytes(buf)
    }

    fn next_u64(&mut self) -> u64 {
        let mut buf = [0u8; 8];
        self.fill_bytes(&mut buf);
        u64::from_le_bytes(buf)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.0.fill_random(dest);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> core::result::Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl<C: PlatformCallbacks> CryptoRng for CallbackRng<'_, C> {}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedRandom(u8);

    impl PlatformCallbacks for FixedRandom {
        fn fill_random(&self, dest: &mut [u8]) {
            dest.fill(self.0);
        }

        fn millis(&self) -> u64 {
            0
        }

        fn load_pin_hash(&self) -> Result<Option<[u8; 32]>> {
            Ok(None)
        }

        fn store_pin_hash(&self, _hash: Option<&[u8; 32]>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn up_result_accepted() {
        assert!(UpResult::Accepted.is_accepted());
        assert!(!UpResult::Denied.is_accepted());
        assert!(!UpResult::Timeout.is_accepted());
        assert!(!UpResult::Cancelled.is_accepted());
    }

    #[test]
    fn uv_result_verified() {
        assert!(UvResult::Accepted.is_verified());
        assert!(!UvResult::Denied.is_verified());
        assert!(!UvResult::RetriesExhausted.is_verified());
    }

    #[test]
    fn callback_rng_draws_from_platform() {
        let platform = FixedRandom(0xAB);
        let mut rng = CallbackRng(&platform);

        let mut buf = [0u8; 16];
        rng.fill_bytes(&mut buf);
        assert_eq!(buf, [0xAB; 16]);
        assert_eq!(rng.next_u32(), u32::from_le_bytes([0xAB; 4]));
    }
}
