//! CTAP2 authenticator core
//!
//! The request-processing state machine of a FIDO2 authenticator: CBOR
//! commands in, policy decisions and attestation out. The transport layer
//! (USB-HID, NFC, BLE) and the durable key store live on the other side of
//! the callback traits in [`callbacks`] and [`store`].
//!
//! Entry point: build an [`Authenticator`] from an [`AuthenticatorConfig`]
//! and an implementation of [`AuthenticatorCallbacks`], wrap it in a
//! [`CommandDispatcher`], and feed it wire frames (one command byte followed
//! by CBOR parameters).

pub mod attestation;
pub mod authenticator;
pub mod callbacks;
pub mod cbor;
pub mod commands;
pub mod dispatcher;
pub mod extensions;
pub mod pin_token;
pub mod status;
pub mod store;
pub mod types;

pub use attestation::{AttestationType, AuthenticatorData};
pub use authenticator::{Authenticator, AuthenticatorConfig, AuthenticatorOptions};
pub use callbacks::{
    AuthenticatorCallbacks, PlatformCallbacks, UpIntent, UpResult, UserInteractionCallbacks,
    UvResult,
};
pub use dispatcher::CommandDispatcher;
pub use pin_token::{Permission, PinUvAuthProtocol, PinUvAuthToken};
pub use status::{Result, StatusCode};
pub use store::{CredentialEntry, CredentialField, CredentialStore, MemoryStore};
pub use types::{
    CoseAlgorithm, CredentialPolicy, PublicKeyCredentialDescriptor,
    PublicKeyCredentialParameters, RelyingParty, User,
};
