//! authenticatorClientPin command
//!
//! The PIN/UV auth token issuance surface: key agreement, PIN install and
//! rotation, and token minting. PINs never cross the wire in the clear —
//! the platform encrypts them (and the verification hash prefix) under a
//! session key derived from ECDH with the key obtained via getKeyAgreement.

use crate::attestation::parse_ec2_public_key;
use crate::authenticator::Authenticator;
use crate::callbacks::AuthenticatorCallbacks;
use crate::cbor::{MapBuilder, MapParser, Value};
use crate::pin_token::{Permission, PinUvAuthProtocol};
use crate::status::{Result, StatusCode};

use fidokit_crypto::{ecdh::KeyAgreementKey, pin_protocol};
use zeroize::Zeroizing;

mod req_keys {
    pub const PIN_UV_AUTH_PROTOCOL: i32 = 0x01;
    pub const SUBCOMMAND: i32 = 0x02;
    pub const KEY_AGREEMENT: i32 = 0x03;
    pub const PIN_UV_AUTH_PARAM: i32 = 0x04;
    pub const NEW_PIN_ENC: i32 = 0x05;
    pub const PIN_HASH_ENC: i32 = 0x06;
    pub const PERMISSIONS: i32 = 0x09;
    pub const RP_ID: i32 = 0x0A;
}

mod resp_keys {
    pub const KEY_AGREEMENT: i32 = 0x01;
    pub const PIN_UV_AUTH_TOKEN: i32 = 0x02;
    pub const PIN_RETRIES: i32 = 0x03;
}

mod subcommands {
    pub const GET_PIN_RETRIES: u8 = 0x01;
    pub const GET_KEY_AGREEMENT: u8 = 0x02;
    pub const SET_PIN: u8 = 0x03;
    pub const CHANGE_PIN: u8 = 0x04;
    pub const GET_PIN_TOKEN: u8 = 0x05;
    pub const GET_PIN_UV_AUTH_TOKEN_USING_PIN_WITH_PERMISSIONS: u8 = 0x09;
}

pub fn handle<C: AuthenticatorCallbacks>(
    auth: &mut Authenticator<C>,
    data: &[u8],
) -> Result<Vec<u8>> {
    let parser = MapParser::from_bytes(data)?;
    let subcommand: u8 = parser.get(req_keys::SUBCOMMAND)?;

    match subcommand {
        subcommands::GET_PIN_RETRIES => get_pin_retries(auth),
        subcommands::GET_KEY_AGREEMENT => get_key_agreement(auth, &parser),
        subcommands::SET_PIN => set_pin(auth, &parser),
        subcommands::CHANGE_PIN => change_pin(auth, &parser),
        subcommands::GET_PIN_TOKEN => get_pin_token(auth, &parser),
        subcommands::GET_PIN_UV_AUTH_TOKEN_USING_PIN_WITH_PERMISSIONS => {
            get_token_with_permissions(auth, &parser)
        }
        _ => Err(StatusCode::InvalidSubcommand),
    }
}

fn get_pin_retries<C: AuthenticatorCallbacks>(auth: &Authenticator<C>) -> Result<Vec<u8>> {
    MapBuilder::new()
        .insert(resp_keys::PIN_RETRIES, auth.pin_retries())?
        .build()
}

fn get_key_agreement<C: AuthenticatorCallbacks>(
    auth: &mut Authenticator<C>,
    parser: &MapParser,
) -> Result<Vec<u8>> {
    let protocol = required_protocol(auth, parser)?;

    let mut rng = auth.rng();
    let key = KeyAgreementKey::generate(&mut rng);
    let (x, y) = key.public_coordinates();
    auth.set_key_agreement_key(protocol.to_u8(), key);

    let cose_key = MapBuilder::new()
        .insert(1, 2)? // kty: EC2
        .insert(3, -25)? // alg: ECDH-ES + HKDF-256
        .insert(-1, 1)? // crv: P-256
        .insert_bytes(-2, &x)?
        .insert_bytes(-3, &y)?
        .build_value()?;

    MapBuilder::new()
        .insert(resp_keys::KEY_AGREEMENT, cose_key)?
        .build()
}

fn set_pin<C: AuthenticatorCallbacks>(
    auth: &mut Authenticator<C>,
    parser: &MapParser,
) -> Result<Vec<u8>> {
    if auth.is_pin_set() {
        return Err(StatusCode::PinAuthInvalid);
    }

    let protocol = required_protocol(auth, parser)?;
    let new_pin_enc = parser.get_bytes(req_keys::NEW_PIN_ENC)?;
    let pin_uv_auth_param = parser.get_bytes(req_keys::PIN_UV_AUTH_PARAM)?;
    let (enc_key, hmac_key) = session_keys(auth, parser, protocol)?;

    if !verify_session_mac(protocol, &hmac_key, &new_pin_enc, &pin_uv_auth_param) {
        return Err(StatusCode::PinAuthInvalid);
    }

    let pin = decrypt_padded_pin(protocol, &enc_key, &new_pin_enc)?;
    auth.set_pin(&pin)?;

    MapBuilder::new().build()
}

fn change_pin<C: AuthenticatorCallbacks>(
    auth: &mut Authenticator<C>,
    parser: &MapParser,
) -> Result<Vec<u8>> {
    if !auth.is_pin_set() {
        return Err(StatusCode::PinNotSet);
    }

    let protocol = required_protocol(auth, parser)?;
    let new_pin_enc = parser.get_bytes(req_keys::NEW_PIN_ENC)?;
    let pin_hash_enc = parser.get_bytes(req_keys::PIN_HASH_ENC)?;
    let pin_uv_auth_param = parser.get_bytes(req_keys::PIN_UV_AUTH_PARAM)?;
    let (enc_key, hmac_key) = session_keys(auth, parser, protocol)?;

    let mut mac_message = new_pin_enc.clone();
    mac_message.extend_from_slice(&pin_hash_enc);
    if !verify_session_mac(protocol, &hmac_key, &mac_message, &pin_uv_auth_param) {
        return Err(StatusCode::PinAuthInvalid);
    }

    verify_encrypted_pin_hash(auth, protocol, &enc_key, &pin_hash_enc)?;

    let pin = decrypt_padded_pin(protocol, &enc_key, &new_pin_enc)?;
    auth.set_pin(&pin)?;

    MapBuilder::new().build()
}

fn get_pin_token<C: AuthenticatorCallbacks>(
    auth: &mut Authenticator<C>,
    parser: &MapParser,
) -> Result<Vec<u8>> {
    if !auth.is_pin_set() {
        return Err(StatusCode::PinNotSet);
    }

    let protocol = required_protocol(auth, parser)?;
    let pin_hash_enc = parser.get_bytes(req_keys::PIN_HASH_ENC)?;
    let (enc_key, _) = session_keys(auth, parser, protocol)?;

    verify_encrypted_pin_hash(auth, protocol, &enc_key, &pin_hash_enc)?;

    // the pre-permissions subcommand grants the credential operations only
    let permissions = Permission::MakeCredential.to_u8() | Permission::GetAssertion.to_u8();
    issue_encrypted_token(auth, protocol, permissions, None, &enc_key)
}

fn get_token_with_permissions<C: AuthenticatorCallbacks>(
    auth: &mut Authenticator<C>,
    parser: &MapParser,
) -> Result<Vec<u8>> {
    if !auth.is_pin_set() {
        return Err(StatusCode::PinNotSet);
    }

    let protocol = required_protocol(auth, parser)?;
    let pin_hash_enc = parser.get_bytes(req_keys::PIN_HASH_ENC)?;
    let permissions: u8 = parser.get(req_keys::PERMISSIONS)?;
    let rp_id: Option<String> = parser.get_opt(req_keys::RP_ID)?;

    if permissions == 0 {
        return Err(StatusCode::InvalidParameter);
    }
    if auth.config().options.no_mc_ga_permissions_with_client_pin
        && permissions
            & (Permission::MakeCredential.to_u8() | Permission::GetAssertion.to_u8())
            != 0
    {
        return Err(StatusCode::UnauthorizedPermission);
    }

    let (enc_key, _) = session_keys(auth, parser, protocol)?;
    verify_encrypted_pin_hash(auth, protocol, &enc_key, &pin_hash_enc)?;

    issue_encrypted_token(auth, protocol, permissions, rp_id, &enc_key)
}

/// Parse and validate the protocol version against the supported set.
fn required_protocol<C: AuthenticatorCallbacks>(
    auth: &Authenticator<C>,
    parser: &MapParser,
) -> Result<PinUvAuthProtocol> {
    let version: u8 = parser.get(req_keys::PIN_UV_AUTH_PROTOCOL)?;
    if !auth.config().pin_uv_auth_protocols.contains(&version) {
        return Err(StatusCode::InvalidParameter);
    }
    PinUvAuthProtocol::from_u8(version).ok_or(StatusCode::InvalidParameter)
}

/// Derive the session keys from the platform's key-agreement key and the
/// authenticator key created by getKeyAgreement.
fn session_keys<C: AuthenticatorCallbacks>(
    auth: &Authenticator<C>,
    parser: &MapParser,
    protocol: PinUvAuthProtocol,
) -> Result<(Zeroizing<[u8; 32]>, Zeroizing<[u8; 32]>)> {
    let platform_key: Value = parser.get(req_keys::KEY_AGREEMENT)?;
    let platform_public = parse_ec2_public_key(&platform_key)?;

    let key = auth
        .key_agreement_key(protocol.to_u8())
        .ok_or(StatusCode::PinAuthInvalid)?;
    let shared_secret = Zeroizing::new(key.shared_secret(&platform_public)?);

    let (enc, hmac) = match protocol {
        PinUvAuthProtocol::V1 => pin_protocol::v1::derive_keys(&shared_secret),
        PinUvAuthProtocol::V2 => (
            pin_protocol::v2::derive_encryption_key(&shared_secret),
            pin_protocol::v2::derive_hmac_key(&shared_secret),
        ),
    };
    Ok((Zeroizing::new(enc), Zeroizing::new(hmac)))
}

fn verify_session_mac(
    protocol: PinUvAuthProtocol,
    hmac_key: &[u8; 32],
    message: &[u8],
    mac: &[u8],
) -> bool {
    match protocol {
        PinUvAuthProtocol::V1 => pin_protocol::v1::verify(hmac_key, message, mac),
        PinUvAuthProtocol::V2 => pin_protocol::v2::verify(hmac_key, message, mac),
    }
}

fn decrypt_session(
    protocol: PinUvAuthProtocol,
    enc_key: &[u8; 32],
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    let plaintext = match protocol {
        PinUvAuthProtocol::V1 => pin_protocol::v1::decrypt(enc_key, ciphertext)?,
        PinUvAuthProtocol::V2 => pin_protocol::v2::decrypt(enc_key, ciphertext)?,
    };
    Ok(Zeroizing::new(plaintext))
}

/// Decrypt a 64-byte zero-padded PIN block and trim the padding.
fn decrypt_padded_pin(
    protocol: PinUvAuthProtocol,
    enc_key: &[u8; 32],
    new_pin_enc: &[u8],
) -> Result<Zeroizing<String>> {
    let padded = decrypt_session(protocol, enc_key, new_pin_enc)?;
    if padded.len() < 64 {
        return Err(StatusCode::PinPolicyViolation);
    }

    let pin_len = padded.iter().position(|&b| b == 0).unwrap_or(padded.len());
    let pin = std::str::from_utf8(&padded[..pin_len])
        .map_err(|_| StatusCode::PinPolicyViolation)?;
    Ok(Zeroizing::new(pin.to_string()))
}

/// Decrypt the transported PIN-hash prefix and check it against the
/// stored hash, burning a retry on mismatch.
fn verify_encrypted_pin_hash<C: AuthenticatorCallbacks>(
    auth: &mut Authenticator<C>,
    protocol: PinUvAuthProtocol,
    enc_key: &[u8; 32],
    pin_hash_enc: &[u8],
) -> Result<()> {
    if auth.is_pin_blocked() {
        return Err(StatusCode::PinBlocked);
    }

    let prefix = decrypt_session(protocol, enc_key, pin_hash_enc)
        .map_err(|_| StatusCode::PinAuthInvalid)?;
    auth.verify_pin_hash_prefix(&prefix)
}

/// Mint a token into the protocol's slot and return it encrypted under the
/// session key.
fn issue_encrypted_token<C: AuthenticatorCallbacks>(
    auth: &mut Authenticator<C>,
    protocol: PinUvAuthProtocol,
    permissions: u8,
    rp_id: Option<String>,
    enc_key: &[u8; 32],
) -> Result<Vec<u8>> {
    let token = Zeroizing::new(auth.issue_pin_uv_auth_token(protocol, permissions, rp_id));

    let encrypted = match protocol {
        PinUvAuthProtocol::V1 => pin_protocol::v1::encrypt(enc_key, token.as_ref())?,
        PinUvAuthProtocol::V2 => {
            let mut rng = auth.rng();
            pin_protocol::v2::encrypt(enc_key, token.as_ref(), &mut rng)?
        }
    };

    MapBuilder::new()
        .insert_bytes(resp_keys::PIN_UV_AUTH_TOKEN, &encrypted)?
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authenticator::AuthenticatorConfig;
    use crate::test_support::TestEnv;

    use fidokit_crypto::sha256;
    use rand::rngs::OsRng;

    fn new_authenticator() -> Authenticator<TestEnv> {
        Authenticator::new(AuthenticatorConfig::new(), TestEnv::new())
    }

    /// Drive getKeyAgreement and return the platform side of the session:
    /// (platform key agreement COSE value, enc_key, hmac_key).
    fn establish_session(
        auth: &mut Authenticator<TestEnv>,
        protocol: u8,
    ) -> (Value, [u8; 32], [u8; 32]) {
        let request = MapBuilder::new()
            .insert(req_keys::SUBCOMMAND, subcommands::GET_KEY_AGREEMENT)
            .unwrap()
            .insert(req_keys::PIN_UV_AUTH_PROTOCOL, protocol)
            .unwrap()
            .build()
            .unwrap();
        let response = handle(auth, &request).unwrap();

        let parser = MapParser::from_bytes(&response).unwrap();
        let authenticator_cose: Value = parser.get(resp_keys::KEY_AGREEMENT).unwrap();
        let authenticator_public = parse_ec2_public_key(&authenticator_cose).unwrap();

        let platform_key = KeyAgreementKey::generate(&mut OsRng);
        let shared = platform_key.shared_secret(&authenticator_public).unwrap();
        let (enc, hmac) = match protocol {
            1 => pin_protocol::v1::derive_keys(&shared),
            _ => (
                pin_protocol::v2::derive_encryption_key(&shared),
                pin_protocol::v2::derive_hmac_key(&shared),
            ),
        };

        let (x, y) = platform_key.public_coordinates();
        let platform_cose = MapBuilder::new()
            .insert(1, 2)
            .unwrap()
            .insert(3, -25)
            .unwrap()
            .insert(-1, 1)
            .unwrap()
            .insert_bytes(-2, &x)
            .unwrap()
            .insert_bytes(-3, &y)
            .unwrap()
            .build_value()
            .unwrap();

        (platform_cose, enc, hmac)
    }

    fn encrypt(protocol: u8, key: &[u8; 32], plaintext: &[u8]) -> Vec<u8> {
        match protocol {
            1 => pin_protocol::v1::encrypt(key, plaintext).unwrap(),
            _ => pin_protocol::v2::encrypt(key, plaintext, &mut OsRng).unwrap(),
        }
    }

    fn mac(protocol: u8, key: &[u8; 32], message: &[u8]) -> Vec<u8> {
        match protocol {
            1 => pin_protocol::v1::authenticate(key, message).to_vec(),
            _ => pin_protocol::v2::authenticate(key, message).to_vec(),
        }
    }

    fn platform_set_pin(auth: &mut Authenticator<TestEnv>, protocol: u8, pin: &str) {
        let (platform_cose, enc_key, hmac_key) = establish_session(auth, protocol);

        let mut padded = [0u8; 64];
        padded[..pin.len()].copy_from_slice(pin.as_bytes());
        let new_pin_enc = encrypt(protocol, &enc_key, &padded);
        let param = mac(protocol, &hmac_key, &new_pin_enc);

        let request = MapBuilder::new()
            .insert(req_keys::SUBCOMMAND, subcommands::SET_PIN)
            .unwrap()
            .insert(req_keys::PIN_UV_AUTH_PROTOCOL, protocol)
            .unwrap()
            .insert(req_keys::KEY_AGREEMENT, platform_cose)
            .unwrap()
            .insert_bytes(req_keys::NEW_PIN_ENC, &new_pin_enc)
            .unwrap()
            .insert_bytes(req_keys::PIN_UV_AUTH_PARAM, &param)
            .unwrap()
            .build()
            .unwrap();
        handle(auth, &request).unwrap();
    }

    #[test]
    fn pin_retries_reported() {
        let mut auth = new_authenticator();
        let request = MapBuilder::new()
            .insert(req_keys::SUBCOMMAND, subcommands::GET_PIN_RETRIES)
            .unwrap()
            .build()
            .unwrap();
        let response = handle(&mut auth, &request).unwrap();
        let parser = MapParser::from_bytes(&response).unwrap();
        let retries: u8 = parser.get(resp_keys::PIN_RETRIES).unwrap();
        assert_eq!(retries, 8);
    }

    #[test]
    fn set_pin_via_both_protocols() {
        for protocol in [1u8, 2u8] {
            let mut auth = new_authenticator();
            platform_set_pin(&mut auth, protocol, "1234");
            assert!(auth.is_pin_set());
        }
    }

    #[test]
    fn set_pin_twice_is_refused() {
        let mut auth = new_authenticator();
        platform_set_pin(&mut auth, 2, "1234");

        let (platform_cose, enc_key, hmac_key) = establish_session(&mut auth, 2);
        let mut padded = [0u8; 64];
        padded[..4].copy_from_slice(b"5678");
        let new_pin_enc = encrypt(2, &enc_key, &padded);
        let param = mac(2, &hmac_key, &new_pin_enc);

        let request = MapBuilder::new()
            .insert(req_keys::SUBCOMMAND, subcommands::SET_PIN)
            .unwrap()
            .insert(req_keys::PIN_UV_AUTH_PROTOCOL, 2u8)
            .unwrap()
            .insert(req_keys::KEY_AGREEMENT, platform_cose)
            .unwrap()
            .insert_bytes(req_keys::NEW_PIN_ENC, &new_pin_enc)
            .unwrap()
            .insert_bytes(req_keys::PIN_UV_AUTH_PARAM, &param)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            handle(&mut auth, &request).unwrap_err(),
            StatusCode::PinAuthInvalid
        );
    }

    #[test]
    fn short_pin_violates_policy() {
        let mut auth = new_authenticator();
        let (platform_cose, enc_key, hmac_key) = establish_session(&mut auth, 2);

        let mut padded = [0u8; 64];
        padded[..3].copy_from_slice(b"123");
        let new_pin_enc = encrypt(2, &enc_key, &padded);
        let param = mac(2, &hmac_key, &new_pin_enc);

        let request = MapBuilder::new()
            .insert(req_keys::SUBCOMMAND, subcommands::SET_PIN)
            .unwrap()
            .insert(req_keys::PIN_UV_AUTH_PROTOCOL, 2u8)
            .unwrap()
            .insert(req_keys::KEY_AGREEMENT, platform_cose)
            .unwrap()
            .insert_bytes(req_keys::NEW_PIN_ENC, &new_pin_enc)
            .unwrap()
            .insert_bytes(req_keys::PIN_UV_AUTH_PARAM, &param)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            handle(&mut auth, &request).unwrap_err(),
            StatusCode::PinPolicyViolation
        );
    }

    #[test]
    fn token_issued_for_correct_pin() {
        let mut auth = new_authenticator();
        platform_set_pin(&mut auth, 2, "1234");

        let (platform_cose, enc_key, _) = establish_session(&mut auth, 2);
        let pin_hash = sha256(b"1234");
        let pin_hash_enc = encrypt(2, &enc_key, &pin_hash[..16]);

        let request = MapBuilder::new()
            .insert(req_keys::SUBCOMMAND, subcommands::GET_PIN_TOKEN)
            .unwrap()
            .insert(req_keys::PIN_UV_AUTH_PROTOCOL, 2u8)
            .unwrap()
            .insert(req_keys::KEY_AGREEMENT, platform_cose)
            .unwrap()
            .insert_bytes(req_keys::PIN_HASH_ENC, &pin_hash_enc)
            .unwrap()
            .build()
            .unwrap();
        let response = handle(&mut auth, &request).unwrap();

        let parser = MapParser::from_bytes(&response).unwrap();
        let encrypted_token = parser.get_bytes(resp_keys::PIN_UV_AUTH_TOKEN).unwrap();
        let token = pin_protocol::v2::decrypt(&enc_key, &encrypted_token).unwrap();
        assert_eq!(token.len(), 32);

        // the minted token authorizes MakeCredential
        let slot = auth.token(PinUvAuthProtocol::V2);
        assert!(slot.is_in_use());
        assert!(slot.has_permission(Permission::MakeCredential));
        assert!(slot.has_permission(Permission::GetAssertion));
        let token_key: [u8; 32] = token.try_into().unwrap();
        let mac = pin_protocol::v2::authenticate(&token_key, &[0xAA; 32]);
        assert!(slot.verify_token(&[0xAA; 32], &mac));
    }

    #[test]
    fn wrong_pin_burns_a_retry() {
        let mut auth = new_authenticator();
        platform_set_pin(&mut auth, 2, "1234");

        let (platform_cose, enc_key, _) = establish_session(&mut auth, 2);
        let wrong_hash = sha256(b"0000");
        let pin_hash_enc = encrypt(2, &enc_key, &wrong_hash[..16]);

        let request = MapBuilder::new()
            .insert(req_keys::SUBCOMMAND, subcommands::GET_PIN_TOKEN)
            .unwrap()
            .insert(req_keys::PIN_UV_AUTH_PROTOCOL, 2u8)
            .unwrap()
            .insert(req_keys::KEY_AGREEMENT, platform_cose)
            .unwrap()
            .insert_bytes(req_keys::PIN_HASH_ENC, &pin_hash_enc)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            handle(&mut auth, &request).unwrap_err(),
            StatusCode::PinInvalid
        );
        assert_eq!(auth.pin_retries(), 7);
    }

    #[test]
    fn change_pin_verifies_old_pin() {
        let mut auth = new_authenticator();
        platform_set_pin(&mut auth, 2, "1234");

        let (platform_cose, enc_key, hmac_key) = establish_session(&mut auth, 2);

        let old_hash = sha256(b"1234");
        let pin_hash_enc = encrypt(2, &enc_key, &old_hash[..16]);

        let mut padded = [0u8; 64];
        padded[..8].copy_from_slice(b"changed1");
        let new_pin_enc = encrypt(2, &enc_key, &padded);

        let mut mac_message = new_pin_enc.clone();
        mac_message.extend_from_slice(&pin_hash_enc);
        let param = mac(2, &hmac_key, &mac_message);

        let request = MapBuilder::new()
            .insert(req_keys::SUBCOMMAND, subcommands::CHANGE_PIN)
            .unwrap()
            .insert(req_keys::PIN_UV_AUTH_PROTOCOL, 2u8)
            .unwrap()
            .insert(req_keys::KEY_AGREEMENT, platform_cose)
            .unwrap()
            .insert_bytes(req_keys::NEW_PIN_ENC, &new_pin_enc)
            .unwrap()
            .insert_bytes(req_keys::PIN_HASH_ENC, &pin_hash_enc)
            .unwrap()
            .insert_bytes(req_keys::PIN_UV_AUTH_PARAM, &param)
            .unwrap()
            .build()
            .unwrap();
        handle(&mut auth, &request).unwrap();

        // the stored hash is now the new PIN's
        let stored = auth.pin_hash().unwrap().unwrap();
        assert_eq!(stored, sha256(b"changed1"));
    }

    #[test]
    fn permissions_subcommand_binds_rp() {
        let mut auth = new_authenticator();
        platform_set_pin(&mut auth, 2, "1234");

        let (platform_cose, enc_key, _) = establish_session(&mut auth, 2);
        let pin_hash = sha256(b"1234");
        let pin_hash_enc = encrypt(2, &enc_key, &pin_hash[..16]);

        let request = MapBuilder::new()
            .insert(
                req_keys::SUBCOMMAND,
                subcommands::GET_PIN_UV_AUTH_TOKEN_USING_PIN_WITH_PERMISSIONS,
            )
            .unwrap()
            .insert(req_keys::PIN_UV_AUTH_PROTOCOL, 2u8)
            .unwrap()
            .insert(req_keys::KEY_AGREEMENT, platform_cose)
            .unwrap()
            .insert_bytes(req_keys::PIN_HASH_ENC, &pin_hash_enc)
            .unwrap()
            .insert(req_keys::PERMISSIONS, Permission::MakeCredential.to_u8())
            .unwrap()
            .insert(req_keys::RP_ID, "example.com")
            .unwrap()
            .build()
            .unwrap();
        handle(&mut auth, &request).unwrap();

        let slot = auth.token(PinUvAuthProtocol::V2);
        assert_eq!(slot.rp_id(), Some("example.com"));
        assert!(slot.has_permission(Permission::MakeCredential));
        assert!(!slot.has_permission(Permission::GetAssertion));
    }

    #[test]
    fn unknown_subcommand() {
        let mut auth = new_authenticator();
        let request = MapBuilder::new()
            .insert(req_keys::SUBCOMMAND, 0x42u8)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            handle(&mut auth, &request).unwrap_err(),
            StatusCode::InvalidSubcommand
        );
    }
}
