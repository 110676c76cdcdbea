//! authenticatorGetAssertion command
//!
//! Mirrors the MakeCredential gating pipeline (token validation with the
//! `ga` permission, capability checks, user presence), then filters the
//! stored credentials by RP id, allowList and per-credential policy, signs
//! with the selected credential, and primes the continuation consumed by
//! authenticatorGetNextAssertion when several candidates remain.

use crate::authenticator::{AssertionState, Authenticator};
use crate::callbacks::{AuthenticatorCallbacks, UpIntent, UvResult};
use crate::cbor::{MapBuilder, MapParser, Value};
use crate::extensions::{GetAssertionExtensions, compute_hmac_secret, ext_ids};
use crate::pin_token::{Permission, PinUvAuthProtocol};
use crate::status::{Result, StatusCode};
use crate::store::{CREDENTIAL_ID_LEN, CredentialEntry, CredentialField};
use crate::types::{CredentialPolicy, PublicKeyCredentialDescriptor, RelyingParty, User};

use fidokit_crypto::ecdsa;
use zeroize::Zeroizing;

mod req_keys {
    pub const RP_ID: i32 = 0x01;
    pub const CLIENT_DATA_HASH: i32 = 0x02;
    pub const ALLOW_LIST: i32 = 0x03;
    pub const EXTENSIONS: i32 = 0x04;
    pub const OPTIONS: i32 = 0x05;
    pub const PIN_UV_AUTH_PARAM: i32 = 0x06;
    pub const PIN_UV_AUTH_PROTOCOL: i32 = 0x07;
}

pub(crate) mod resp_keys {
    pub const CREDENTIAL: i32 = 0x01;
    pub const AUTH_DATA: i32 = 0x02;
    pub const SIGNATURE: i32 = 0x03;
    pub const USER: i32 = 0x04;
    pub const NUMBER_OF_CREDENTIALS: i32 = 0x05;
}

#[derive(Debug, Clone, Copy)]
struct EffectiveOptions {
    up: bool,
    uv: bool,
}

pub fn handle<C: AuthenticatorCallbacks>(
    auth: &mut Authenticator<C>,
    data: &[u8],
) -> Result<Vec<u8>> {
    let parser = MapParser::from_bytes(data)?;

    let rp_id: String = parser.get(req_keys::RP_ID)?;
    if rp_id.is_empty() {
        return Err(StatusCode::InvalidParameter);
    }
    let rp = RelyingParty::new(rp_id.clone());

    let client_data_hash = parser.get_bytes(req_keys::CLIENT_DATA_HASH)?;
    if client_data_hash.len() != 32 {
        return Err(StatusCode::InvalidParameter);
    }

    let allow_list: Option<Vec<PublicKeyCredentialDescriptor>> =
        parser.get_opt(req_keys::ALLOW_LIST)?;
    let extensions = match parser.get_opt::<Value>(req_keys::EXTENSIONS)? {
        Some(value) => GetAssertionExtensions::from_value(&value)?,
        None => GetAssertionExtensions::default(),
    };
    let pin_uv_auth_param = parser.get_bytes_opt(req_keys::PIN_UV_AUTH_PARAM)?;
    let pin_uv_auth_protocol: Option<u8> = parser.get_opt(req_keys::PIN_UV_AUTH_PROTOCOL)?;
    let mut options = parse_options(&parser)?;

    // Zero-length pinUvAuthParam: the PIN-state probe, answered after a
    // cancel-only presence check.
    let pin_features = auth.supports_pin_uv_auth_token()
        || auth.config().options.client_pin.is_some();
    if pin_features && matches!(pin_uv_auth_param.as_deref(), Some([])) {
        let up = auth
            .callbacks()
            .request_up(UpIntent::GetAssertion, None, Some(&rp))?;
        if !up.is_accepted() {
            return Err(StatusCode::OperationDenied);
        }
        return Err(if auth.is_pin_set() {
            StatusCode::PinInvalid
        } else {
            StatusCode::PinNotSet
        });
    }

    // A present pinUvAuthParam requires a protocol matching a token slot.
    let protocol = match (&pin_uv_auth_param, pin_uv_auth_protocol) {
        (Some(_), None) => return Err(StatusCode::MissingParameter),
        (Some(_), Some(version)) => {
            if !auth.config().pin_uv_auth_protocols.contains(&version) {
                return Err(StatusCode::InvalidParameter);
            }
            Some(PinUvAuthProtocol::from_u8(version).ok_or(StatusCode::InvalidParameter)?)
        }
        (None, _) => None,
    };

    let mut uv_response = false;
    let mut up_response = false;

    // Effective options. Unlike MakeCredential, `up: false` is a valid
    // request for a silent assertion.
    if pin_uv_auth_param.is_some() {
        options.uv = false;
    }
    if options.uv && auth.config().options.uv != Some(true) {
        return Err(StatusCode::InvalidOption);
    }

    // alwaysUv only constrains assertions that collect user presence.
    if auth.config().options.always_uv && options.up {
        let has_built_in_uv = auth.config().options.uv == Some(true);
        if !has_built_in_uv
            && !auth.supports_pin_uv_auth_token()
            && auth.config().options.client_pin.is_none()
        {
            return Err(StatusCode::OperationDenied);
        }
        if pin_uv_auth_param.is_none() && has_built_in_uv {
            options.uv = true;
        }
        if pin_uv_auth_param.is_none() && !options.uv {
            return Err(pin_gate_status(auth));
        }
    }

    // User verification, with the `ga` permission.
    if let (Some(param), Some(protocol)) = (&pin_uv_auth_param, protocol) {
        let token = auth.token_mut(protocol);
        if !token.verify_token(&client_data_hash, param)
            || !token.has_permission(Permission::GetAssertion)
            || !token.user_verified()
        {
            return Err(StatusCode::PinAuthInvalid);
        }
        if let Some(bound) = token.rp_id() {
            if bound != rp_id {
                return Err(StatusCode::PinAuthInvalid);
            }
        }
        uv_response = true;
        token.set_rp_id(&rp_id)?;
    } else if options.uv {
        match auth.callbacks().request_uv()? {
            UvResult::Accepted => uv_response = true,
            _ => return Err(StatusCode::UvInvalid),
        }
    }

    // Locate eligible credentials: the allowList when present, otherwise
    // every credential of this RP. Each candidate's policy is applied
    // against the achieved UV state.
    let now = auth.now();
    let listed = allow_list.is_some();
    let mut candidates: Vec<CredentialEntry> = match &allow_list {
        Some(descriptors) => {
            let mut found = Vec::new();
            for descriptor in descriptors {
                if descriptor.cred_type != "public-key" {
                    continue;
                }
                let Some(entry) = auth.callbacks().get_entry(&descriptor.id)? else {
                    continue;
                };
                let entry_rp = auth
                    .callbacks()
                    .get_field(&entry, CredentialField::RpId, now);
                if entry_rp.as_deref() == Some(rp_id.as_bytes()) {
                    found.push(entry);
                }
            }
            found
        }
        None => auth.callbacks().list_entries(&rp_id)?,
    };

    candidates.retain(|entry| {
        let policy = auth
            .callbacks()
            .get_field(entry, CredentialField::Policy, now)
            .and_then(|bytes| bytes.first().copied())
            .and_then(CredentialPolicy::from_u8)
            .unwrap_or_default();
        policy.visible(uv_response, listed)
    });

    if candidates.is_empty() {
        return Err(StatusCode::NoCredentials);
    }

    // User presence.
    if options.up {
        let token_up = protocol.is_some_and(|p| auth.token(p).user_present());
        let already_satisfied = if pin_uv_auth_param.is_some() {
            token_up
        } else {
            up_response
        };
        if !already_satisfied {
            let up = auth
                .callbacks()
                .request_up(UpIntent::GetAssertion, None, Some(&rp))?;
            if !up.is_accepted() {
                return Err(StatusCode::OperationDenied);
            }
        }
        up_response = true;

        if let Some(protocol) = protocol {
            let token = auth.token_mut(protocol);
            token.clear_user_present();
            token.clear_user_verified();
            token.clear_permissions_except_lbw();
        }
    }

    // Most recent credential first; the rest feed GetNextAssertion.
    candidates.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
    let number_of_credentials = candidates.len();
    let selected = candidates.remove(0);

    let response = sign_assertion(
        auth,
        &selected,
        &rp_id,
        &client_data_hash,
        up_response,
        uv_response,
        extensions.hmac_secret.as_ref(),
        (!listed && number_of_credentials > 1).then_some(number_of_credentials),
    )?;

    if !listed && number_of_credentials > 1 {
        let remaining: Vec<[u8; CREDENTIAL_ID_LEN]> =
            candidates.iter().map(|entry| *entry.id()).collect();
        auth.set_assertion_state(Some(AssertionState::new(
            remaining,
            rp_id,
            client_data_hash,
            up_response,
            uv_response,
            auth.now(),
        )));
    } else {
        auth.set_assertion_state(None);
    }

    Ok(response)
}

/// Build one assertion for `entry`: bump its usage counter, assemble
/// authenticator data (with the hmac-secret output when requested), and
/// sign `authData || clientDataHash` with the credential key. Shared with
/// GetNextAssertion.
#[allow(clippy::too_many_arguments)]
pub(crate) fn sign_assertion<C: AuthenticatorCallbacks>(
    auth: &Authenticator<C>,
    entry: &CredentialEntry,
    rp_id: &str,
    client_data_hash: &[u8],
    up: bool,
    uv: bool,
    hmac_secret: Option<&crate::extensions::HmacSecretInput>,
    number_of_credentials: Option<usize>,
) -> Result<Vec<u8>> {
    let now = auth.now();
    let callbacks = auth.callbacks();

    // hmac-secret draws on the seed matching the achieved UV state.
    let mut ext_outputs: Vec<(Value, Value)> = Vec::new();
    if let Some(input) = hmac_secret {
        let seed_field = if uv {
            CredentialField::CredRandomWithUv
        } else {
            CredentialField::CredRandomWithoutUv
        };
        let seed = callbacks.get_field(entry, seed_field, now).map(Zeroizing::new);
        let key_agreement = auth.key_agreement_key(input.pin_uv_auth_protocol);
        if let (Some(seed), Some(key_agreement)) = (seed, key_agreement) {
            let mut rng = auth.rng();
            if let Some(output) = compute_hmac_secret(input, &seed, key_agreement, &mut rng) {
                ext_outputs.push((
                    Value::Text(ext_ids::HMAC_SECRET.to_string()),
                    Value::Bytes(output),
                ));
            }
        }
    }

    // Usage counter: read, increment, write back, and make it durable
    // before the signature discloses the new value.
    let usage_count = callbacks
        .get_field(entry, CredentialField::UsageCount, now)
        .and_then(|bytes| bytes.try_into().ok())
        .map(u32::from_be_bytes)
        .unwrap_or(0);
    let new_count = usage_count.wrapping_add(1);

    let mut updated = entry.clone();
    callbacks.add_field(
        &mut updated,
        CredentialField::UsageCount,
        &new_count.to_be_bytes(),
        now,
    )?;
    callbacks.update_entry(&updated)?;
    callbacks.persist().map_err(|_| StatusCode::Other)?;

    let mut auth_data = crate::attestation::AuthenticatorData::for_rp_id(rp_id);
    auth_data.user_present = up;
    auth_data.user_verified = uv;
    auth_data.sign_count = new_count;
    if !ext_outputs.is_empty() {
        auth_data.extensions = Some(Value::Map(ext_outputs));
    }
    let auth_data_bytes = auth_data.encode().map_err(|_| StatusCode::Other)?;

    let private_key: Zeroizing<[u8; 32]> = callbacks
        .get_field(entry, CredentialField::PrivateKey, now)
        .and_then(|bytes| bytes.try_into().ok())
        .map(Zeroizing::new)
        .ok_or(StatusCode::InvalidCredential)?;

    let mut message = auth_data_bytes.clone();
    message.extend_from_slice(client_data_hash);
    let signature = ecdsa::sign(&private_key, &message).map_err(|_| StatusCode::Other)?;
    drop(private_key);

    let user_id = callbacks
        .get_field(entry, CredentialField::UserId, now)
        .ok_or(StatusCode::InvalidCredential)?;

    let mut builder = MapBuilder::new()
        .insert(
            resp_keys::CREDENTIAL,
            PublicKeyCredentialDescriptor::new(entry.id().to_vec()),
        )?
        .insert_bytes(resp_keys::AUTH_DATA, &auth_data_bytes)?
        .insert_bytes(resp_keys::SIGNATURE, &signature)?
        .insert(resp_keys::USER, User::new(user_id))?;

    if let Some(count) = number_of_credentials {
        builder = builder.insert(resp_keys::NUMBER_OF_CREDENTIALS, count)?;
    }

    builder.build().map_err(|_| StatusCode::Other)
}

fn pin_gate_status<C: AuthenticatorCallbacks>(auth: &Authenticator<C>) -> StatusCode {
    if auth.config().options.no_mc_ga_permissions_with_client_pin && auth.is_pin_set() {
        StatusCode::OperationDenied
    } else {
        StatusCode::PinRequired
    }
}

fn parse_options(parser: &MapParser) -> Result<EffectiveOptions> {
    let mut options = EffectiveOptions {
        up: true,
        uv: false,
    };

    if let Some(Value::Map(entries)) = parser.get_opt::<Value>(req_keys::OPTIONS)? {
        for (key, value) in entries {
            let (Value::Text(name), Value::Bool(value)) = (key, value) else {
                continue;
            };
            match name.as_str() {
                "up" => options.up = value,
                "uv" => options.uv = value,
                // rk is a MakeCredential option
                "rk" => return Err(StatusCode::UnsupportedOption),
                _ => {}
            }
        }
    }

    Ok(options)
}
