//! authenticatorMakeCredential command
//!
//! A nineteen-step ordered pipeline: any step that produces a status other
//! than success aborts the request with that status and no response
//! payload. Steps 1-14 gate the operation (token validation, capability
//! checks, excludeList, user presence), steps 15-18 create and store the
//! credential, step 19 assembles the attestation object.

use crate::attestation::{
    self, AttestedCredentialData, AttestationType, AuthenticatorData,
    empty_attestation_statement, self_attestation_statement,
};
use crate::authenticator::Authenticator;
use crate::callbacks::{AuthenticatorCallbacks, UpIntent, UvResult};
use crate::cbor::{MapBuilder, MapParser, Value};
use crate::extensions::{MakeCredentialExtensions, ext_ids};
use crate::pin_token::{Permission, PinUvAuthProtocol};
use crate::status::{Result, StatusCode};
use crate::store::{CREDENTIAL_ID_LEN, CredentialField};
use crate::types::{
    CoseAlgorithm, CredentialPolicy, PublicKeyCredentialDescriptor,
    PublicKeyCredentialParameters, RelyingParty, User,
};

use fidokit_crypto::ecdsa;
use zeroize::Zeroizing;

mod req_keys {
    pub const CLIENT_DATA_HASH: i32 = 0x01;
    pub const RP: i32 = 0x02;
    pub const USER: i32 = 0x03;
    pub const PUB_KEY_CRED_PARAMS: i32 = 0x04;
    pub const EXCLUDE_LIST: i32 = 0x05;
    pub const EXTENSIONS: i32 = 0x06;
    pub const OPTIONS: i32 = 0x07;
    pub const PIN_UV_AUTH_PARAM: i32 = 0x08;
    pub const PIN_UV_AUTH_PROTOCOL: i32 = 0x09;
    pub const ENTERPRISE_ATTESTATION: i32 = 0x0A;
}

mod resp_keys {
    pub const FMT: i32 = 0x01;
    pub const AUTH_DATA: i32 = 0x02;
    pub const ATT_STMT: i32 = 0x03;
}

/// Request options resolved to their effective values, computed once in
/// step 5 instead of re-traversing nested optionals.
#[derive(Debug, Clone, Copy)]
struct EffectiveOptions {
    rk: bool,
    up: bool,
    uv: bool,
}

pub fn handle<C: AuthenticatorCallbacks>(
    auth: &mut Authenticator<C>,
    data: &[u8],
) -> Result<Vec<u8>> {
    let parser = MapParser::from_bytes(data)?;

    let client_data_hash = parser.get_bytes(req_keys::CLIENT_DATA_HASH)?;
    if client_data_hash.len() != 32 {
        return Err(StatusCode::InvalidParameter);
    }

    let rp: RelyingParty = parser.get(req_keys::RP)?;
    let user: User = parser.get(req_keys::USER)?;
    if user.id.is_empty() || user.id.len() > 64 {
        return Err(StatusCode::InvalidParameter);
    }

    let pub_key_cred_params: Vec<PublicKeyCredentialParameters> =
        parser.get(req_keys::PUB_KEY_CRED_PARAMS)?;
    let exclude_list: Option<Vec<PublicKeyCredentialDescriptor>> =
        parser.get_opt(req_keys::EXCLUDE_LIST)?;
    let extensions = match parser.get_opt::<Value>(req_keys::EXTENSIONS)? {
        Some(value) => MakeCredentialExtensions::from_value(&value)?,
        None => MakeCredentialExtensions::default(),
    };
    let pin_uv_auth_param = parser.get_bytes_opt(req_keys::PIN_UV_AUTH_PARAM)?;
    let pin_uv_auth_protocol: Option<u8> = parser.get_opt(req_keys::PIN_UV_AUTH_PROTOCOL)?;
    let enterprise_attestation: Option<u8> = parser.get_opt(req_keys::ENTERPRISE_ATTESTATION)?;
    let mut options = parse_options(&parser)?;

    // Step 1: a zero-length pinUvAuthParam is the platform probing for PIN
    // state; answer after a cancel-only presence check.
    let pin_features = auth.supports_pin_uv_auth_token()
        || auth.config().options.client_pin.is_some();
    if pin_features && matches!(pin_uv_auth_param.as_deref(), Some([])) {
        let up = auth
            .callbacks()
            .request_up(UpIntent::MakeCredential, Some(&user), Some(&rp))?;
        if !up.is_accepted() {
            return Err(StatusCode::OperationDenied);
        }
        return Err(if auth.is_pin_set() {
            StatusCode::PinInvalid
        } else {
            StatusCode::PinNotSet
        });
    }

    // Step 2: a present pinUvAuthParam requires a protocol matching one of
    // the token slots.
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

    // Step 3: first pubKeyCredParams entry with a supported algorithm,
    // platform preference order preserved.
    let alg = pub_key_cred_params
        .iter()
        .filter(|param| param.cred_type == "public-key")
        .find(|param| auth.config().algorithms.contains(&param.alg))
        .map(|param| param.alg)
        .ok_or(StatusCode::UnsupportedAlgorithm)?;

    // Step 4: response flags start cleared.
    let mut uv_response = false;
    let mut up_response = false;

    // Step 5: resolve effective options. Token authorization replaces
    // built-in UV, so a present param forces uv off.
    if pin_uv_auth_param.is_some() {
        options.uv = false;
    }
    if options.uv && auth.config().options.uv != Some(true) {
        return Err(StatusCode::InvalidOption);
    }
    if options.rk && !auth.config().options.rk {
        return Err(StatusCode::InvalidOption);
    }
    if !options.up {
        return Err(StatusCode::InvalidOption);
    }

    // Step 6: alwaysUv.
    let mut make_cred_uv_not_rqd = auth.config().options.make_cred_uv_not_rqd;
    if auth.config().options.always_uv {
        make_cred_uv_not_rqd = false;

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

    // Steps 7-8: makeCredUvNotRqd. When set, only discoverable creation on
    // a protected authenticator demands authentication; when clear, all
    // creation does.
    let protected = auth.is_protected();
    let unauthenticated = pin_uv_auth_param.is_none() && !options.uv;
    if make_cred_uv_not_rqd {
        if protected && unauthenticated && options.rk {
            return Err(pin_gate_status(auth));
        }
    } else if protected && unauthenticated {
        return Err(pin_gate_status(auth));
    }

    // Step 9: enterprise attestation is unsupported outright.
    if enterprise_attestation.is_some() {
        return Err(StatusCode::InvalidParameter);
    }

    // Step 10: non-discoverable creation without UV on a makeCredUvNotRqd
    // authenticator skips user verification entirely.
    let skip_auth =
        !options.rk && !options.uv && make_cred_uv_not_rqd && pin_uv_auth_param.is_none();

    // Step 11: user verification.
    if !skip_auth {
        if let (Some(param), Some(protocol)) = (&pin_uv_auth_param, protocol) {
            let token = auth.token_mut(protocol);
            if !token.verify_token(&client_data_hash, param)
                || !token.has_permission(Permission::MakeCredential)
                || !token.user_verified()
            {
                return Err(StatusCode::PinAuthInvalid);
            }
            if let Some(bound) = token.rp_id() {
                if bound != rp.id {
                    return Err(StatusCode::PinAuthInvalid);
                }
            }
            uv_response = true;
            token.set_rp_id(&rp.id)?;
        } else if options.uv {
            match auth.callbacks().request_uv()? {
                UvResult::Accepted => uv_response = true,
                _ => return Err(StatusCode::UvInvalid),
            }
        } else {
            // steps 6-8 admit no other combination
            return Err(StatusCode::Other);
        }
    }

    // Step 12: excludeList. A listed credential of ours blocks creation if
    // it is visible under the achieved UV state; UV-required credentials
    // stay invisible to unverified requests.
    if let Some(exclude_list) = &exclude_list {
        let now = auth.now();
        for descriptor in exclude_list {
            let Some(entry) = auth.callbacks().get_entry(&descriptor.id)? else {
                continue;
            };
            let entry_rp = auth
                .callbacks()
                .get_field(&entry, CredentialField::RpId, now);
            if entry_rp.as_deref() != Some(rp.id.as_bytes()) {
                continue;
            }

            let policy = auth
                .callbacks()
                .get_field(&entry, CredentialField::Policy, now)
                .and_then(|bytes| bytes.first().copied())
                .and_then(CredentialPolicy::from_u8)
                .unwrap_or_default();
            if !policy.visible(uv_response, true) {
                continue;
            }

            let up_satisfied = up_response
                || protocol.is_some_and(|p| auth.token(p).user_present());
            if !up_satisfied {
                // collect presence before disclosing the exclusion, result
                // notwithstanding
                let _ = auth
                    .callbacks()
                    .request_up(UpIntent::MakeCredential, Some(&user), Some(&rp))?;
            }
            return Err(StatusCode::CredentialExcluded);
        }
    }

    // Step 13: reserved.

    // Step 14: user presence. A token carrying a satisfied UP test stands
    // in for a fresh prompt; either way the token's grant state is spent.
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
                .request_up(UpIntent::MakeCredential, Some(&user), Some(&rp))?;
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

    // Step 15: extensions. Unsupported ones are ignored.
    let mut ext_outputs: Vec<(Value, Value)> = Vec::new();
    let mut policy_to_store = None;
    let mut cred_randoms = None;

    if let Some(policy) = extensions.cred_protect {
        if auth.config().supports_extension(ext_ids::CRED_PROTECT) {
            policy_to_store = Some(policy);
            ext_outputs.push((
                Value::Text(ext_ids::CRED_PROTECT.to_string()),
                Value::Integer(policy.to_u8() as i128),
            ));
        }
    }
    if extensions.hmac_secret == Some(true)
        && auth.config().supports_extension(ext_ids::HMAC_SECRET)
    {
        let mut with_uv = Zeroizing::new([0u8; 32]);
        let mut without_uv = Zeroizing::new([0u8; 32]);
        auth.callbacks().fill_random(&mut with_uv[..]);
        auth.callbacks().fill_random(&mut without_uv[..]);
        cred_randoms = Some((with_uv, without_uv));
        ext_outputs.push((
            Value::Text(ext_ids::HMAC_SECRET.to_string()),
            Value::Bool(true),
        ));
    }

    // Step 16: generate the credential.
    if CoseAlgorithm::from_i32(alg) != Some(CoseAlgorithm::Es256) {
        return Err(StatusCode::Other);
    }

    let mut credential_id = [0u8; CREDENTIAL_ID_LEN];
    auth.callbacks().fill_random(&mut credential_id);

    let mut rng = auth.rng();
    let (private_key, public_key) = ecdsa::generate_keypair(&mut rng);

    let now = auth.now();
    let callbacks = auth.callbacks();
    let mut entry = callbacks.create_entry(&credential_id, now)?;
    callbacks.add_field(&mut entry, CredentialField::RpId, rp.id.as_bytes(), now)?;
    callbacks.add_field(&mut entry, CredentialField::UserId, &user.id, now)?;
    callbacks.add_field(&mut entry, CredentialField::PrivateKey, &*private_key, now)?;
    callbacks.add_field(&mut entry, CredentialField::Algorithm, &alg.to_be_bytes(), now)?;
    if let Some(policy) = policy_to_store {
        callbacks.add_field(&mut entry, CredentialField::Policy, &[policy.to_u8()], now)?;
    }
    if let Some((with_uv, without_uv)) = &cred_randoms {
        callbacks.add_field(
            &mut entry,
            CredentialField::CredRandomWithUv,
            &with_uv[..],
            now,
        )?;
        callbacks.add_field(
            &mut entry,
            CredentialField::CredRandomWithoutUv,
            &without_uv[..],
            now,
        )?;
    }
    callbacks.add_field(
        &mut entry,
        CredentialField::UsageCount,
        &1u32.to_be_bytes(),
        now,
    )?;

    // Steps 17-18: commit, then make durable. The store owns batch
    // atomicity; a failed persist is an internal error.
    callbacks.add_entry(entry)?;
    callbacks.persist().map_err(|_| StatusCode::Other)?;
    drop(cred_randoms);

    // Step 19: authenticator data and attestation statement.
    let mut auth_data = AuthenticatorData::for_rp_id(&rp.id);
    auth_data.user_present = up_response;
    auth_data.user_verified = uv_response;
    auth_data.sign_count = 0;
    auth_data.attested_credential = Some(AttestedCredentialData {
        aaguid: auth.config().aaguid,
        credential_id: credential_id.to_vec(),
        public_key: attestation::encode_es256_public_key(&public_key, alg)?,
    });
    if !ext_outputs.is_empty() {
        auth_data.extensions = Some(Value::Map(ext_outputs));
    }

    let auth_data_bytes = auth_data.encode().map_err(|_| StatusCode::Other)?;

    let att_stmt = match auth.config().attestation {
        AttestationType::None => empty_attestation_statement(),
        AttestationType::SelfAttestation => {
            let mut message = auth_data_bytes.clone();
            message.extend_from_slice(&client_data_hash);
            let signature = ecdsa::sign(&private_key, &message).map_err(|_| StatusCode::Other)?;
            self_attestation_statement(alg, &signature)
        }
    };
    drop(private_key);

    MapBuilder::new()
        .insert(resp_keys::FMT, "packed")?
        .insert_bytes(resp_keys::AUTH_DATA, &auth_data_bytes)?
        .insert(resp_keys::ATT_STMT, att_stmt)?
        .build()
        .map_err(|_| StatusCode::Other)
}

/// The status for "authentication needed but not provided": `pin_required`,
/// or `operation_denied` on authenticators configured to withhold MC/GA
/// permissions while a client PIN is set.
fn pin_gate_status<C: AuthenticatorCallbacks>(auth: &Authenticator<C>) -> StatusCode {
    if auth.config().options.no_mc_ga_permissions_with_client_pin && auth.is_pin_set() {
        StatusCode::OperationDenied
    } else {
        StatusCode::PinRequired
    }
}

fn parse_options(parser: &MapParser) -> Result<EffectiveOptions> {
    let mut options = EffectiveOptions {
        rk: false,
        up: true,
        uv: false,
    };

    if let Some(Value::Map(entries)) = parser.get_opt::<Value>(req_keys::OPTIONS)? {
        for (key, value) in entries {
            let (Value::Text(name), Value::Bool(value)) = (key, value) else {
                continue;
            };
            match name.as_str() {
                "rk" => options.rk = value,
                "up" => options.up = value,
                "uv" => options.uv = value,
                _ => {}
            }
        }
    }

    Ok(options)
}
