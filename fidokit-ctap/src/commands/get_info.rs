//! authenticatorGetInfo command
//!
//! Advertises the capability surface: protocol versions, extensions,
//! AAGUID, option flags, PIN/UV auth protocols and supported algorithms.

use crate::authenticator::Authenticator;
use crate::callbacks::AuthenticatorCallbacks;
use crate::cbor::MapBuilder;
use crate::status::Result;

use serde::Serialize;

mod resp_keys {
    pub const VERSIONS: i32 = 0x01;
    pub const EXTENSIONS: i32 = 0x02;
    pub const AAGUID: i32 = 0x03;
    pub const OPTIONS: i32 = 0x04;
    pub const MAX_MSG_SIZE: i32 = 0x05;
    pub const PIN_UV_AUTH_PROTOCOLS: i32 = 0x06;
    pub const ALGORITHMS: i32 = 0x0A;
}

#[derive(Serialize)]
struct OptionsMap {
    rk: bool,
    up: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    uv: Option<bool>,
    #[serde(rename = "clientPin", skip_serializing_if = "Option::is_none")]
    client_pin: Option<bool>,
    #[serde(rename = "pinUvAuthToken")]
    pin_uv_auth_token: bool,
    #[serde(rename = "alwaysUv")]
    always_uv: bool,
    #[serde(rename = "makeCredUvNotRqd")]
    make_cred_uv_not_rqd: bool,
    #[serde(
        rename = "noMcGaPermissionsWithClientPin",
        skip_serializing_if = "std::ops::Not::not"
    )]
    no_mc_ga_permissions_with_client_pin: bool,
}

#[derive(Serialize)]
struct AlgorithmEntry {
    #[serde(rename = "type")]
    cred_type: &'static str,
    alg: i32,
}

pub fn handle<C: AuthenticatorCallbacks>(auth: &Authenticator<C>) -> Result<Vec<u8>> {
    let config = auth.config();

    let options = OptionsMap {
        rk: config.options.rk,
        up: true,
        uv: config.options.uv,
        // advertised value reflects whether a PIN is currently set
        client_pin: config.options.client_pin.map(|_| auth.is_pin_set()),
        pin_uv_auth_token: config.options.pin_uv_auth_token,
        always_uv: config.options.always_uv,
        make_cred_uv_not_rqd: config.options.make_cred_uv_not_rqd,
        no_mc_ga_permissions_with_client_pin: config
            .options
            .no_mc_ga_permissions_with_client_pin,
    };

    let algorithms: Vec<AlgorithmEntry> = config
        .algorithms
        .iter()
        .map(|&alg| AlgorithmEntry {
            cred_type: "public-key",
            alg,
        })
        .collect();

    let mut builder = MapBuilder::new()
        .insert(resp_keys::VERSIONS, vec!["FIDO_2_0", "FIDO_2_1"])?
        .insert_bytes(resp_keys::AAGUID, &config.aaguid)?
        .insert(resp_keys::OPTIONS, options)?
        .insert(resp_keys::MAX_MSG_SIZE, config.max_msg_size)?
        .insert(
            resp_keys::PIN_UV_AUTH_PROTOCOLS,
            &config.pin_uv_auth_protocols,
        )?;

    if !config.extensions.is_empty() {
        builder = builder.insert(resp_keys::EXTENSIONS, &config.extensions)?;
    }
    if !algorithms.is_empty() {
        builder = builder.insert(resp_keys::ALGORITHMS, algorithms)?;
    }

    builder.build()
}
