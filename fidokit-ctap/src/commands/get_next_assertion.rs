//! authenticatorGetNextAssertion command
//!
//! Consumes the continuation primed by GetAssertion: one stored candidate
//! per call, in the order the original request established, for as long as
//! the continuation stays fresh. Any other command in between discards it.

use crate::authenticator::{AssertionState, Authenticator};
use crate::callbacks::AuthenticatorCallbacks;
use crate::commands::get_assertion::sign_assertion;
use crate::status::{Result, StatusCode};

pub fn handle<C: AuthenticatorCallbacks>(
    auth: &mut Authenticator<C>,
    _data: &[u8],
) -> Result<Vec<u8>> {
    let mut state = auth.take_assertion_state().ok_or(StatusCode::NotAllowed)?;
    if state.remaining.is_empty() {
        return Err(StatusCode::NotAllowed);
    }

    let credential_id = state.remaining.remove(0);
    let entry = auth
        .callbacks()
        .get_entry(&credential_id)?
        .ok_or(StatusCode::NoCredentials)?;

    let rp_id = state.rp_id.clone();
    let client_data_hash = state.client_data_hash.clone();
    let response = sign_assertion(
        auth,
        &entry,
        &rp_id,
        &client_data_hash,
        state.user_present,
        state.user_verified,
        None,
        None,
    )?;

    // re-arm for the next call with a fresh window
    if !state.remaining.is_empty() {
        let now = auth.now();
        auth.set_assertion_state(Some(AssertionState::new(
            state.remaining,
            state.rp_id,
            state.client_data_hash,
            state.user_present,
            state.user_verified,
            now,
        )));
    }

    Ok(response)
}
