//! Command dispatch and wire framing
//!
//! A request frame is one command byte followed by CBOR parameters; a
//! response frame is one status byte followed, on success only, by the
//! CBOR result. [`CommandDispatcher::transact`] speaks frames; transports
//! hand it reassembled messages and send back whatever it returns.

use crate::authenticator::Authenticator;
use crate::callbacks::{AuthenticatorCallbacks, UpIntent};
use crate::commands::{self, CommandCode};
use crate::status::{Result, StatusCode};

pub struct CommandDispatcher<C: AuthenticatorCallbacks> {
    authenticator: Authenticator<C>,
}

impl<C: AuthenticatorCallbacks> CommandDispatcher<C> {
    pub fn new(authenticator: Authenticator<C>) -> Self {
        Self { authenticator }
    }

    /// Decode and run one command, returning the CBOR response payload.
    pub fn dispatch(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        let (&command_byte, parameters) =
            request.split_first().ok_or(StatusCode::InvalidParameter)?;
        let command = CommandCode::from_u8(command_byte).ok_or(StatusCode::InvalidCommand)?;

        // a GetAssertion continuation only survives back-to-back
        // GetNextAssertion calls
        if command != CommandCode::GetNextAssertion {
            self.authenticator.set_assertion_state(None);
        }

        match command {
            CommandCode::MakeCredential => {
                commands::make_credential::handle(&mut self.authenticator, parameters)
            }
            CommandCode::GetAssertion => {
                commands::get_assertion::handle(&mut self.authenticator, parameters)
            }
            CommandCode::GetInfo => commands::get_info::handle(&self.authenticator),
            CommandCode::ClientPin => {
                commands::client_pin::handle(&mut self.authenticator, parameters)
            }
            CommandCode::Reset => self.reset(),
            CommandCode::GetNextAssertion => {
                commands::get_next_assertion::handle(&mut self.authenticator, parameters)
            }
        }
    }

    /// Run one command and frame the outcome: a bare status byte on
    /// failure, status plus CBOR on success.
    pub fn transact(&mut self, request: &[u8]) -> Vec<u8> {
        match self.dispatch(request) {
            Ok(payload) => {
                let mut response = Vec::with_capacity(1 + payload.len());
                response.push(StatusCode::Success.to_u8());
                response.extend_from_slice(&payload);
                response
            }
            Err(status) => vec![status.to_u8()],
        }
    }

    /// Factory reset, gated on a presence check.
    fn reset(&mut self) -> Result<Vec<u8>> {
        let up = self
            .authenticator
            .callbacks()
            .request_up(UpIntent::Reset, None, None)?;
        if !up.is_accepted() {
            return Err(StatusCode::OperationDenied);
        }
        self.authenticator.reset()?;
        Ok(Vec::new())
    }

    pub fn authenticator(&self) -> &Authenticator<C> {
        &self.authenticator
    }

    pub fn authenticator_mut(&mut self) -> &mut Authenticator<C> {
        &mut self.authenticator
    }

    pub fn into_authenticator(self) -> Authenticator<C> {
        self.authenticator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authenticator::AuthenticatorConfig;
    use crate::test_support::TestEnv;

    fn new_dispatcher() -> CommandDispatcher<TestEnv> {
        CommandDispatcher::new(Authenticator::new(AuthenticatorConfig::new(), TestEnv::new()))
    }

    #[test]
    fn get_info_round_trip() {
        let mut dispatcher = new_dispatcher();
        let response = dispatcher.transact(&[0x04]);
        assert_eq!(response[0], 0x00);
        assert!(response.len() > 1);
    }

    #[test]
    fn empty_frame() {
        let mut dispatcher = new_dispatcher();
        assert_eq!(
            dispatcher.dispatch(&[]).unwrap_err(),
            StatusCode::InvalidParameter
        );
    }

    #[test]
    fn unknown_command_is_one_status_byte() {
        let mut dispatcher = new_dispatcher();
        let response = dispatcher.transact(&[0xFF]);
        assert_eq!(response, vec![StatusCode::InvalidCommand.to_u8()]);
    }

    #[test]
    fn vendor_range_is_unhandled() {
        let mut dispatcher = new_dispatcher();
        for command in [0x40u8, 0x80, 0xBF] {
            let response = dispatcher.transact(&[command]);
            assert_eq!(response, vec![StatusCode::InvalidCommand.to_u8()]);
        }
    }

    #[test]
    fn reset_requires_presence() {
        let mut dispatcher = new_dispatcher();
        dispatcher.authenticator_mut().set_pin("1234").unwrap();

        dispatcher.authenticator().callbacks().deny_up();
        let response = dispatcher.transact(&[0x07]);
        assert_eq!(response, vec![StatusCode::OperationDenied.to_u8()]);
        assert!(dispatcher.authenticator().is_pin_set());

        *dispatcher
            .authenticator()
            .callbacks()
            .up_result
            .lock()
            .unwrap() = crate::callbacks::UpResult::Accepted;
        let response = dispatcher.transact(&[0x07]);
        assert_eq!(response, vec![0x00]);
        assert!(!dispatcher.authenticator().is_pin_set());
    }
}
