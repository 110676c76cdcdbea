//! CTAP2 status codes
//!
//! Every failure path in the handlers is an explicit status return; a status
//! other than `Success` travels back to the transport as a single byte.

use core::fmt;

/// CTAP2 status codes as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StatusCode {
    /// Successful completion of command
    Success = 0x00,
    /// Invalid or unknown command
    InvalidCommand = 0x01,
    /// Invalid parameter in request
    InvalidParameter = 0x02,
    /// Invalid message or item length
    InvalidLength = 0x03,
    /// CBOR decoding produced an unexpected type
    CborUnexpectedType = 0x11,
    /// Invalid CBOR encoding
    InvalidCbor = 0x12,
    /// Missing required parameter
    MissingParameter = 0x14,
    /// Unsupported extension
    UnsupportedExtension = 0x16,
    /// A credential from the exclude list already exists
    CredentialExcluded = 0x19,
    /// Invalid credential
    InvalidCredential = 0x22,
    /// No supported algorithm in pubKeyCredParams
    UnsupportedAlgorithm = 0x26,
    /// User refused, or policy blocks the request
    OperationDenied = 0x27,
    /// Credential store is at capacity
    KeyStoreFull = 0x28,
    /// Option ID unknown
    UnsupportedOption = 0x2B,
    /// Requested option value unsupported in this context
    InvalidOption = 0x2C,
    /// No eligible credentials found
    NoCredentials = 0x2E,
    /// User action timed out
    UserActionTimeout = 0x2F,
    /// Command not allowed in the current state
    NotAllowed = 0x30,
    /// PIN incorrect
    PinInvalid = 0x31,
    /// PIN retries exhausted
    PinBlocked = 0x32,
    /// pinUvAuthParam verification failed
    PinAuthInvalid = 0x33,
    /// PIN auth blocked until power cycle
    PinAuthBlocked = 0x34,
    /// No PIN has been set
    PinNotSet = 0x35,
    /// A PIN is required for this operation
    PinRequired = 0x36,
    /// PIN policy violation (length bounds)
    PinPolicyViolation = 0x37,
    /// Invalid ClientPin subcommand
    InvalidSubcommand = 0x3E,
    /// Built-in user verification refused or exhausted
    UvInvalid = 0x3F,
    /// Token lacks the required permission
    UnauthorizedPermission = 0x40,
    /// Unspecified internal failure (crypto, encoding, persist)
    Other = 0x7F,
}

impl StatusCode {
    /// Wire byte for this status.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Decode a wire byte; unknown values collapse to `Other`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => Self::Success,
            0x01 => Self::InvalidCommand,
            0x02 => Self::InvalidParameter,
            0x03 => Self::InvalidLength,
            0x11 => Self::CborUnexpectedType,
            0x12 => Self::InvalidCbor,
            0x14 => Self::MissingParameter,
            0x16 => Self::UnsupportedExtension,
            0x19 => Self::CredentialExcluded,
            0x22 => Self::InvalidCredential,
            0x26 => Self::UnsupportedAlgorithm,
            0x27 => Self::OperationDenied,
            0x28 => Self::KeyStoreFull,
            0x2B => Self::UnsupportedOption,
            0x2C => Self::InvalidOption,
            0x2E => Self::NoCredentials,
            0x2F => Self::UserActionTimeout,
            0x30 => Self::NotAllowed,
            0x31 => Self::PinInvalid,
            0x32 => Self::PinBlocked,
            0x33 => Self::PinAuthInvalid,
            0x34 => Self::PinAuthBlocked,
            0x35 => Self::PinNotSet,
            0x36 => Self::PinRequired,
            0x37 => Self::PinPolicyViolation,
            0x3E => Self::InvalidSubcommand,
            0x3F => Self::UvInvalid,
            0x40 => Self::UnauthorizedPermission,
            _ => Self::Other,
        }
    }

    /// True for the success status.
    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    fn name(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::InvalidCommand => "invalid command",
            Self::InvalidParameter => "invalid parameter",
            Self::InvalidLength => "invalid length",
            Self::CborUnexpectedType => "CBOR unexpected type",
            Self::InvalidCbor => "invalid CBOR",
            Self::MissingParameter => "missing parameter",
            Self::UnsupportedExtension => "unsupported extension",
            Self::CredentialExcluded => "credential excluded",
            Self::InvalidCredential => "invalid credential",
            Self::UnsupportedAlgorithm => "unsupported algorithm",
            Self::OperationDenied => "operation denied",
            Self::KeyStoreFull => "key store full",
            Self::UnsupportedOption => "unsupported option",
            Self::InvalidOption => "invalid option",
            Self::NoCredentials => "no credentials",
            Self::UserActionTimeout => "user action timeout",
            Self::NotAllowed => "not allowed",
            Self::PinInvalid => "PIN invalid",
            Self::PinBlocked => "PIN blocked",
            Self::PinAuthInvalid => "PIN auth invalid",
            Self::PinAuthBlocked => "PIN auth blocked",
            Self::PinNotSet => "PIN not set",
            Self::PinRequired => "PIN required",
            Self::PinPolicyViolation => "PIN policy violation",
            Self::InvalidSubcommand => "invalid subcommand",
            Self::UvInvalid => "UV invalid",
            Self::UnauthorizedPermission => "unauthorized permission",
            Self::Other => "other error",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::error::Error for StatusCode {}

impl From<StatusCode> for u8 {
    fn from(status: StatusCode) -> u8 {
        status.to_u8()
    }
}

impl From<fidokit_crypto::CryptoError> for StatusCode {
    fn from(err: fidokit_crypto::CryptoError) -> Self {
        use fidokit_crypto::CryptoError;
        match err {
            CryptoError::InvalidPublicKey
            | CryptoError::InvalidPrivateKey
            | CryptoError::InvalidSignature => Self::InvalidParameter,
            CryptoError::DecryptionFailed => Self::PinAuthInvalid,
            CryptoError::EncryptionFailed
            | CryptoError::KeyAgreementFailed
            | CryptoError::KeyGenerationFailed => Self::Other,
        }
    }
}

/// Result type for CTAP operations.
pub type Result<T> = core::result::Result<T, StatusCode>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        for code in [
            StatusCode::Success,
            StatusCode::CredentialExcluded,
            StatusCode::UnsupportedAlgorithm,
            StatusCode::OperationDenied,
            StatusCode::PinRequired,
            StatusCode::UvInvalid,
        ] {
            assert_eq!(StatusCode::from_u8(code.to_u8()), code);
        }
    }

    #[test]
    fn unknown_byte_collapses_to_other() {
        assert_eq!(StatusCode::from_u8(0xFE), StatusCode::Other);
        assert_eq!(StatusCode::Other.to_u8(), 0x7F);
    }

    #[test]
    fn crypto_error_mapping() {
        let status: StatusCode = fidokit_crypto::CryptoError::DecryptionFailed.into();
        assert_eq!(status, StatusCode::PinAuthInvalid);

        let status: StatusCode = fidokit_crypto::CryptoError::EncryptionFailed.into();
        assert_eq!(status, StatusCode::Other);
    }
}
