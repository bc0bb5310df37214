//! CTAP2 status codes
//!
//! <https://fidoalliance.org/specs/fido-v2.2-rd-20230321/fido-client-to-authenticator-protocol-v2.2-rd-20230321.html#error-responses>

use core::fmt;

/// First byte of every CTAP2 response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StatusCode {
    Success = 0x00,
    InvalidCommand = 0x01,
    InvalidParameter = 0x02,
    InvalidLength = 0x03,
    InvalidSeq = 0x04,
    Timeout = 0x05,
    ChannelBusy = 0x06,
    LockRequired = 0x0A,
    InvalidChannel = 0x0B,
    CborUnexpectedType = 0x11,
    InvalidCbor = 0x12,
    MissingParameter = 0x14,
    LimitExceeded = 0x15,
    FpDatabaseFull = 0x17,
    LargeBlobStorageFull = 0x18,
    CredentialExcluded = 0x19,
    Processing = 0x21,
    InvalidCredential = 0x22,
    UserActionPending = 0x23,
    OperationPending = 0x24,
    NoOperations = 0x25,
    UnsupportedAlgorithm = 0x26,
    OperationDenied = 0x27,
    KeyStoreFull = 0x28,
    UnsupportedOption = 0x2B,
    InvalidOption = 0x2C,
    KeepaliveCancel = 0x2D,
    NoCredentials = 0x2E,
    UserActionTimeout = 0x2F,
    /// Reset outside the power-up window, or without a touch
    NotAllowed = 0x30,
    PinInvalid = 0x31,
    PinBlocked = 0x32,
    PinAuthInvalid = 0x33,
    PinAuthBlocked = 0x34,
    PinNotSet = 0x35,
    PuatRequired = 0x36,
    PinPolicyViolation = 0x37,
    RequestTooLarge = 0x39,
    ActionTimeout = 0x3A,
    UpRequired = 0x3B,
    UvBlocked = 0x3C,
    IntegrityFailure = 0x3D,
    InvalidSubcommand = 0x3E,
    UvInvalid = 0x3F,
    UnauthorizedPermission = 0x40,
    Other = 0x7F,
}

impl StatusCode {
    /// Map a status byte, folding unassigned values into `Other`
    pub fn from_u8(value: u8) -> Self {
        use StatusCode::*;
        match value {
            0x00 => Success,
            0x01 => InvalidCommand,
            0x02 => InvalidParameter,
            0x03 => InvalidLength,
            0x04 => InvalidSeq,
            0x05 => Timeout,
            0x06 => ChannelBusy,
            0x0A => LockRequired,
            0x0B => InvalidChannel,
            0x11 => CborUnexpectedType,
            0x12 => InvalidCbor,
            0x14 => MissingParameter,
            0x15 => LimitExceeded,
            0x17 => FpDatabaseFull,
            0x18 => LargeBlobStorageFull,
            0x19 => CredentialExcluded,
            0x21 => Processing,
            0x22 => InvalidCredential,
            0x23 => UserActionPending,
            0x24 => OperationPending,
            0x25 => NoOperations,
            0x26 => UnsupportedAlgorithm,
            0x27 => OperationDenied,
            0x28 => KeyStoreFull,
            0x2B => UnsupportedOption,
            0x2C => InvalidOption,
            0x2D => KeepaliveCancel,
            0x2E => NoCredentials,
            0x2F => UserActionTimeout,
            0x30 => NotAllowed,
            0x31 => PinInvalid,
            0x32 => PinBlocked,
            0x33 => PinAuthInvalid,
            0x34 => PinAuthBlocked,
            0x35 => PinNotSet,
            0x36 => PuatRequired,
            0x37 => PinPolicyViolation,
            0x39 => RequestTooLarge,
            0x3A => ActionTimeout,
            0x3B => UpRequired,
            0x3C => UvBlocked,
            0x3D => IntegrityFailure,
            0x3E => InvalidSubcommand,
            0x3F => UvInvalid,
            0x40 => UnauthorizedPermission,
            _ => Other,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn is_success(self) -> bool {
        self == StatusCode::Success
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} (0x{:02X})", self, self.to_u8())
    }
}
