//! Error types.

use std::fmt::{self, Display};

/// Result type with [`Error`] as its error variant.
pub type Result<T> = ::std::result::Result<T, Error>;

/// Kinds of errors surfaced by this crate.
///
/// Each variant is a discriminated value; [`Error`] pairs it with an
/// optional boxed cause so that a caller can walk the chain with
/// [`Error::caused_by`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Error originating in the PC/SC transport.
    PcscError,

    /// Error establishing a PC/SC context.
    PcscContextError,

    /// Transport-level I/O failure (reader unplugged, timeout, etc).
    IoError,

    /// Card returned a status word with no more specific mapping.
    ApduError,

    /// An unexpected or unknown BER-TLV tag was encountered.
    PivTagError,

    /// Parsed data failed a semantic check.
    InvalidDataError,

    /// Security status not satisfied: wrong PIN/PUK, wrong admin key, or
    /// the slot demands authentication that hasn't happened yet.
    PermissionError,

    /// A `verify_pin` caller-supplied minimum retry count was not met.
    MinRetriesError,

    /// The requested object, token, or slot does not exist.
    NotFoundError,

    /// More than one candidate matched an operation that expects at most one.
    DuplicateError,

    /// The card or firmware version does not support the requested operation.
    NotSupportedError,

    /// A buffer or field exceeded an encoding's length limit.
    LengthError,

    /// An algorithm identifier was unrecognized or unusable in context.
    BadAlgorithmError,

    /// `CertInfo` carried a flag this implementation cannot handle.
    CertFlagError,

    /// GZIP inflation of a certificate object failed or exceeded the cap.
    DecompressionError,

    /// The device reported it is out of storage (`0x6A84`).
    DeviceOutOfMemoryError,

    /// The card requires conditions (PIN/PUK exhaustion) not yet met for reset.
    ResetConditionsError,

    /// An expected X.509 extension was absent.
    ExtensionMissing,

    /// An X.509 extension was present but malformed.
    ExtensionInvalid,

    /// Attempted an operation on a box that is still sealed.
    BoxSealed,

    /// PKCS#7 unpadding failed a structural check.
    PaddingError,

    /// A box's binary encoding had a bad magic prefix.
    MagicError,

    /// A box's encoded version is unsupported.
    VersionError,

    /// Two EC values were on different curves when they were required to match.
    CurveError,

    /// Card-side key authentication failed.
    KeyAuthError,

    /// Two cryptographic key values that were required to be equal were not.
    KeysNotEqualError,

    /// A caller-supplied argument was invalid.
    ArgumentError,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::PcscError => "PC/SC error",
            ErrorKind::PcscContextError => "PC/SC context error",
            ErrorKind::IoError => "I/O error",
            ErrorKind::ApduError => "unexpected card status word",
            ErrorKind::PivTagError => "unexpected TLV tag",
            ErrorKind::InvalidDataError => "invalid data",
            ErrorKind::PermissionError => "security status not satisfied",
            ErrorKind::MinRetriesError => "minimum PIN retries not met",
            ErrorKind::NotFoundError => "not found",
            ErrorKind::DuplicateError => "duplicate match",
            ErrorKind::NotSupportedError => "not supported",
            ErrorKind::LengthError => "length error",
            ErrorKind::BadAlgorithmError => "bad algorithm",
            ErrorKind::CertFlagError => "unsupported certificate flag",
            ErrorKind::DecompressionError => "decompression error",
            ErrorKind::DeviceOutOfMemoryError => "device out of memory",
            ErrorKind::ResetConditionsError => "reset conditions not met",
            ErrorKind::ExtensionMissing => "extension missing",
            ErrorKind::ExtensionInvalid => "extension invalid",
            ErrorKind::BoxSealed => "box is sealed",
            ErrorKind::PaddingError => "padding error",
            ErrorKind::MagicError => "bad magic",
            ErrorKind::VersionError => "unsupported version",
            ErrorKind::CurveError => "curve mismatch",
            ErrorKind::KeyAuthError => "key authentication failed",
            ErrorKind::KeysNotEqualError => "keys not equal",
            ErrorKind::ArgumentError => "invalid argument",
        };
        f.write_str(s)
    }
}

/// An error, with an optional chained cause.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    cause: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    /// Construct an error of the given kind with no message or cause.
    pub fn new(kind: ErrorKind) -> Self {
        Error {
            kind,
            message: None,
            cause: None,
        }
    }

    /// Construct an error of the given kind with a human-readable message.
    pub fn with_message(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: Some(message.into()),
            cause: None,
        }
    }

    /// Attach a cause to this error, returning the modified value.
    pub fn with_cause(
        mut self,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// True if this error, or any error in its cause chain, has the given kind.
    pub fn caused_by(&self, kind: ErrorKind) -> bool {
        if self.kind == kind {
            return true;
        }
        self.cause
            .as_ref()
            .and_then(|c| c.downcast_ref::<Error>())
            .is_some_and(|e| e.caused_by(kind))
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {}", self.kind, msg),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|c| c.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<pcsc::Error> for Error {
    fn from(err: pcsc::Error) -> Self {
        let kind = match err {
            pcsc::Error::NoSmartcard | pcsc::Error::RemovedCard => ErrorKind::NotFoundError,
            _ => ErrorKind::PcscError,
        };
        Error::new(kind).with_cause(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::new(ErrorKind::IoError).with_cause(err)
    }
}

/// Shorthand constructors for each [`ErrorKind`], used pervasively through
/// the rest of the crate.
macro_rules! error_ctor {
    ($name:ident => $kind:ident) => {
        #[allow(dead_code)]
        pub(crate) fn $name() -> Error {
            Error::new(ErrorKind::$kind)
        }
    };
}

pub(crate) mod ctor {
    use super::{Error, ErrorKind};

    error_ctor!(pcsc_error => PcscError);
    error_ctor!(pcsc_context_error => PcscContextError);
    error_ctor!(io_error => IoError);
    error_ctor!(apdu_error => ApduError);
    error_ctor!(piv_tag_error => PivTagError);
    error_ctor!(invalid_data_error => InvalidDataError);
    error_ctor!(permission_error => PermissionError);
    error_ctor!(min_retries_error => MinRetriesError);
    error_ctor!(not_found_error => NotFoundError);
    error_ctor!(duplicate_error => DuplicateError);
    error_ctor!(not_supported_error => NotSupportedError);
    error_ctor!(length_error => LengthError);
    error_ctor!(bad_algorithm_error => BadAlgorithmError);
    error_ctor!(cert_flag_error => CertFlagError);
    error_ctor!(decompression_error => DecompressionError);
    error_ctor!(device_out_of_memory_error => DeviceOutOfMemoryError);
    error_ctor!(reset_conditions_error => ResetConditionsError);
    error_ctor!(extension_missing => ExtensionMissing);
    error_ctor!(extension_invalid => ExtensionInvalid);
    error_ctor!(box_sealed => BoxSealed);
    error_ctor!(padding_error => PaddingError);
    error_ctor!(magic_error => MagicError);
    error_ctor!(version_error => VersionError);
    error_ctor!(curve_error => CurveError);
    error_ctor!(key_auth_error => KeyAuthError);
    error_ctor!(keys_not_equal_error => KeysNotEqualError);
    error_ctor!(argument_error => ArgumentError);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_message() {
        let e = Error::with_message(ErrorKind::NotFoundError, "no such slot");
        assert_eq!(e.to_string(), "not found: no such slot");
    }

    #[test]
    fn caused_by_walks_chain() {
        let inner = Error::new(ErrorKind::IoError);
        let outer = Error::new(ErrorKind::ApduError).with_cause(inner);
        assert!(outer.caused_by(ErrorKind::ApduError));
        assert!(outer.caused_by(ErrorKind::IoError));
        assert!(!outer.caused_by(ErrorKind::NotFoundError));
    }
}
