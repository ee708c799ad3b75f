//! Error handling for crescendo.
//!
//! Provides a unified error type combining a closed set of error kinds with
//! the details of the underlying failure. The same kinds are used by every
//! component: decoders, converters, the DSP chain, the output backend, the
//! playback engine, the plugin host and the service registry.
//!
//! # Example
//!
//! ```rust
//! use crescendo::error::{Error, ErrorKind, Result};
//!
//! fn open_stream(path: &str) -> Result<()> {
//!     if !std::path::Path::new(path).exists() {
//!         return Err(Error::file_not_found(format!("{path} does not exist")));
//!     }
//!     Ok(())
//! }
//! ```

#![allow(clippy::enum_glob_use)]

use std::fmt;
use thiserror::Error;

/// Main error type combining error kind and details.
///
/// Provides:
/// * Categorized error types ([`ErrorKind`])
/// * Underlying error details
/// * Conversion from common error types
#[derive(Debug)]
pub struct Error {
    /// Classification of the error
    pub kind: ErrorKind,

    /// Details of the underlying error
    pub error: Box<dyn std::error::Error + Send + Sync>,
}

impl Error {
    /// Attempts to downcast the underlying error to a concrete type.
    ///
    /// # Returns
    /// * `Some(&E)` - If the underlying error is of type `E`
    /// * `None` - If the underlying error is not of type `E`
    #[must_use]
    pub fn downcast<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.error.downcast_ref::<E>()
    }
}

/// Standard result type for crescendo operations.
///
/// Wraps the standard `Result` type with our custom [`struct@Error`] type.
/// A successful operation is the `Ok` variant; there is no `Success` kind.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories shared by every component.
///
/// This is a closed enumeration: plugins and host must agree on it, so new
/// kinds are an API version bump.
#[expect(clippy::module_name_repetitions)]
#[derive(Clone, Copy, Debug, Eq, Error, Hash, Ord, PartialEq, PartialOrd)]
pub enum ErrorKind {
    /// Unclassified failure.
    #[error("Unknown error")]
    Unknown = 1,

    /// An argument did not meet validation requirements.
    #[error("Invalid parameter")]
    InvalidParameter = 2,

    /// The operation exists in the contract but is not implemented.
    #[error("Not implemented")]
    NotImplemented = 3,

    /// The operation is understood but not supported by this component.
    #[error("Not supported")]
    NotSupported = 4,

    /// An allocation or resource limit was exceeded.
    #[error("Out of memory")]
    OutOfMemory = 5,

    /// A referenced file does not exist.
    #[error("File not found")]
    FileNotFound = 6,

    /// The caller lacks permission for the operation.
    #[error("Access denied")]
    AccessDenied = 7,

    /// The operation exceeded its allowed time.
    #[error("Operation timed out")]
    Timeout = 8,

    /// The component has not been initialized yet.
    #[error("Not initialized")]
    NotInitialized = 9,

    /// The component (or a resource with the same identity) is already
    /// initialized or registered.
    #[error("Already initialized")]
    AlreadyInitialized = 10,

    /// The operation is illegal in the current state.
    #[error("Invalid state")]
    InvalidState = 11,

    /// An I/O-layer failure while reading or writing a file.
    #[error("File error")]
    FileError = 12,

    /// The data does not conform to the expected format.
    #[error("Invalid format")]
    InvalidFormat = 13,
}

macro_rules! constructor {
    ($(#[$doc:meta])* $name:ident, $kind:ident) => {
        $(#[$doc])*
        pub fn $name<E>(error: E) -> Self
        where
            E: Into<Box<dyn std::error::Error + Send + Sync>>,
        {
            Self {
                kind: ErrorKind::$kind,
                error: error.into(),
            }
        }
    };
}

impl Error {
    /// Creates a new error with specified kind and details.
    pub fn new<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind,
            error: error.into(),
        }
    }

    constructor!(
        /// Creates an error for failures that fit no other category.
        unknown,
        Unknown
    );
    constructor!(
        /// Creates an error for arguments that fail validation.
        invalid_parameter,
        InvalidParameter
    );
    constructor!(
        /// Creates an error for contract operations without an implementation.
        not_implemented,
        NotImplemented
    );
    constructor!(
        /// Creates an error for operations a component cannot support,
        /// such as a plugin version mismatch or an unsupported channel count.
        not_supported,
        NotSupported
    );
    constructor!(
        /// Creates an error for exhausted allocations or resource limits.
        out_of_memory,
        OutOfMemory
    );
    constructor!(
        /// Creates an error for missing files.
        file_not_found,
        FileNotFound
    );
    constructor!(
        /// Creates an error for permission failures.
        access_denied,
        AccessDenied
    );
    constructor!(
        /// Creates an error for operations that exceeded their deadline.
        timeout,
        Timeout
    );
    constructor!(
        /// Creates an error for calls into a component before `initialize`.
        not_initialized,
        NotInitialized
    );
    constructor!(
        /// Creates an error for duplicate initialization or registration,
        /// including UUID and service-id clashes.
        already_initialized,
        AlreadyInitialized
    );
    constructor!(
        /// Creates an error for operations illegal in the current state.
        invalid_state,
        InvalidState
    );
    constructor!(
        /// Creates an error for I/O failures below the format layer.
        file_error,
        FileError
    );
    constructor!(
        /// Creates an error for malformed or unrecognized data.
        invalid_format,
        InvalidFormat
    );
}

impl std::error::Error for Error {
    /// Returns the underlying error source.
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}

impl fmt::Display for Error {
    /// Formats the error for display, showing both kind and details.
    ///
    /// Format: "{kind}: {details}"
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}: ", self.kind)?;
        self.error.fmt(fmt)
    }
}

impl From<std::io::Error> for Error {
    /// Converts IO errors into appropriate error kinds.
    ///
    /// Maps standard IO errors to their logical equivalents:
    /// * `NotFound` -> `FileNotFound`
    /// * `PermissionDenied` -> `AccessDenied`
    /// * `TimedOut` -> `Timeout`
    /// * data-shaped failures -> `FileError`
    /// * etc.
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            NotFound => Self::file_not_found(err),
            PermissionDenied => Self::access_denied(err),
            AlreadyExists | AddrInUse => Self::already_initialized(err),
            TimedOut | WouldBlock => Self::timeout(err),
            InvalidInput => Self::invalid_parameter(err),
            InvalidData => Self::invalid_format(err),
            UnexpectedEof | BrokenPipe | WriteZero | Interrupted => Self::file_error(err),
            OutOfMemory => Self::out_of_memory(err),
            Unsupported => Self::not_supported(err),
            _ => Self::unknown(err),
        }
    }
}

impl From<serde_json::Error> for Error {
    /// Converts JSON errors to `InvalidFormat`.
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_format(err)
    }
}

impl From<semver::Error> for Error {
    /// Converts version parsing errors to `InvalidParameter`.
    fn from(err: semver::Error) -> Self {
        Self::invalid_parameter(err)
    }
}

impl From<uuid::Error> for Error {
    /// Converts UUID parsing errors to `InvalidParameter`.
    fn from(err: uuid::Error) -> Self {
        Self::invalid_parameter(err)
    }
}

impl From<libloading::Error> for Error {
    /// Converts dynamic-library errors to `Unknown`.
    ///
    /// A library that fails to load or lacks the plugin entry points is a
    /// generic load failure per the plugin host contract.
    fn from(err: libloading::Error) -> Self {
        Self::unknown(err)
    }
}

impl From<symphonia::core::errors::Error> for Error {
    /// Converts decoder errors into appropriate error kinds.
    ///
    /// Any I/O-layer failure of a decoder surfaces as `FileError`;
    /// malformed streams surface as `InvalidFormat`.
    fn from(err: symphonia::core::errors::Error) -> Self {
        use symphonia::core::errors::Error::*;
        match err {
            IoError(_) => Self::file_error(err),
            DecodeError(_) => Self::invalid_format(err),
            SeekError(_) => Self::invalid_state(err),
            Unsupported(_) => Self::not_supported(err),
            LimitError(_) => Self::out_of_memory(err),
            ResetRequired => Self::invalid_state(err),
        }
    }
}

impl From<cpal::DevicesError> for Error {
    /// Converts device enumeration errors to `Unknown`.
    fn from(err: cpal::DevicesError) -> Self {
        Self::unknown(err)
    }
}

impl From<cpal::SupportedStreamConfigsError> for Error {
    /// Converts stream configuration errors into appropriate error kinds.
    fn from(err: cpal::SupportedStreamConfigsError) -> Self {
        use cpal::SupportedStreamConfigsError::*;
        match err {
            DeviceNotAvailable => Self::file_not_found(err),
            InvalidArgument => Self::invalid_parameter(err),
            BackendSpecific { err } => Self::unknown(err),
        }
    }
}

impl From<cpal::DefaultStreamConfigError> for Error {
    /// Converts default-configuration errors into appropriate error kinds.
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        use cpal::DefaultStreamConfigError::*;
        match err {
            DeviceNotAvailable => Self::file_not_found(err),
            StreamTypeNotSupported => Self::not_supported(err),
            BackendSpecific { err } => Self::unknown(err),
        }
    }
}

impl From<cpal::BuildStreamError> for Error {
    /// Converts stream creation errors into appropriate error kinds.
    fn from(err: cpal::BuildStreamError) -> Self {
        use cpal::BuildStreamError::*;
        match err {
            DeviceNotAvailable => Self::file_not_found(err),
            InvalidArgument => Self::invalid_parameter(err),
            StreamConfigNotSupported => Self::not_supported(err),
            _ => Self::unknown(err),
        }
    }
}

impl From<cpal::PlayStreamError> for Error {
    /// Converts playback start errors to `InvalidState`.
    fn from(err: cpal::PlayStreamError) -> Self {
        Self::invalid_state(err)
    }
}

impl From<cpal::PauseStreamError> for Error {
    /// Converts playback stop errors to `InvalidState`.
    fn from(err: cpal::PauseStreamError) -> Self {
        Self::invalid_state(err)
    }
}

impl<T> From<std::sync::PoisonError<std::sync::MutexGuard<'_, T>>> for Error {
    /// Converts mutex poisoning errors to `InvalidState`.
    fn from(err: std::sync::PoisonError<std::sync::MutexGuard<'_, T>>) -> Self {
        Self::invalid_state(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_detail() {
        let err = Error::file_not_found("missing.flac");
        assert_eq!(err.to_string(), "File not found: missing.flac");
    }

    #[test]
    fn io_error_mapping() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.kind, ErrorKind::FileNotFound);

        let err: Error = std::io::Error::new(std::io::ErrorKind::InvalidData, "bad").into();
        assert_eq!(err.kind, ErrorKind::InvalidFormat);
    }

    #[test]
    fn downcast_recovers_source() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let err = Error::from(io);
        assert!(err.downcast::<std::io::Error>().is_some());
    }
}
