//! Error types for crxpack operations.
//!
//! This module defines the [`enum@Error`] enum covering every way a packaging
//! run can fail. Each variant corresponds to one stage of the pipeline, so a
//! caller can tell a bad key apart from an unwritable destination without
//! inspecting messages.
//!
//! # See Also
//!
//! - [`crate::Result`] - Convenience type alias using this error
//! - [`ErrorKind`] - Copyable discriminant for matching and reporting

use std::fmt;
use thiserror::Error;

/// Error type for crxpack operations.
///
/// All public functions in this crate return [`crate::Result<T>`], which uses this error type.
/// Match on variants (or on [`Error::kind`]) to handle specific failure cases.
///
/// # Examples
///
/// ```no_run
/// use crxpack::{Error, Packager};
///
/// let result = Packager::new()
///     .private_key("extension.pem")
///     .run("my-extension", "my-extension.crx");
/// match result {
///     Ok(summary) => println!("Packed {}", summary.extension_id),
///     Err(Error::DestinationNotWritable(msg)) => eprintln!("Refusing to write: {msg}"),
///     Err(e) => eprintln!("{}: {e}", e.kind()),
/// }
/// ```
#[derive(Debug, Error)]
pub enum Error {
    /// No private key was supplied, or the key file does not exist.
    #[error("Private key missing: {0}")]
    KeyMissing(String),

    /// The key file exists but could not be read.
    #[error("Private key unreadable: {0}")]
    KeyUnreadable(String),

    /// The key text is not valid marker-wrapped or raw base64.
    ///
    /// See [`crate::crypto::decode_key_bytes`] for the accepted encodings.
    #[error("Private key malformed: {0}")]
    KeyMalformed(String),

    /// The decoded key bytes are not a supported private key encoding.
    #[error("Private key has invalid format: {0}")]
    KeyInvalidFormat(String),

    /// The source directory does not exist or is not a directory.
    #[error("Invalid source directory: {0}")]
    SourceInvalid(String),

    /// Archiving the source directory failed.
    #[error("Packaging failed: {0}")]
    PackagingFailure(String),

    /// The signing capability could not produce a signature or public key.
    #[error("Signing failed: {0}")]
    SigningFailure(String),

    /// The destination cannot be opened for writing.
    ///
    /// Also raised when a container already exists at the destination and
    /// overwriting was not allowed.
    #[error("Destination not writable: {0}")]
    DestinationNotWritable(String),

    /// The intermediate archive could not be read back during assembly.
    #[error("Archive not readable: {0}")]
    SourceNotReadable(String),

    /// An I/O error occurred while writing the container.
    #[error("Write failed: {0}")]
    WriteFailure(String),
}

impl Error {
    /// Returns the failure category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::KeyMissing(_) => ErrorKind::KeyMissing,
            Error::KeyUnreadable(_) => ErrorKind::KeyUnreadable,
            Error::KeyMalformed(_) => ErrorKind::KeyMalformed,
            Error::KeyInvalidFormat(_) => ErrorKind::KeyInvalidFormat,
            Error::SourceInvalid(_) => ErrorKind::SourceInvalid,
            Error::PackagingFailure(_) => ErrorKind::PackagingFailure,
            Error::SigningFailure(_) => ErrorKind::SigningFailure,
            Error::DestinationNotWritable(_) => ErrorKind::DestinationNotWritable,
            Error::SourceNotReadable(_) => ErrorKind::SourceNotReadable,
            Error::WriteFailure(_) => ErrorKind::WriteFailure,
        }
    }
}

/// Copyable failure category of an [`enum@Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    KeyMissing,
    KeyUnreadable,
    KeyMalformed,
    KeyInvalidFormat,
    SourceInvalid,
    PackagingFailure,
    SigningFailure,
    DestinationNotWritable,
    SourceNotReadable,
    WriteFailure,
}

impl ErrorKind {
    /// Stable snake_case code, suitable for logs and exit messages.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::KeyMissing => "key_missing",
            ErrorKind::KeyUnreadable => "key_unreadable",
            ErrorKind::KeyMalformed => "key_malformed",
            ErrorKind::KeyInvalidFormat => "key_invalid_format",
            ErrorKind::SourceInvalid => "source_invalid",
            ErrorKind::PackagingFailure => "packaging_failure",
            ErrorKind::SigningFailure => "signing_failure",
            ErrorKind::DestinationNotWritable => "destination_not_writable",
            ErrorKind::SourceNotReadable => "source_not_readable",
            ErrorKind::WriteFailure => "write_failure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        assert_eq!(Error::KeyMissing("x".into()).kind(), ErrorKind::KeyMissing);
        assert_eq!(
            Error::DestinationNotWritable("x".into()).kind(),
            ErrorKind::DestinationNotWritable
        );
        assert_eq!(Error::WriteFailure("x".into()).kind(), ErrorKind::WriteFailure);
    }

    #[test]
    fn test_display_includes_message() {
        let err = Error::KeyMalformed("missing -----END marker".into());
        assert_eq!(err.to_string(), "Private key malformed: missing -----END marker");
        assert_eq!(err.kind().to_string(), "key_malformed");
    }
}
