//! Error types for item validation.

use std::path::PathBuf;
use thiserror::Error;

use super::types::ItemKind;

/// Errors that can occur while validating a conversion item.
///
/// These are bad-input errors: they are never retried and always surface
/// immediately to the caller.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// File extension is not supported by any conversion kind.
    #[error("Unsupported file extension: .{extension}")]
    UnsupportedExtension { extension: String },

    /// File exceeds the size ceiling for its kind.
    #[error("{name} is {size_bytes} bytes, over the {limit_bytes} byte limit")]
    FileTooLarge {
        name: String,
        size_bytes: u64,
        limit_bytes: u64,
    },

    /// URL failed to parse or uses an unsupported scheme.
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// A credential-gated kind was submitted without a credential.
    #[error("A credential is required to convert {kind} items")]
    CredentialRequired { kind: ItemKind },

    /// The item has no usable display name.
    #[error("Item has no usable name")]
    EmptyName,

    /// The source file could not be inspected.
    #[error("Cannot read file {path}: {reason}")]
    FileUnreadable { path: PathBuf, reason: String },

    /// A conversion was started with an empty item set.
    #[error("No items to convert")]
    NoItems,
}

impl ValidationError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedExtension { .. } => "UNSUPPORTED_EXTENSION",
            Self::FileTooLarge { .. } => "FILE_TOO_LARGE",
            Self::InvalidUrl { .. } => "INVALID_URL",
            Self::CredentialRequired { .. } => "CREDENTIAL_REQUIRED",
            Self::EmptyName => "EMPTY_NAME",
            Self::FileUnreadable { .. } => "FILE_UNREADABLE",
            Self::NoItems => "NO_ITEMS",
        }
    }
}
