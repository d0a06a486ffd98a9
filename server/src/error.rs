//! This module provides [ArchiveError], the failure taxonomy shared by the scanning, archiving, and enrichment
//! code paths.

use {
    std::{
        fmt::{self, Display},
        io,
    },
    thiserror::Error,
};

/// The kind of access a directory must grant
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum Access {
    Read,
    ReadWrite,
}

impl Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Access::Read => "read",
            Access::ReadWrite => "read/write",
        })
    }
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The path does not exist or is not a directory, or a file does not belong where it was found
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("no {access} access to path {path}")]
    AccessDenied { path: String, access: Access },

    /// A source file could not be read or parsed; such files are left out of scan results
    #[error("unable to read {path}: {reason}")]
    UnreadableSourceFile { path: String, reason: String },

    #[error("item is missing a value for '{0}'")]
    MissingRequiredField(&'static str),

    #[error("unable to get unique file name in {path}")]
    NameCollisionUnresolvable {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot copy file from {from} to {to}")]
    CopyFailed {
        from: String,
        to: String,
        #[source]
        source: io::Error,
    },

    #[error("unable to add {file} to catalog")]
    CatalogTransactionFailed {
        file: String,
        #[source]
        source: sqlx::Error,
    },

    /// The source file could not be removed after it was copied (and, when saving, cataloged)
    #[error("cannot remove {path}")]
    CleanupFailed {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Label detection or timezone lookup failed
    #[error("external service failure: {0}")]
    ExternalServiceFailure(String),
}
