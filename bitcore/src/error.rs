//! Closed error-kind taxonomy (spec §7), carried inside [`anyhow::Error`]
//! exactly as the teacher crate's `error.rs` does: call sites use
//! `bail!`/`ensure!`/`anyhow!` freely for context-rich internal errors, and
//! structured matching happens at boundaries via `downcast_ref`.

use std::path::PathBuf;

use crate::hash::Oid;
use crate::obj::{BitId, PartialOid};

/// The crate's generic error type: an [`anyhow::Error`] that may or may not
/// carry a structured [`BitError`] (use [`BitErrorExt`] to check).
pub type BitGenericError = anyhow::Error;

pub type BitResult<T> = Result<T, BitGenericError>;

#[derive(Debug, thiserror::Error)]
pub enum BitError {
    // -- Format --
    #[error("invalid object header `{0}`")]
    InvalidHeader(String),
    #[error("size mismatch: header says {expected} bytes, payload is {actual} bytes")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error("invalid hex string `{0}`")]
    InvalidHex(String),
    #[error("invalid file mode `{0:o}`")]
    InvalidMode(u32),
    #[error("invalid object type `{0}`")]
    InvalidObjectType(String),
    #[error("invalid ref name `{0}`")]
    InvalidRefName(String),
    #[error("invalid identity `{0}`")]
    InvalidIdentity(String),
    #[error("invalid refspec `{0}`")]
    InvalidRefspec(String),

    // -- Integrity --
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
    #[error("corrupt object `{0}`")]
    CorruptObject(Oid),
    #[error("corrupt pack `{0}`")]
    CorruptPack(PathBuf),
    #[error("corrupt pack index `{0}`")]
    CorruptIndex(PathBuf),
    #[error("delta chain cycle detected at offset {0}")]
    DeltaChainCycle(u64),
    #[error("delta chain depth {depth} exceeds maximum {max}")]
    DeltaChainTooDeep { depth: u32, max: u32 },

    // -- Not found --
    #[error("object `{0}` not found")]
    ObjectNotFound(BitId),
    #[error("prefix `{0}` is ambiguous: matches {1:?}")]
    AmbiguousPrefix(PartialOid, Vec<Oid>),
    #[error("ref `{0}` not found")]
    RefNotFound(String),
    #[error("no merge in progress")]
    MergeNotInProgress,

    // -- Conflict / state --
    #[error("ref `{0}` already exists")]
    RefAlreadyExists(String),
    #[error("stale prior value for ref `{name}`: expected {expected:?}, found {actual:?}")]
    StalePrior { name: String, expected: Option<Oid>, actual: Option<Oid> },
    #[error("merge has unresolved conflicts")]
    ConflictUnresolved,
    #[error("fast-forward impossible")]
    FastForwardImpossible,
    #[error("circular reference detected resolving `{0}`")]
    CircularRef(String),
    #[error("maximum ref resolution depth ({0}) exceeded")]
    MaxDepthExceeded(u32),

    // -- Locking --
    #[error("timed out waiting for lock on `{0}`")]
    LockTimeout(PathBuf),
    #[error("stale lock on `{0}`")]
    StaleLock(PathBuf),

    // -- Wire --
    #[error("malformed pkt-line: {0}")]
    PktLine(String),
    #[error("unsupported capability `{0}`")]
    Capability(String),
    #[error("negotiation failed: {0}")]
    Negotiation(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,

    // -- I/O --
    #[error("io error")]
    IoFailed(#[source] std::io::Error),
    #[error("operation cancelled")]
    Cancelled,
}

impl BitError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ObjectNotFound(..) | Self::RefNotFound(..) | Self::MergeNotInProgress)
    }

    /// Errors the caller may usefully retry after backing off.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::StalePrior { .. } | Self::LockTimeout(..))
    }
}

impl From<std::io::Error> for BitError {
    fn from(err: std::io::Error) -> Self {
        Self::IoFailed(err)
    }
}

/// Extension methods for working with a [`BitGenericError`] that may wrap a
/// structured [`BitError`], mirroring the teacher crate's `BitErrorExt`.
pub trait BitErrorExt {
    fn as_bit_error(&self) -> Option<&BitError>;

    fn is_not_found_err(&self) -> bool {
        self.as_bit_error().map_or(false, BitError::is_not_found)
    }

    fn is_fatal(&self) -> bool {
        !self.is_not_found_err()
    }
}

impl BitErrorExt for BitGenericError {
    fn as_bit_error(&self) -> Option<&BitError> {
        self.downcast_ref::<BitError>()
    }
}

pub trait BitResultExt<T> {
    /// Converts a not-found error into `Ok(None)`, propagating anything else.
    fn none_if_not_found(self) -> BitResult<Option<T>>;
}

impl<T> BitResultExt<T> for BitResult<T> {
    fn none_if_not_found(self) -> BitResult<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(err) if err.is_not_found_err() => Ok(None),
            Err(err) => Err(err),
        }
    }
}
