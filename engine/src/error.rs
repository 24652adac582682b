//! The engine-wide error taxonomy.
//!
//! Device failures are wrapped via `#[from]` and travel upward unchanged;
//! everything else describes a condition the engine itself detected.
//! Corruption variants (`DecodeFail`, `CorruptBlockMap`, `CorruptChain`)
//! are reported to the caller rather than panicking: a damaged image is
//! recoverable input, not a bug.

use halfs_api::error::ApiError;
use thiserror::Error;

/// Which kind of on-disk record failed to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// A primary inode block.
    Inode,
    /// A continuation block.
    Continuation,
    /// Either kind; the tag byte itself was unrecognizable.
    Carrier,
}

/// Error type of the storage engine.
#[derive(Error, Debug)]
pub enum HalfsError {
    /// The allocator could not satisfy a request.
    #[error("block allocation failed")]
    AllocFailed,
    /// A block that is already free was passed to `unalloc_blocks`.
    #[error("double free of block {0}")]
    DoubleFree(u64),
    /// A stream offset points past the end of the allocated chain.
    #[error("stream offset past the end of the allocated chain")]
    InvalidStreamIndex,
    /// Magic-marker mismatch or structural inconsistency while decoding.
    #[error("failed to decode an on-disk {0:?} record")]
    DecodeFail(RecordKind),
    /// The persisted block map violates its invariants.
    #[error("corrupt block map: {0}")]
    CorruptBlockMap(&'static str),
    /// A continuation chain contains a cycle or exceeds the device size.
    #[error("corrupt carrier chain")]
    CorruptChain,
    /// Invalid input to the engine (unsupported geometry, reserved block).
    #[error("invalid engine input: {0}")]
    Input(&'static str),
    /// The block device reported a failure.
    #[error("device failure")]
    Device(#[from] ApiError),
}

/// Shorthand for results produced by the engine.
pub type Result<T> = std::result::Result<T, HalfsError>;
