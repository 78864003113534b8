//! Server-side chunk receiver and file assembler.
//!
//! Accepts [`FileChunkMsg`] frames in any order, caches them in memory
//! under a global byte budget, tracks per-transfer completion through a
//! received-bitmap, and finalises completed transfers to disk with the
//! original mode bits. Answers the status and missing-chunk queries that
//! drive resume.
//!
//! [`FileChunkMsg`]: chunkbus_protocol::messages::FileChunkMsg

mod assembler;
mod status;

pub use assembler::FileReceiver;
pub use status::TransferStatus;

/// Errors surfaced by the receiver. Everything except
/// [`InvalidChunk`](ReceiveError::InvalidChunk) leaves the transfer's
/// cached state intact and recoverable.
#[derive(Debug, thiserror::Error)]
pub enum ReceiveError {
    #[error("invalid chunk: {0}")]
    InvalidChunk(String),

    #[error("chunk does not fit the memory budget")]
    BudgetExceeded,

    #[error("chunk {index} of transfer {transfer} missing at finalisation")]
    MissingChunk { transfer: String, index: i32 },

    #[error("transfer {transfer} changed shape mid-flight")]
    ShapeMismatch { transfer: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wrote {written} bytes, expected {expected}")]
    LengthMismatch { written: i64, expected: i64 },
}
