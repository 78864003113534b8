//! Client-side chunk producer.
//!
//! Walks a path (file or directory tree), splits each file into fixed
//! 1 KiB chunks, and pushes them through the supervised bus connection
//! with bounded concurrency, outage gating, and per-chunk retry. Also
//! implements resume: query the service for the missing indices of an
//! interrupted transfer and retransmit exactly those.

mod chunker;
mod progress;
mod sender;

pub use chunker::{ChunkPlan, read_chunk, read_chunk_from};
pub use progress::FileProgress;
pub use sender::FileSender;

use chunkbus_bus_client::CallError;

/// Errors surfaced by the producer.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("call failed: {0}")]
    Call(#[from] CallError),

    #[error("file too large for the wire format: {0} bytes")]
    TooLarge(u64),

    #[error("identifier exceeds the wire limit: {0}")]
    IdentifierTooLong(String),

    #[error("transfer {0} unknown to the service")]
    UnknownTransfer(String),

    #[error("malformed reply: {0}")]
    MalformedReply(String),

    #[error("{failed} of {total} chunks failed")]
    ChunksFailed { failed: usize, total: usize },

    #[error("{failed} of {total} files failed")]
    FilesFailed { failed: usize, total: usize },

    #[error("connection lost during resume")]
    ResumeInterrupted,
}
