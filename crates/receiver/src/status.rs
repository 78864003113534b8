//! Per-transfer progress accounting.

use std::time::{SystemTime, UNIX_EPOCH};

use chunkbus_protocol::constants::{STATUS_ERROR, STATUS_OK};
use chunkbus_protocol::messages::TransferStatusMsg;

fn epoch_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Authoritative progress record of one transfer.
///
/// The bitmap is the source of truth for resume; `received_chunks` and
/// `received_bytes` are derived counters kept in lock-step by
/// [`mark`](TransferStatus::mark).
#[derive(Debug, Clone)]
pub struct TransferStatus {
    pub transfer_id: String,
    pub total_chunks: u32,
    pub file_length: i32,
    pub received_chunks: u32,
    pub received_bytes: i64,
    pub status_code: i32,
    pub status_message: String,
    pub bitmap: Vec<bool>,
    pub is_completed: bool,
    /// Set once the output file is on disk; the record is then a
    /// tombstone kept for post-completion queries.
    pub finalized: bool,
    pub started_at: SystemTime,
    pub updated_at: SystemTime,
}

impl TransferStatus {
    pub fn new(transfer_id: &str, total_chunks: u32, file_length: i32) -> Self {
        let now = SystemTime::now();
        Self {
            transfer_id: transfer_id.to_owned(),
            total_chunks,
            file_length,
            received_chunks: 0,
            received_bytes: 0,
            status_code: STATUS_OK,
            status_message: String::new(),
            bitmap: vec![false; total_chunks as usize],
            is_completed: false,
            finalized: false,
            started_at: now,
            updated_at: now,
        }
    }

    /// Marks chunk `index` received. Counters move only on the first set
    /// of a bit, so duplicates never double-count. Returns `true` when
    /// the bit was newly set.
    pub fn mark(&mut self, index: i32, chunk_length: i32) -> bool {
        let slot = &mut self.bitmap[index as usize];
        let newly_set = !*slot;
        if newly_set {
            *slot = true;
            self.received_chunks += 1;
            self.received_bytes += chunk_length as i64;
            self.is_completed = self.received_chunks == self.total_chunks;
        }
        self.updated_at = SystemTime::now();
        newly_set
    }

    /// Indices still missing, ascending.
    pub fn missing(&self) -> Vec<i32> {
        self.bitmap
            .iter()
            .enumerate()
            .filter(|(_, set)| !**set)
            .map(|(i, _)| i as i32)
            .collect()
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.status_code = STATUS_ERROR;
        self.status_message = message.into();
        self.updated_at = SystemTime::now();
    }

    /// Wire form for `GetTransferStatus`.
    pub fn to_msg(&self) -> TransferStatusMsg {
        TransferStatusMsg {
            transfer_id: self.transfer_id.clone(),
            status_code: self.status_code,
            status_message: self.status_message.clone(),
            total_chunks: self.total_chunks as i32,
            received_chunks: self.received_chunks as i32,
            file_length: self.file_length as u32,
            received_length: self.received_bytes as i32,
            is_completed: self.is_completed,
            start_time_epoch: epoch_secs(self.started_at),
            last_update_epoch: epoch_secs(self.updated_at),
        }
    }
}
