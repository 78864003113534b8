use serde::{Deserialize, Serialize};

use crate::constants::CHUNK_SIZE;

// Wire-boundary capacity limits for identifier strings. Internal code uses
// length-carrying `String`s; these bounds are enforced when a frame is
// built or validated.
pub const USERID_MAX: usize = 19;
pub const FILE_NAME_MAX: usize = 255;
pub const TRANSFER_ID_MAX: usize = 63;

/// Number of chunks a file of `file_length` bytes splits into.
pub fn chunk_count(file_length: u64) -> u64 {
    file_length.div_ceil(CHUNK_SIZE as u64)
}

/// Four-field echo record, signature `(bids)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestInfo {
    pub bool_param: bool,
    pub int_param: i32,
    pub double_param: f64,
    pub string_param: String,
}

// Single-value payload bodies for the echo members and boolean returns.

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoolValue {
    pub value: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntValue {
    pub value: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DoubleValue {
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringValue {
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfoValue {
    pub value: TestInfo,
}

/// Wire record for one file chunk, signature `(ayssiuiiubs)`.
///
/// `data` is base64-encoded in JSON and carries exactly `chunk_length`
/// bytes. All chunks of one transfer share everything except `data`,
/// `file_index`, `chunk_length`, and `is_last_chunk`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChunkMsg {
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub userid: String,
    pub file_name: String,
    pub file_index: i32,
    pub total_chunks: u32,
    pub chunk_length: i32,
    pub file_length: i32,
    pub file_mode: u32,
    /// Advisory only; `total_chunks` is authoritative.
    pub is_last_chunk: bool,
    /// Identifies a resumable session. Empty disables resume.
    #[serde(default)]
    pub transfer_id: String,
}

impl FileChunkMsg {
    /// Expected payload length of chunk `index` in a file of
    /// `file_length` bytes split into `total_chunks` chunks.
    pub fn expected_length(file_length: i32, total_chunks: u32, index: i32) -> i32 {
        if (index as u32) + 1 < total_chunks {
            CHUNK_SIZE as i32
        } else {
            file_length - index * CHUNK_SIZE as i32
        }
    }

    /// Validates the frame against the wire invariants. Violations are
    /// rejected before any receiver state is touched.
    pub fn validate(&self) -> Result<(), String> {
        if self.userid.len() > USERID_MAX {
            return Err(format!("userid exceeds {USERID_MAX} bytes"));
        }
        if self.file_name.is_empty() || self.file_name.len() > FILE_NAME_MAX {
            return Err(format!("fileName empty or exceeds {FILE_NAME_MAX} bytes"));
        }
        if self.transfer_id.len() > TRANSFER_ID_MAX {
            return Err(format!("transferId exceeds {TRANSFER_ID_MAX} bytes"));
        }
        if self.file_length < 0 {
            return Err("negative fileLength".into());
        }
        if self.total_chunks == 0 {
            return Err("totalChunks must be at least 1".into());
        }
        if chunk_count(self.file_length as u64) != self.total_chunks as u64 {
            return Err(format!(
                "totalChunks {} inconsistent with fileLength {}",
                self.total_chunks, self.file_length
            ));
        }
        if self.file_index < 0 || self.file_index as u32 >= self.total_chunks {
            return Err(format!(
                "fileIndex {} out of range 0..{}",
                self.file_index, self.total_chunks
            ));
        }
        let expected =
            Self::expected_length(self.file_length, self.total_chunks, self.file_index);
        if self.chunk_length != expected {
            return Err(format!(
                "chunkLength {} but index {} of this file holds {} bytes",
                self.chunk_length, self.file_index, expected
            ));
        }
        if self.data.len() != self.chunk_length as usize {
            return Err(format!(
                "payload carries {} bytes, chunkLength says {}",
                self.data.len(),
                self.chunk_length
            ));
        }
        Ok(())
    }
}

/// Arguments of `GetTransferStatus` and `GetMissingChunks`, signature `(sss)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferQuery {
    pub transfer_id: String,
    pub userid: String,
    pub file_name: String,
}

/// Return body of `GetTransferStatus`, signature `(sisiiuibtt)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferStatusMsg {
    pub transfer_id: String,
    pub status_code: i32,
    pub status_message: String,
    pub total_chunks: i32,
    pub received_chunks: i32,
    pub file_length: u32,
    pub received_length: i32,
    pub is_completed: bool,
    pub start_time_epoch: u64,
    pub last_update_epoch: u64,
}

/// Return body of `GetMissingChunks`, signature `(ai)`. Indices ascending.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissingChunksMsg {
    pub indices: Vec<i32>,
}

/// Custom base64 serde module for the chunk byte payload.
mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
