//! Fixed-size chunk reads and wire-record construction.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use chunkbus_protocol::constants::CHUNK_SIZE;
use chunkbus_protocol::messages::FileChunkMsg;

/// Reads chunk `index` of `path` through its own file handle.
///
/// Every chunk task opens the file independently so parallel tasks never
/// race on a shared cursor.
pub fn read_chunk(path: &Path, index: i32) -> std::io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    read_chunk_from(&mut file, index)
}

/// Reads chunk `index` from an already-open handle (resume reuses one
/// descriptor and seeks per missing index).
pub fn read_chunk_from(file: &mut File, index: i32) -> std::io::Result<Vec<u8>> {
    file.seek(SeekFrom::Start(index as u64 * CHUNK_SIZE as u64))?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut filled = 0;
    while filled < CHUNK_SIZE {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

/// The fields shared by every chunk of one transfer.
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    pub userid: String,
    pub file_name: String,
    pub transfer_id: String,
    pub total_chunks: u32,
    pub file_length: i32,
    pub file_mode: u32,
}

impl ChunkPlan {
    /// Builds the wire record for chunk `index` around `data`.
    pub fn msg(&self, index: i32, data: Vec<u8>) -> FileChunkMsg {
        FileChunkMsg {
            chunk_length: data.len() as i32,
            data,
            userid: self.userid.clone(),
            file_name: self.file_name.clone(),
            file_index: index,
            total_chunks: self.total_chunks,
            file_length: self.file_length,
            file_mode: self.file_mode,
            is_last_chunk: (index as u32) + 1 == self.total_chunks,
            transfer_id: self.transfer_id.clone(),
        }
    }
}
