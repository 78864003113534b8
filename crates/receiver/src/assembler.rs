//! Chunk admission, caching, and finalisation to disk.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tokio::sync::Semaphore;

use chunkbus_protocol::messages::FileChunkMsg;

use crate::{ReceiveError, TransferStatus};

struct TransferCache {
    file_name: String,
    file_mode: u32,
    chunks: HashMap<i32, Vec<u8>>,
}

impl TransferCache {
    fn bytes(&self) -> usize {
        self.chunks.values().map(Vec::len).sum()
    }
}

/// Receives chunks, assembles files, answers resume queries.
///
/// Admission control is a byte-granular semaphore sized to the in-flight
/// memory budget: a chunk acquires its length in permits before any
/// processing and releases them once it is committed (or discarded), so
/// at most the budget's worth of chunks is ever mid-processing.
/// Saturation shows up to senders as call latency only; nothing is
/// dropped. Committed chunks live in the per-transfer assembly cache,
/// whose residency is bounded by the file length, until finalisation
/// frees the whole transfer.
pub struct FileReceiver {
    outdir: PathBuf,
    budget_bytes: usize,
    budget: Semaphore,
    caches: Mutex<HashMap<String, TransferCache>>,
    statuses: Mutex<HashMap<String, TransferStatus>>,
}

impl FileReceiver {
    /// Creates a receiver writing finalised files into `outdir` (created
    /// if absent) under an in-flight byte budget.
    pub fn new(outdir: impl Into<PathBuf>, budget_bytes: usize) -> std::io::Result<Self> {
        let outdir = outdir.into();
        std::fs::create_dir_all(&outdir)?;
        Ok(Self {
            outdir,
            budget_bytes,
            budget: Semaphore::new(budget_bytes),
            caches: Mutex::new(HashMap::new()),
            statuses: Mutex::new(HashMap::new()),
        })
    }

    /// Ingests one chunk. Blocks (async) on admission while the byte
    /// budget is exhausted. Duplicates are idempotent. When the chunk
    /// completes its transfer, the file is finalised before returning.
    pub async fn receive_chunk(&self, mut chunk: FileChunkMsg) -> Result<(), ReceiveError> {
        chunk.validate().map_err(ReceiveError::InvalidChunk)?;
        if chunk.chunk_length as usize > self.budget_bytes {
            return Err(ReceiveError::BudgetExceeded);
        }
        let key = transfer_key(&chunk);

        {
            let statuses = self.statuses.lock().unwrap();
            if let Some(status) = statuses.get(&key) {
                if status.finalized {
                    // The file is already on disk; a late duplicate is a no-op.
                    return Ok(());
                }
                if status.total_chunks != chunk.total_chunks
                    || status.file_length != chunk.file_length
                {
                    return Err(ReceiveError::ShapeMismatch { transfer: key });
                }
            }
        }

        // Admission: charge this chunk's bytes for the whole of its
        // processing (cache commit, bitmap update, possible finalisation).
        // The permit drops on every exit path, including discards.
        let _permit = self
            .budget
            .acquire_many(chunk.chunk_length as u32)
            .await
            .expect("budget semaphore is never closed");

        let data = std::mem::take(&mut chunk.data);
        {
            let mut caches = self.caches.lock().unwrap();
            let cache = caches.entry(key.clone()).or_insert_with(|| TransferCache {
                file_name: chunk.file_name.clone(),
                file_mode: chunk.file_mode,
                chunks: HashMap::new(),
            });
            // Duplicate indices overwrite; the old buffer is freed.
            cache.chunks.insert(chunk.file_index, data);
        }

        let ready = {
            let mut statuses = self.statuses.lock().unwrap();
            let status = statuses.entry(key.clone()).or_insert_with(|| {
                TransferStatus::new(&chunk.transfer_id, chunk.total_chunks, chunk.file_length)
            });
            if status.finalized {
                // Lost a race with finalisation; drop the stray entry.
                drop(statuses);
                self.caches.lock().unwrap().remove(&key);
                return Ok(());
            }
            if status.total_chunks != chunk.total_chunks || status.file_length != chunk.file_length
            {
                return Err(ReceiveError::ShapeMismatch { transfer: key });
            }
            let newly_set = status.mark(chunk.file_index, chunk.chunk_length);
            newly_set && status.is_completed
        };

        if ready {
            self.finalize(&key)?;
        }
        Ok(())
    }

    /// Status of a transfer, or the unknown sentinel (`statusCode = 2`,
    /// zero counts).
    pub fn status(
        &self,
        transfer_id: &str,
        userid: &str,
        file_name: &str,
    ) -> chunkbus_protocol::messages::TransferStatusMsg {
        let key = query_key(transfer_id, userid, file_name);
        match self.statuses.lock().unwrap().get(&key) {
            Some(status) => status.to_msg(),
            None => chunkbus_protocol::messages::TransferStatusMsg {
                transfer_id: transfer_id.to_owned(),
                status_code: chunkbus_protocol::constants::STATUS_ERROR,
                status_message: "unknown transfer".into(),
                ..Default::default()
            },
        }
    }

    /// Missing chunk indices, ascending. Unknown transfers yield an
    /// empty list.
    pub fn missing_chunks(&self, transfer_id: &str, userid: &str, file_name: &str) -> Vec<i32> {
        let key = query_key(transfer_id, userid, file_name);
        self.statuses
            .lock()
            .unwrap()
            .get(&key)
            .map(|status| status.missing())
            .unwrap_or_default()
    }

    /// Bytes currently charged against the admission budget (chunks in
    /// flight between admission and commit). Never exceeds the budget.
    pub fn used_bytes(&self) -> usize {
        self.budget_bytes - self.budget.available_permits()
    }

    /// Bytes resident in the assembly caches awaiting finalisation.
    pub fn cached_bytes(&self) -> usize {
        self.caches
            .lock()
            .unwrap()
            .values()
            .map(TransferCache::bytes)
            .sum()
    }

    /// Transfers with live cached state (completed tombstones excluded).
    pub fn active_transfers(&self) -> usize {
        self.caches.lock().unwrap().len()
    }

    /// Output directory for finalised files.
    pub fn outdir(&self) -> &Path {
        &self.outdir
    }

    /// Concatenates the cached chunks into the output file, applies the
    /// mode bits, and frees the transfer's cache. On failure the cache
    /// is reinstated and the status marked `ERROR`, leaving the transfer
    /// inspectable.
    fn finalize(&self, key: &str) -> Result<(), ReceiveError> {
        let Some((total_chunks, file_length)) = ({
            let statuses = self.statuses.lock().unwrap();
            statuses.get(key).map(|s| (s.total_chunks, s.file_length))
        }) else {
            return Ok(());
        };

        let Some(cache) = self.caches.lock().unwrap().remove(key) else {
            return Ok(());
        };

        match self.write_out(key, &cache, total_chunks, file_length) {
            Ok(path) => {
                if let Some(status) = self.statuses.lock().unwrap().get_mut(key) {
                    status.finalized = true;
                }
                tracing::info!(
                    transfer = key,
                    path = %path.display(),
                    bytes = file_length,
                    "transfer finalised"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(transfer = key, error = %e, "finalisation failed");
                self.caches.lock().unwrap().insert(key.to_owned(), cache);
                if let Some(status) = self.statuses.lock().unwrap().get_mut(key) {
                    status.set_error(e.to_string());
                }
                Err(e)
            }
        }
    }

    fn write_out(
        &self,
        key: &str,
        cache: &TransferCache,
        total_chunks: u32,
        file_length: i32,
    ) -> Result<PathBuf, ReceiveError> {
        for index in 0..total_chunks as i32 {
            if !cache.chunks.contains_key(&index) {
                return Err(ReceiveError::MissingChunk {
                    transfer: key.to_owned(),
                    index,
                });
            }
        }

        let base = Path::new(&cache.file_name)
            .file_name()
            .ok_or_else(|| ReceiveError::InvalidChunk("fileName has no basename".into()))?;
        let path = self.outdir.join(base);

        let mut file = std::fs::File::create(&path)?;
        let mut written: i64 = 0;
        for index in 0..total_chunks as i32 {
            let bytes = &cache.chunks[&index];
            file.write_all(bytes)?;
            written += bytes.len() as i64;
        }
        file.flush()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(
                &path,
                std::fs::Permissions::from_mode(cache.file_mode & 0o7777),
            )?;
        }

        if written != file_length as i64 {
            return Err(ReceiveError::LengthMismatch {
                written,
                expected: file_length as i64,
            });
        }
        Ok(path)
    }
}

/// Transfer identity: `transferId` alone when present; otherwise the
/// legacy `fileName_userid` key, which disables resume for the transfer.
fn transfer_key(chunk: &FileChunkMsg) -> String {
    query_key(&chunk.transfer_id, &chunk.userid, &chunk.file_name)
}

fn query_key(transfer_id: &str, userid: &str, file_name: &str) -> String {
    if transfer_id.is_empty() {
        format!("{file_name}_{userid}")
    } else {
        transfer_id.to_owned()
    }
}
