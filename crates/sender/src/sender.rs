//! The chunk producer: directory walk, per-chunk tasks, resume.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{info, warn};

use chunkbus_bus_client::{CallError, ConnectionState, ConnectionSupervisor};
use chunkbus_protocol::constants::{
    CHUNK_RETRY_DELAY, CHUNK_RETRY_LIMIT, MAX_CONCURRENT_FILES, Member, OUTAGE_WAIT,
    RESUME_RETRY_LIMIT, STATUS_ERROR,
};
use chunkbus_protocol::messages::{
    BoolValue, FILE_NAME_MAX, MissingChunksMsg, TRANSFER_ID_MAX, TransferQuery,
    TransferStatusMsg, USERID_MAX, chunk_count,
};
use chunkbus_task_pool::TaskPool;

use crate::chunker::{ChunkPlan, read_chunk, read_chunk_from};
use crate::progress::FileProgress;
use crate::SendError;

/// Sends files and directory trees through the supervised connection.
///
/// Cheap to clone; all state is shared. At most
/// [`MAX_CONCURRENT_FILES`] files are in flight per producer (the
/// receiving side relies on its own admission control).
#[derive(Clone)]
pub struct FileSender {
    supervisor: Arc<ConnectionSupervisor>,
    pool: Arc<TaskPool>,
    file_slots: Arc<Semaphore>,
}

impl FileSender {
    pub fn new(supervisor: Arc<ConnectionSupervisor>, pool: Arc<TaskPool>) -> Self {
        Self {
            supervisor,
            pool,
            file_slots: Arc::new(Semaphore::new(MAX_CONCURRENT_FILES)),
        }
    }

    /// Sends `path`: a regular file as one transfer, a directory as one
    /// transfer per contained file (recursively), with per-file transfer
    /// ids derived from `transfer_id`.
    pub async fn send_entry(
        &self,
        path: &Path,
        userid: &str,
        mode: u32,
        transfer_id: &str,
    ) -> Result<(), SendError> {
        let meta = std::fs::metadata(path)?;
        if meta.is_dir() {
            self.send_dir(path, userid, mode, transfer_id).await
        } else {
            self.send_file(path, userid, mode, transfer_id).await
        }
    }

    async fn send_dir(
        &self,
        path: &Path,
        userid: &str,
        mode: u32,
        transfer_id: &str,
    ) -> Result<(), SendError> {
        let mut files = Vec::new();
        collect_files(path, String::new(), &mut files);
        let total = files.len();
        info!(dir = %path.display(), files = total, "sending directory");

        let mut tasks = Vec::new();
        for (position, (file_path, relative)) in files.into_iter().enumerate() {
            let derived = derive_transfer_id(transfer_id, &relative, position);
            info!(file = %relative, transfer = %derived, "queueing file");

            let this = self.clone();
            let userid = userid.to_owned();
            tasks.push(tokio::spawn(async move {
                this.send_file(&file_path, &userid, mode, &derived).await
            }));
        }

        let mut failed = 0;
        for task in tasks {
            if !matches!(task.await, Ok(Ok(()))) {
                failed += 1;
            }
        }
        if failed > 0 {
            return Err(SendError::FilesFailed { failed, total });
        }
        Ok(())
    }

    /// Sends one file as `totalChunks` parallel chunk tasks and waits
    /// for all of them. Empty files send nothing.
    pub async fn send_file(
        &self,
        path: &Path,
        userid: &str,
        mode: u32,
        transfer_id: &str,
    ) -> Result<(), SendError> {
        if userid.len() > USERID_MAX {
            return Err(SendError::IdentifierTooLong(userid.into()));
        }
        if transfer_id.len() > TRANSFER_ID_MAX {
            return Err(SendError::IdentifierTooLong(transfer_id.into()));
        }
        let file_name = path.to_string_lossy().into_owned();
        if file_name.len() > FILE_NAME_MAX {
            return Err(SendError::IdentifierTooLong(file_name));
        }

        let _slot = self
            .file_slots
            .clone()
            .acquire_owned()
            .await
            .expect("file-slot semaphore is never closed");

        let meta = std::fs::metadata(path)?;
        let len = meta.len();
        if len > i32::MAX as u64 {
            return Err(SendError::TooLarge(len));
        }
        let total_chunks = chunk_count(len) as u32;
        if total_chunks == 0 {
            info!(file = %file_name, "empty file, nothing to send");
            return Ok(());
        }

        info!(
            file = %file_name,
            bytes = len,
            chunks = total_chunks,
            transfer = transfer_id,
            "sending file"
        );

        let plan = Arc::new(ChunkPlan {
            userid: userid.to_owned(),
            file_name,
            transfer_id: transfer_id.to_owned(),
            total_chunks,
            file_length: len as i32,
            file_mode: mode,
        });
        let progress = Arc::new(FileProgress::new(plan.file_name.clone(), total_chunks));

        let mut handles = Vec::with_capacity(total_chunks as usize);
        for index in 0..total_chunks as i32 {
            handles.push(self.pool.submit(send_chunk_task(
                self.supervisor.clone(),
                path.to_path_buf(),
                plan.clone(),
                index,
                progress.clone(),
            )));
        }

        let mut failed = 0;
        for handle in handles {
            if handle.wait().await.is_err() {
                failed += 1;
            }
        }
        if failed > 0 {
            warn!(file = %plan.file_name, failed, total = total_chunks, "file incomplete");
            return Err(SendError::ChunksFailed {
                failed,
                total: total_chunks as usize,
            });
        }
        Ok(())
    }

    /// Resumes an interrupted transfer: asks the service which indices
    /// are missing and retransmits exactly those, sequentially, from one
    /// read-only handle. Returns the number of chunks retransmitted.
    pub async fn resume(
        &self,
        transfer_id: &str,
        userid: &str,
        file_path: &Path,
    ) -> Result<u32, SendError> {
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                SendError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "path has no file name",
                ))
            })?;

        let query = TransferQuery {
            transfer_id: transfer_id.to_owned(),
            userid: userid.to_owned(),
            file_name: file_name.clone(),
        };

        let reply = self
            .supervisor
            .call(Member::GetTransferStatus, Some(&query))
            .await?;
        let status: TransferStatusMsg = reply
            .parse_payload()
            .map_err(|e| SendError::MalformedReply(e.to_string()))?
            .ok_or_else(|| SendError::MalformedReply("empty status reply".into()))?;

        if status.status_code == STATUS_ERROR && status.total_chunks == 0 {
            return Err(SendError::UnknownTransfer(transfer_id.to_owned()));
        }
        if status.is_completed {
            info!(transfer = transfer_id, "transfer already complete");
            return Ok(0);
        }

        let reply = self
            .supervisor
            .call(Member::GetMissingChunks, Some(&query))
            .await?;
        let missing: MissingChunksMsg = reply
            .parse_payload()
            .map_err(|e| SendError::MalformedReply(e.to_string()))?
            .ok_or_else(|| SendError::MalformedReply("empty missing-chunks reply".into()))?;

        info!(
            transfer = transfer_id,
            missing = missing.indices.len(),
            "resuming transfer"
        );

        let mut file = File::open(file_path)?;
        let file_mode = file_mode_of(&file)?;

        // Counts and lengths come from the authoritative status, not the
        // local file.
        let plan = ChunkPlan {
            userid: userid.to_owned(),
            file_name,
            transfer_id: transfer_id.to_owned(),
            total_chunks: status.total_chunks as u32,
            file_length: status.file_length as i32,
            file_mode,
        };

        for &index in &missing.indices {
            let data = read_chunk_from(&mut file, index)?;
            let chunk = plan.msg(index, data);

            let mut sent = false;
            for attempt in 1..=RESUME_RETRY_LIMIT {
                match self
                    .supervisor
                    .call(Member::SendFileChunk, Some(&chunk))
                    .await
                {
                    Ok(reply) => {
                        let accepted = reply
                            .parse_payload::<BoolValue>()
                            .ok()
                            .flatten()
                            .map(|b| b.value)
                            .unwrap_or(false);
                        if accepted {
                            sent = true;
                            break;
                        }
                        warn!(index, attempt, "service refused chunk");
                    }
                    Err(e) if e.is_disconnected() => {
                        // Resume does not ride out outages.
                        return Err(SendError::ResumeInterrupted);
                    }
                    Err(e) => {
                        warn!(index, attempt, error = %e, "resend failed");
                    }
                }
                if attempt < RESUME_RETRY_LIMIT {
                    tokio::time::sleep(CHUNK_RETRY_DELAY).await;
                }
            }
            if !sent {
                return Err(SendError::ChunksFailed {
                    failed: 1,
                    total: missing.indices.len(),
                });
            }
        }

        info!(
            transfer = transfer_id,
            sent = missing.indices.len(),
            "resume complete"
        );
        Ok(missing.indices.len() as u32)
    }
}

/// One pooled chunk task: independent read, supervised send with outage
/// gating and bounded retry.
async fn send_chunk_task(
    supervisor: Arc<ConnectionSupervisor>,
    path: PathBuf,
    plan: Arc<ChunkPlan>,
    index: i32,
    progress: Arc<FileProgress>,
) -> Result<(), String> {
    // An unreadable file at task time skips this chunk only.
    let data = match read_chunk(&path, index) {
        Ok(data) => data,
        Err(e) => {
            warn!(file = %plan.file_name, index, "chunk read failed: {e}");
            return Err(format!("read chunk {index}: {e}"));
        }
    };
    let chunk = plan.msg(index, data);

    for attempt in 1..=CHUNK_RETRY_LIMIT {
        if supervisor.state() != ConnectionState::Connected {
            // Outage gate: give the reconnect worker time to recover.
            if !supervisor.wait_connected(OUTAGE_WAIT).await {
                warn!(index, attempt, "still disconnected after outage wait");
                tokio::time::sleep(CHUNK_RETRY_DELAY).await;
                continue;
            }
        }

        match supervisor.call(Member::SendFileChunk, Some(&chunk)).await {
            Ok(reply) => {
                let accepted = reply
                    .parse_payload::<BoolValue>()
                    .ok()
                    .flatten()
                    .map(|b| b.value)
                    .unwrap_or(false);
                if accepted {
                    progress.chunk_done();
                    return Ok(());
                }
                warn!(index, attempt, "service refused chunk");
            }
            Err(CallError::Method { code, message }) => {
                warn!(index, attempt, code, "chunk rejected: {message}");
            }
            Err(e) => {
                warn!(index, attempt, error = %e, "chunk send failed");
            }
        }
        if attempt < CHUNK_RETRY_LIMIT {
            tokio::time::sleep(CHUNK_RETRY_DELAY).await;
        }
    }

    warn!(file = %plan.file_name, index, "retry budget exhausted");
    Err(format!("chunk {index} retries exhausted"))
}

/// Walks `dir` collecting regular files with their relative paths.
/// Unreadable entries are logged and skipped.
fn collect_files(dir: &Path, prefix: String, out: &mut Vec<(PathBuf, String)>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), "cannot read directory: {e}");
            return;
        }
    };
    for entry in entries {
        let Ok(entry) = entry else { continue };
        let name = entry.file_name().to_string_lossy().into_owned();
        let relative = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}/{name}")
        };
        let path = entry.path();
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_dir() => collect_files(&path, relative, out),
            Ok(meta) if meta.is_file() => out.push((path, relative)),
            Ok(_) => {} // Sockets, fifos and friends are skipped.
            Err(e) => warn!(path = %path.display(), "stat failed: {e}"),
        }
    }
}

/// Per-file transfer id for directory sends: the relative path when it
/// fits the wire limit, otherwise a positional fallback.
fn derive_transfer_id(base: &str, relative: &str, position: usize) -> String {
    let derived = format!("{base}:{relative}");
    if derived.len() <= TRANSFER_ID_MAX {
        derived
    } else {
        format!("{base}:{position}")
    }
}

fn file_mode_of(file: &File) -> std::io::Result<u32> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        Ok(file.metadata()?.permissions().mode() & 0o7777)
    }
    #[cfg(not(unix))]
    {
        let _ = file;
        Ok(0o644)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    use tempfile::TempDir;

    use chunkbus_bus_client::SupervisorConfig;
    use chunkbus_bus_server::{BusServer, ServerConfig};
    use chunkbus_protocol::constants::OBJECT_PATH;
    use chunkbus_receiver::FileReceiver;
    use chunkbus_service::{ServiceDispatcher, TestService};

    struct Stack {
        server: Arc<BusServer<ServiceDispatcher>>,
        server_task: tokio::task::JoinHandle<()>,
        service: Arc<TestService>,
        supervisor: Arc<ConnectionSupervisor>,
        sender: FileSender,
    }

    async fn start_stack(outdir: &Path) -> Stack {
        let receiver = Arc::new(FileReceiver::new(outdir, 1 << 20).unwrap());
        let service = Arc::new(TestService::new(receiver));
        let server_pool = Arc::new(TaskPool::new(4));
        let dispatcher = ServiceDispatcher::new(service.clone(), server_pool);
        let server = BusServer::new(ServerConfig { port: 0 }, dispatcher);

        let s = Arc::clone(&server);
        let server_task = tokio::spawn(async move {
            s.run().await.unwrap();
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let port = server.port().await;

        let config = SupervisorConfig {
            heartbeat_interval: Duration::from_millis(200),
            probe_timeout: Duration::from_millis(500),
            call_timeout: Duration::from_secs(2),
            reconnect_interval: Duration::from_millis(100),
            max_reconnect_attempts: 10,
            auto_reconnect: true,
        };
        let supervisor =
            ConnectionSupervisor::new(format!("ws://127.0.0.1:{port}{OBJECT_PATH}"), config);
        supervisor.init().await.unwrap();

        let sender = FileSender::new(supervisor.clone(), Arc::new(TaskPool::new(4)));
        Stack {
            server,
            server_task,
            service,
            supervisor,
            sender,
        }
    }

    async fn stop_stack(stack: Stack) {
        stack.supervisor.shutdown().await;
        stack.server.shutdown();
        stack.server_task.await.unwrap();
    }

    fn write_file(path: &Path, data: &[u8]) {
        let mut f = File::create(path).unwrap();
        f.write_all(data).unwrap();
    }

    fn test_data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 249) as u8).collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn sends_small_file_end_to_end() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let data = test_data(2600);
        let path = src.path().join("foo.bin");
        write_file(&path, &data);

        let stack = start_stack(out.path()).await;
        stack
            .sender
            .send_file(&path, "u", 0o644, "T1")
            .await
            .unwrap();

        assert_eq!(std::fs::read(out.path().join("foo.bin")).unwrap(), data);
        let status = stack.service.transfer_status("T1", "u", "foo.bin");
        assert!(status.is_completed);
        assert_eq!(status.received_chunks, 3);

        stop_stack(stack).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn empty_file_sends_nothing() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let path = src.path().join("empty.bin");
        write_file(&path, b"");

        let stack = start_stack(out.path()).await;
        stack
            .sender
            .send_file(&path, "u", 0o644, "T-empty")
            .await
            .unwrap();

        // No chunk ever reached the service.
        let status = stack.service.transfer_status("T-empty", "u", "empty.bin");
        assert_eq!(status.status_code, STATUS_ERROR);
        assert!(!out.path().join("empty.bin").exists());

        stop_stack(stack).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn sends_directory_tree() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        std::fs::create_dir(src.path().join("sub")).unwrap();
        let a = test_data(1500);
        let b = test_data(800);
        write_file(&src.path().join("a.bin"), &a);
        write_file(&src.path().join("sub").join("b.bin"), &b);

        let stack = start_stack(out.path()).await;
        stack
            .sender
            .send_entry(src.path(), "u", 0o600, "DIR")
            .await
            .unwrap();

        assert_eq!(std::fs::read(out.path().join("a.bin")).unwrap(), a);
        assert_eq!(std::fs::read(out.path().join("b.bin")).unwrap(), b);

        // Per-file transfer ids derived from the base id.
        let status = stack.service.transfer_status("DIR:a.bin", "u", "a.bin");
        assert!(status.is_completed);
        let status = stack.service.transfer_status("DIR:sub/b.bin", "u", "b.bin");
        assert!(status.is_completed);

        stop_stack(stack).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn resume_sends_exactly_the_missing_chunks() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let data = test_data(2600);
        let path = src.path().join("gap.bin");
        write_file(&path, &data);

        let stack = start_stack(out.path()).await;

        // Seed the service with chunks 0 and 2 only.
        let plan = ChunkPlan {
            userid: "u".into(),
            file_name: "gap.bin".into(),
            transfer_id: "TR".into(),
            total_chunks: 3,
            file_length: 2600,
            file_mode: 0o644,
        };
        for index in [0i32, 2] {
            let bytes = read_chunk(&path, index).unwrap();
            stack
                .service
                .send_file_chunk(plan.msg(index, bytes))
                .await
                .unwrap();
        }
        assert_eq!(
            stack.service.missing_chunks("TR", "u", "gap.bin").indices,
            vec![1]
        );

        let sent = stack.sender.resume("TR", "u", &path).await.unwrap();
        assert_eq!(sent, 1);
        assert_eq!(std::fs::read(out.path().join("gap.bin")).unwrap(), data);
        assert!(stack.service.transfer_status("TR", "u", "gap.bin").is_completed);

        stop_stack(stack).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn resume_unknown_transfer_fails() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let path = src.path().join("x.bin");
        write_file(&path, &test_data(100));

        let stack = start_stack(out.path()).await;
        let result = stack.sender.resume("no-such", "u", &path).await;
        assert!(matches!(result, Err(SendError::UnknownTransfer(_))));

        stop_stack(stack).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn oversized_identifiers_rejected_locally() {
        let src = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let path = src.path().join("x.bin");
        write_file(&path, &test_data(10));

        let stack = start_stack(out.path()).await;

        let long_user = "u".repeat(USERID_MAX + 1);
        assert!(matches!(
            stack.sender.send_file(&path, &long_user, 0o644, "T").await,
            Err(SendError::IdentifierTooLong(_))
        ));

        let long_tid = "t".repeat(TRANSFER_ID_MAX + 1);
        assert!(matches!(
            stack.sender.send_file(&path, "u", 0o644, &long_tid).await,
            Err(SendError::IdentifierTooLong(_))
        ));

        stop_stack(stack).await;
    }

    #[test]
    fn transfer_id_derivation() {
        assert_eq!(derive_transfer_id("D", "a/b.bin", 0), "D:a/b.bin");
        let deep = "x/".repeat(40) + "f.bin";
        assert_eq!(derive_transfer_id("D", &deep, 7), "D:7");
    }
}
