//! End-to-end scenarios over a real loopback bus.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tempfile::TempDir;

use chunkbus_e2e::{ServerStack, connect_client, test_data};
use chunkbus_protocol::Message;
use chunkbus_protocol::constants::{CHUNK_SIZE, Member};
use chunkbus_protocol::messages::{
    BoolValue, InfoValue, MissingChunksMsg, TestInfo, TransferQuery, TransferStatusMsg,
};
use chunkbus_sender::ChunkPlan;

fn write_file(path: &std::path::Path, data: &[u8]) {
    std::fs::write(path, data).unwrap();
}

async fn query_status(
    supervisor: &Arc<chunkbus_bus_client::ConnectionSupervisor>,
    transfer_id: &str,
    file_name: &str,
) -> TransferStatusMsg {
    let query = TransferQuery {
        transfer_id: transfer_id.into(),
        userid: "u".into(),
        file_name: file_name.into(),
    };
    let reply = supervisor
        .call(Member::GetTransferStatus, Some(&query))
        .await
        .unwrap();
    reply.parse_payload().unwrap().unwrap()
}

async fn query_missing(
    supervisor: &Arc<chunkbus_bus_client::ConnectionSupervisor>,
    transfer_id: &str,
    file_name: &str,
) -> Vec<i32> {
    let query = TransferQuery {
        transfer_id: transfer_id.into(),
        userid: "u".into(),
        file_name: file_name.into(),
    };
    let reply = supervisor
        .call(Member::GetMissingChunks, Some(&query))
        .await
        .unwrap();
    let missing: MissingChunksMsg = reply.parse_payload().unwrap().unwrap();
    missing.indices
}

// Scenario A: a 2600-byte file travels as chunks {1024, 1024, 552} and
// lands with its mode bits.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn round_trip_of_a_small_file() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let data = test_data(2600);
    let path = src.path().join("foo.bin");
    write_file(&path, &data);

    let stack = ServerStack::start(out.path(), 1 << 20, 0).await;
    let (supervisor, sender) = connect_client(stack.port().await).await;

    sender.send_file(&path, "u", 0o644, "T1").await.unwrap();

    let final_path = out.path().join("foo.bin");
    let written = std::fs::read(&final_path).unwrap();
    assert_eq!(written.len(), 2600);
    assert_eq!(written, data);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&final_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o7777, 0o644);
    }

    let status = query_status(&supervisor, "T1", "foo.bin").await;
    assert!(status.is_completed);
    assert_eq!(status.received_chunks, 3);
    assert_eq!(status.file_length, 2600);

    supervisor.shutdown().await;
    stack.stop().await;
}

// Scenario B: indices delivered [2, 0, 1]; the bitmap reflects each
// intermediate state and the assembled file matches the source.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn out_of_order_delivery() {
    let out = TempDir::new().unwrap();
    let data = test_data(2600);

    let stack = ServerStack::start(out.path(), 1 << 20, 0).await;
    let (supervisor, _sender) = connect_client(stack.port().await).await;

    let plan = ChunkPlan {
        userid: "u".into(),
        file_name: "ooo.bin".into(),
        transfer_id: "T2".into(),
        total_chunks: 3,
        file_length: 2600,
        file_mode: 0o600,
    };
    let slice = |index: usize| {
        let start = index * CHUNK_SIZE;
        data[start..(start + CHUNK_SIZE).min(data.len())].to_vec()
    };

    for (sent, expected_missing) in [(2usize, vec![0, 1]), (0, vec![1]), (1, vec![])] {
        let reply = supervisor
            .call(Member::SendFileChunk, Some(&plan.msg(sent as i32, slice(sent))))
            .await
            .unwrap();
        let accepted: BoolValue = reply.parse_payload().unwrap().unwrap();
        assert!(accepted.value);

        assert_eq!(
            query_missing(&supervisor, "T2", "ooo.bin").await,
            expected_missing
        );
    }

    assert_eq!(std::fs::read(out.path().join("ooo.bin")).unwrap(), data);
    let status = query_status(&supervisor, "T2", "ooo.bin").await;
    assert!(status.is_completed);

    supervisor.shutdown().await;
    stack.stop().await;
}

// Scenario C: only chunks {0, 2} arrive; resume reads exactly the
// missing region and completes the file.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn resume_after_dropped_chunks() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let data = test_data(2600);
    let path = src.path().join("gap.bin");
    write_file(&path, &data);

    let stack = ServerStack::start(out.path(), 1 << 20, 0).await;
    let (supervisor, sender) = connect_client(stack.port().await).await;

    let plan = ChunkPlan {
        userid: "u".into(),
        file_name: "gap.bin".into(),
        transfer_id: "T3".into(),
        total_chunks: 3,
        file_length: 2600,
        file_mode: 0o644,
    };
    for index in [0usize, 2] {
        let start = index * CHUNK_SIZE;
        let bytes = data[start..(start + CHUNK_SIZE).min(data.len())].to_vec();
        supervisor
            .call(Member::SendFileChunk, Some(&plan.msg(index as i32, bytes)))
            .await
            .unwrap();
    }

    assert_eq!(query_missing(&supervisor, "T3", "gap.bin").await, vec![1]);

    let sent = sender.resume("T3", "u", &path).await.unwrap();
    assert_eq!(sent, 1);

    assert_eq!(std::fs::read(out.path().join("gap.bin")).unwrap(), data);
    assert!(query_status(&supervisor, "T3", "gap.bin").await.is_completed);

    supervisor.shutdown().await;
    stack.stop().await;
}

// Scenario D: SetTestInfo broadcasts exactly one TestInfoChanged with
// identical fields, and GetTestInfo echoes the record.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn echo_roundtrip_with_broadcast() {
    let out = TempDir::new().unwrap();
    let stack = ServerStack::start(out.path(), 1 << 20, 0).await;
    let (supervisor, _sender) = connect_client(stack.port().await).await;

    let seen = Arc::new(std::sync::Mutex::new(Vec::<TestInfo>::new()));
    let sink = seen.clone();
    supervisor.subscribe(
        Member::TestInfoChanged,
        Arc::new(move |msg: Message| {
            if let Ok(Some(v)) = msg.parse_payload::<InfoValue>() {
                sink.lock().unwrap().push(v.value);
            }
        }),
    );

    let info = TestInfo {
        bool_param: true,
        int_param: 123,
        double_param: 4.56,
        string_param: "x".into(),
    };
    let reply = supervisor
        .call(
            Member::SetTestInfo,
            Some(&InfoValue {
                value: info.clone(),
            }),
        )
        .await
        .unwrap();
    let accepted: BoolValue = reply.parse_payload().unwrap().unwrap();
    assert!(accepted.value);

    // Exactly one broadcast with identical fields.
    tokio::time::timeout(Duration::from_secs(2), async {
        while seen.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    {
        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0], info);
    }

    let reply = supervisor.call::<()>(Member::GetTestInfo, None).await.unwrap();
    let got: InfoValue = reply.parse_payload().unwrap().unwrap();
    assert_eq!(got.value, info);

    supervisor.shutdown().await;
    stack.stop().await;
}

// Scenario E: a transfer larger than the admission budget still
// completes; backpressure is latency, not loss.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn admission_backpressure_still_completes() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let data = test_data(10 * CHUNK_SIZE);
    let path = src.path().join("press.bin");
    write_file(&path, &data);

    // Budget of four chunks.
    let stack = ServerStack::start(out.path(), 4096, 0).await;
    let (supervisor, sender) = connect_client(stack.port().await).await;

    sender.send_file(&path, "u", 0o644, "T5").await.unwrap();

    assert_eq!(std::fs::read(out.path().join("press.bin")).unwrap(), data);
    let status = query_status(&supervisor, "T5", "press.bin").await;
    assert!(status.is_completed);
    assert_eq!(status.received_chunks, 10);

    supervisor.shutdown().await;
    stack.stop().await;
}

// Scenario F: the server restarts mid-transfer; the client rides the
// outage gate, retries, and finishes the session with a resume pass.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reconnect_during_transfer() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let data = test_data(50 * CHUNK_SIZE);
    let path = src.path().join("big.bin");
    write_file(&path, &data);

    let stack = ServerStack::start(out.path(), 1 << 20, 0).await;
    let port = stack.port().await;
    let (supervisor, sender) = connect_client(port).await;

    let send_task = {
        let sender = sender.clone();
        let path = path.clone();
        tokio::spawn(async move { sender.send_file(&path, "u", 0o644, "T6").await })
    };

    // Let some chunks through, then kill the server.
    tokio::time::sleep(Duration::from_millis(100)).await;
    stack.stop().await;

    // Bring a fresh server up on the same port and same outdir. Its
    // receiver state starts empty; chunks acknowledged by the dead
    // server are gone and must be resumed afterwards.
    let stack2 = ServerStack::start(out.path(), 1 << 20, port).await;

    // The sender rides the outage out on the gate and retries; how much
    // of the transfer the dead server took with it depends on timing.
    let send_result = send_task.await.unwrap();
    assert!(supervisor.wait_connected(Duration::from_secs(5)).await);

    let status = query_status(&supervisor, "T6", "big.bin").await;
    if !(send_result.is_ok() && status.is_completed) {
        let missing = query_missing(&supervisor, "T6", "big.bin").await;
        if missing.is_empty() {
            // Nothing of the session survived the restart; run it again.
            sender.send_file(&path, "u", 0o644, "T6").await.unwrap();
        } else {
            sender.resume("T6", "u", &path).await.unwrap();
        }
    }

    let status = query_status(&supervisor, "T6", "big.bin").await;
    assert!(status.is_completed);
    assert_eq!(std::fs::read(out.path().join("big.bin")).unwrap(), data);

    supervisor.shutdown().await;
    stack2.stop().await;
}

// Idempotence over the wire: the same chunk twice counts once.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_send_counts_once() {
    let out = TempDir::new().unwrap();
    let data = test_data(2600);

    let stack = ServerStack::start(out.path(), 1 << 20, 0).await;
    let (supervisor, _sender) = connect_client(stack.port().await).await;

    let plan = ChunkPlan {
        userid: "u".into(),
        file_name: "twice.bin".into(),
        transfer_id: "T7".into(),
        total_chunks: 3,
        file_length: 2600,
        file_mode: 0o644,
    };
    for _ in 0..2 {
        supervisor
            .call(
                Member::SendFileChunk,
                Some(&plan.msg(0, data[..CHUNK_SIZE].to_vec())),
            )
            .await
            .unwrap();
    }

    let status = query_status(&supervisor, "T7", "twice.bin").await;
    assert_eq!(status.received_chunks, 1);
    assert_eq!(status.received_length, 1024);

    supervisor.shutdown().await;
    stack.stop().await;
}

// The heartbeat keeps probing an idle connection without tearing it
// down when the service answers.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn heartbeat_keeps_idle_connection_alive() {
    let out = TempDir::new().unwrap();
    let stack = ServerStack::start(out.path(), 1 << 20, 0).await;
    let (supervisor, _sender) = connect_client(stack.port().await).await;

    let drops = Arc::new(AtomicUsize::new(0));
    let d = drops.clone();
    supervisor.add_listener(Box::new(move |connected| {
        if !connected {
            d.fetch_add(1, Ordering::SeqCst);
        }
    }));

    // Several heartbeat periods of idleness.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    assert_eq!(
        supervisor.state(),
        chunkbus_bus_client::ConnectionState::Connected
    );

    supervisor.shutdown().await;
    stack.stop().await;
}
