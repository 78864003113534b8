use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Well-known service name the server claims on startup.
pub const SERVICE_NAME: &str = "com.example.TestService";

/// Object path; also used as the WebSocket URL path of the bus endpoint.
pub const OBJECT_PATH: &str = "/com/example/TestService";

/// Interface name every [`Member`] belongs to.
pub const INTERFACE_NAME: &str = "com.example.ITestService";

/// Fixed chunk payload size. Every chunk except possibly the last carries
/// exactly this many bytes.
pub const CHUNK_SIZE: usize = 1024;

/// Default server-side in-flight byte budget (100 MiB). Chunks beyond this
/// wait for admission; senders only observe latency.
pub const MAX_SERVER_MEMORY_BYTES: usize = 100 * 1024 * 1024;

/// Files a single producer will transfer concurrently.
pub const MAX_CONCURRENT_FILES: usize = 100;

/// Default timeout for method calls.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for the heartbeat probe (`GetTestBool`).
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Interval between heartbeat probes.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(3);

/// Spacing between reconnect attempts.
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Reconnect attempts before the supervisor gives up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// How long an outbound sender waits on the outage gate for the
/// connection to come back before counting a retry.
pub const OUTAGE_WAIT: Duration = Duration::from_secs(30);

/// Send retries per chunk during a normal transfer.
pub const CHUNK_RETRY_LIMIT: u32 = 10;

/// Send retries per chunk during a resume.
pub const RESUME_RETRY_LIMIT: u32 = 5;

/// Backoff between chunk send retries.
pub const CHUNK_RETRY_DELAY: Duration = Duration::from_secs(2);

/// How often the socket layer sends WebSocket pings.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(5);

/// Read deadline: if nothing arrives within this window the socket is dead.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(15);

/// Maximum envelope size. Chunk payloads are ~1.4 KiB after base64, so
/// this is generous headroom.
pub const WS_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Default loopback port of the bus endpoint.
pub const DEFAULT_BUS_PORT: u16 = 8790;

// Transfer status codes returned by `GetTransferStatus`.
pub const STATUS_OK: i32 = 0;
pub const STATUS_PAUSED: i32 = 1;
/// Also returned when the transfer is unknown.
pub const STATUS_ERROR: i32 = 2;

// Method-error codes carried in the envelope `error` field.
pub const ERR_BAD_REQUEST: i32 = 400;
pub const ERR_NOT_FOUND: i32 = 404;
pub const ERR_INTERNAL: i32 = 500;
pub const ERR_NOT_IMPLEMENTED: i32 = 501;

/// Member (method or signal) names of `com.example.ITestService`.
///
/// Variant names serialize verbatim, so the wire strings match the bus
/// interface bit for bit. `MethodReturn` and `Error` are the two reply
/// frame types and never appear as request members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Member {
    // Echo setters.
    SetTestBool,
    SetTestInt,
    SetTestDouble,
    SetTestString,
    SetTestInfo,

    // Echo getters.
    GetTestBool,
    GetTestInt,
    GetTestDouble,
    GetTestString,
    GetTestInfo,

    // File transfer.
    SendFileChunk,
    GetTransferStatus,
    GetMissingChunks,

    // Broadcast signals.
    TestBoolChanged,
    TestIntChanged,
    TestDoubleChanged,
    TestStringChanged,
    TestInfoChanged,

    // Reply frames.
    MethodReturn,
    Error,

    /// Forward compatibility: unknown members deserialize here.
    #[serde(other)]
    Unknown,
}

impl Member {
    /// `true` for the five broadcast signals.
    pub fn is_signal(self) -> bool {
        matches!(
            self,
            Member::TestBoolChanged
                | Member::TestIntChanged
                | Member::TestDoubleChanged
                | Member::TestStringChanged
                | Member::TestInfoChanged
        )
    }
}

// Type signatures in bus grammar, one constant per distinct shape.
pub const SIG_BOOL: &str = "(b)";
pub const SIG_INT: &str = "(i)";
pub const SIG_DOUBLE: &str = "(d)";
pub const SIG_STRING: &str = "(s)";
pub const SIG_INFO: &str = "((bids))";
pub const SIG_NONE: &str = "()";
pub const SIG_SEND_FILE_CHUNK: &str = "(ayssiuiiubs)";
pub const SIG_TRANSFER_QUERY: &str = "(sss)";
pub const SIG_TRANSFER_STATUS: &str = "((sisiiuibtt))";
pub const SIG_MISSING_CHUNKS: &str = "(ai)";

/// Returns the `(in, out)` signatures of a method, or the payload signature
/// of a signal twice. `None` for reply frames and unknown members.
pub fn signatures(member: Member) -> Option<(&'static str, &'static str)> {
    use Member::*;
    Some(match member {
        SetTestBool => (SIG_BOOL, SIG_BOOL),
        SetTestInt => (SIG_INT, SIG_BOOL),
        SetTestDouble => (SIG_DOUBLE, SIG_BOOL),
        SetTestString => (SIG_STRING, SIG_BOOL),
        SetTestInfo => (SIG_INFO, SIG_BOOL),
        GetTestBool => (SIG_NONE, SIG_BOOL),
        GetTestInt => (SIG_NONE, SIG_INT),
        GetTestDouble => (SIG_NONE, SIG_DOUBLE),
        GetTestString => (SIG_NONE, SIG_STRING),
        GetTestInfo => (SIG_NONE, SIG_INFO),
        SendFileChunk => (SIG_SEND_FILE_CHUNK, SIG_BOOL),
        GetTransferStatus => (SIG_TRANSFER_QUERY, SIG_TRANSFER_STATUS),
        GetMissingChunks => (SIG_TRANSFER_QUERY, SIG_MISSING_CHUNKS),
        TestBoolChanged => (SIG_BOOL, SIG_BOOL),
        TestIntChanged => (SIG_INT, SIG_INT),
        TestDoubleChanged => (SIG_DOUBLE, SIG_DOUBLE),
        TestStringChanged => (SIG_STRING, SIG_STRING),
        TestInfoChanged => (SIG_INFO, SIG_INFO),
        MethodReturn | Error | Unknown => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_serializes_verbatim() {
        assert_eq!(
            serde_json::to_string(&Member::SendFileChunk).unwrap(),
            "\"SendFileChunk\""
        );
        assert_eq!(
            serde_json::to_string(&Member::TestInfoChanged).unwrap(),
            "\"TestInfoChanged\""
        );
    }

    #[test]
    fn unknown_member_deserializes() {
        let m: Member = serde_json::from_str("\"SomeFutureMember\"").unwrap();
        assert_eq!(m, Member::Unknown);
    }

    #[test]
    fn signal_classification() {
        assert!(Member::TestBoolChanged.is_signal());
        assert!(!Member::SetTestBool.is_signal());
        assert!(!Member::MethodReturn.is_signal());
    }

    #[test]
    fn method_signatures_match_interface() {
        assert_eq!(
            signatures(Member::SendFileChunk),
            Some(("(ayssiuiiubs)", "(b)"))
        );
        assert_eq!(
            signatures(Member::GetTransferStatus),
            Some(("(sss)", "((sisiiuibtt))"))
        );
        assert_eq!(signatures(Member::GetMissingChunks), Some(("(sss)", "(ai)")));
        assert_eq!(signatures(Member::GetTestInfo), Some(("()", "((bids))")));
        assert!(signatures(Member::Error).is_none());
    }
}
