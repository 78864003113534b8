//! Echo semantics and the file-transfer entry points.

use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use chunkbus_protocol::messages::{FileChunkMsg, MissingChunksMsg, TestInfo, TransferStatusMsg};
use chunkbus_receiver::{FileReceiver, ReceiveError};

use crate::store::{
    EchoStore, KEY_TEST_BOOL, KEY_TEST_DOUBLE, KEY_TEST_INFO, KEY_TEST_INT, KEY_TEST_STRING,
};

/// Emit-only broadcast interface.
///
/// The transport adapter implements this; the service only ever holds
/// the five emit methods, never the adapter itself.
pub trait SignalEmitter: Send + Sync {
    fn bool_changed(&self, value: bool);
    fn int_changed(&self, value: i32);
    fn double_changed(&self, value: f64);
    fn string_changed(&self, value: &str);
    fn info_changed(&self, info: &TestInfo);
}

/// The service behind `com.example.ITestService`.
///
/// Echo values persist as strings in the [`EchoStore`]; getters fall
/// back to type defaults when a key is absent or unparseable. Every
/// setter broadcasts the matching `*Changed` signal.
pub struct TestService {
    store: EchoStore,
    receiver: Arc<FileReceiver>,
    /// Installed after construction via
    /// [`set_emitter`](TestService::set_emitter).
    emitter: RwLock<Option<Arc<dyn SignalEmitter>>>,
}

impl TestService {
    pub fn new(receiver: Arc<FileReceiver>) -> Self {
        Self {
            store: EchoStore::new(),
            receiver,
            emitter: RwLock::new(None),
        }
    }

    /// Wires the broadcast path. Until called, setters persist without
    /// emitting.
    pub fn set_emitter(&self, emitter: Arc<dyn SignalEmitter>) {
        *self.emitter.write().unwrap() = Some(emitter);
    }

    fn emit(&self, f: impl FnOnce(&dyn SignalEmitter)) {
        if let Some(emitter) = self.emitter.read().unwrap().as_ref() {
            f(emitter.as_ref());
        }
    }

    pub fn set_test_bool(&self, value: bool) -> bool {
        debug!(value, "SetTestBool");
        self.store.set(KEY_TEST_BOOL, if value { "1" } else { "0" });
        self.emit(|e| e.bool_changed(value));
        true
    }

    pub fn get_test_bool(&self) -> bool {
        match self.store.get(KEY_TEST_BOOL) {
            // Both stored forms are accepted.
            Some(v) => v == "1" || v.eq_ignore_ascii_case("true"),
            None => false,
        }
    }

    pub fn set_test_int(&self, value: i32) -> bool {
        debug!(value, "SetTestInt");
        self.store.set(KEY_TEST_INT, value.to_string());
        self.emit(|e| e.int_changed(value));
        true
    }

    pub fn get_test_int(&self) -> i32 {
        self.store
            .get(KEY_TEST_INT)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub fn set_test_double(&self, value: f64) -> bool {
        debug!(value, "SetTestDouble");
        self.store.set(KEY_TEST_DOUBLE, value.to_string());
        self.emit(|e| e.double_changed(value));
        true
    }

    pub fn get_test_double(&self) -> f64 {
        self.store
            .get(KEY_TEST_DOUBLE)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0)
    }

    pub fn set_test_string(&self, value: &str) -> bool {
        debug!(value, "SetTestString");
        self.store.set(KEY_TEST_STRING, value);
        self.emit(|e| e.string_changed(value));
        true
    }

    pub fn get_test_string(&self) -> String {
        self.store.get(KEY_TEST_STRING).unwrap_or_default()
    }

    /// Persists the record as one JSON document and broadcasts it.
    /// Returns `false` when serialisation fails.
    pub fn set_test_info(&self, info: &TestInfo) -> bool {
        debug!(?info, "SetTestInfo");
        let json = match serde_json::to_string(info) {
            Ok(json) => json,
            Err(e) => {
                warn!("SetTestInfo serialisation failed: {e}");
                return false;
            }
        };
        self.store.set(KEY_TEST_INFO, json);
        self.emit(|e| e.info_changed(info));
        true
    }

    /// Zero/empty fields when the key is absent or the stored document
    /// does not parse.
    pub fn get_test_info(&self) -> TestInfo {
        let Some(json) = self.store.get(KEY_TEST_INFO) else {
            return TestInfo::default();
        };
        match serde_json::from_str(&json) {
            Ok(info) => info,
            Err(e) => {
                warn!("GetTestInfo deserialisation failed: {e}");
                TestInfo::default()
            }
        }
    }

    /// Hands one chunk to the receiver; blocks on admission.
    pub async fn send_file_chunk(&self, chunk: FileChunkMsg) -> Result<(), ReceiveError> {
        self.receiver.receive_chunk(chunk).await
    }

    pub fn transfer_status(
        &self,
        transfer_id: &str,
        userid: &str,
        file_name: &str,
    ) -> TransferStatusMsg {
        self.receiver.status(transfer_id, userid, file_name)
    }

    pub fn missing_chunks(
        &self,
        transfer_id: &str,
        userid: &str,
        file_name: &str,
    ) -> MissingChunksMsg {
        MissingChunksMsg {
            indices: self.receiver.missing_chunks(transfer_id, userid, file_name),
        }
    }

    pub fn receiver(&self) -> &Arc<FileReceiver> {
        &self.receiver
    }
}
