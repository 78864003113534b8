//! Transport-backed implementation of the emit-only broadcast interface.

use chunkbus_bus_server::SignalBroadcaster;
use chunkbus_protocol::constants::{Member, SIG_BOOL, SIG_DOUBLE, SIG_INFO, SIG_INT, SIG_STRING};
use chunkbus_protocol::messages::{BoolValue, DoubleValue, InfoValue, IntValue, StringValue, TestInfo};

use crate::service::SignalEmitter;

/// Emits the five `*Changed` signals through the bus broadcaster.
pub struct BroadcastEmitter {
    broadcaster: SignalBroadcaster,
}

impl BroadcastEmitter {
    pub fn new(broadcaster: SignalBroadcaster) -> Self {
        Self { broadcaster }
    }
}

impl SignalEmitter for BroadcastEmitter {
    fn bool_changed(&self, value: bool) {
        self.broadcaster
            .emit(Member::TestBoolChanged, SIG_BOOL, &BoolValue { value });
    }

    fn int_changed(&self, value: i32) {
        self.broadcaster
            .emit(Member::TestIntChanged, SIG_INT, &IntValue { value });
    }

    fn double_changed(&self, value: f64) {
        self.broadcaster
            .emit(Member::TestDoubleChanged, SIG_DOUBLE, &DoubleValue { value });
    }

    fn string_changed(&self, value: &str) {
        self.broadcaster.emit(
            Member::TestStringChanged,
            SIG_STRING,
            &StringValue {
                value: value.to_owned(),
            },
        );
    }

    fn info_changed(&self, info: &TestInfo) {
        self.broadcaster.emit(
            Member::TestInfoChanged,
            SIG_INFO,
            &InfoValue {
                value: info.clone(),
            },
        );
    }
}
