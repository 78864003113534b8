//! Process-wide string-to-string store behind a lock.

use std::collections::HashMap;
use std::sync::RwLock;

// Storage keys for the five echo values.
pub const KEY_TEST_BOOL: &str = "test_bool";
pub const KEY_TEST_INT: &str = "test_int";
pub const KEY_TEST_DOUBLE: &str = "test_double";
pub const KEY_TEST_STRING: &str = "test_string";
pub const KEY_TEST_INFO: &str = "test_info";

/// Thread-safe string map holding the serialised echo values.
#[derive(Default)]
pub struct EchoStore {
    map: RwLock<HashMap<String, String>>,
}

impl EchoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: &str, value: impl Into<String>) {
        self.map.write().unwrap().insert(key.to_owned(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.map.read().unwrap().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.map.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
