#![allow(dead_code)]

use serde_json::Value;
use std::sync::Mutex;
use surveyor_core::events::{Channel, EventSink};
use surveyor_core::model::{AuthConfig, AuthStrategy};
use surveyor_core::Database;
use tempfile::TempDir;

/// Keeps every event so tests can check order and payloads.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(Channel, i64, String, Value)>>,
}

impl RecordingSink {
    pub fn names(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, name, _)| name.clone())
            .collect()
    }

    pub fn payloads(&self, name: &str) -> Vec<Value> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, _, n, _)| n == name)
            .map(|(_, _, _, payload)| payload.clone())
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, channel: Channel, id: i64, name: &str, payload: Value) {
        self.events
            .lock()
            .unwrap()
            .push((channel, id, name.to_string(), payload));
    }
}

pub fn create_test_db() -> (TempDir, Database) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("test.db")).unwrap();
    (temp_dir, db)
}

pub fn add_target(db: &Database, base_url: &str) -> i64 {
    db.create_target("shop", base_url, AuthStrategy::None, &AuthConfig::default())
        .unwrap()
}
