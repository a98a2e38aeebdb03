use crate::model::{DeviceState, InputSource, ATTR_CHANNEL, ATTR_INPUT, ATTR_POWER};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Where poll cycles and acknowledged commands publish device truth.
pub trait StateSink: Send + Sync + 'static {
    fn set_state(&self, attribute: &str, value: Value, ack: bool);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateEntry {
    pub val: Value,
    pub ack: bool,
    pub ts_unix_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateChange {
    pub attribute: String,
    pub val: Value,
    pub ack: bool,
}

/// Attribute table plus change feed. Unacknowledged writes are intents.
#[derive(Debug)]
pub struct StateStore {
    entries: Mutex<HashMap<String, StateEntry>>,
    tx: broadcast::Sender<StateChange>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            entries: Mutex::new(HashMap::new()),
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.tx.subscribe()
    }

    /// Records an external request to change `attribute`.
    pub fn request(&self, attribute: &str, value: Value) {
        self.write(attribute, value, false);
    }

    pub fn get(&self, attribute: &str) -> Option<StateEntry> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(attribute).cloned())
    }

    pub fn snapshot(&self) -> BTreeMap<String, StateEntry> {
        match self.entries.lock() {
            Ok(entries) => entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            Err(_) => BTreeMap::new(),
        }
    }

    /// Acknowledged values only; pending intents are not device truth.
    pub fn device_state(&self) -> DeviceState {
        let acked = |attribute: &str| self.get(attribute).filter(|entry| entry.ack).map(|entry| entry.val);

        DeviceState {
            channel: acked(ATTR_CHANNEL)
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default(),
            power: acked(ATTR_POWER)
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            input: acked(ATTR_INPUT)
                .and_then(|v| v.as_str().map(InputSource::from_state))
                .unwrap_or_default(),
        }
    }

    fn write(&self, attribute: &str, value: Value, ack: bool) {
        let entry = StateEntry {
            val: value.clone(),
            ack,
            ts_unix_ms: now_unix_ms(),
        };
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        entries.insert(attribute.to_string(), entry);
        // sent under the lock so subscribers see writes in table order;
        // no subscribers is fine
        let _ = self.tx.send(StateChange {
            attribute: attribute.to_string(),
            val: value,
            ack,
        });
    }
}

impl StateSink for StateStore {
    fn set_state(&self, attribute: &str, value: Value, ack: bool) {
        tracing::debug!(attribute, value = %value, ack, "state update");
        self.write(attribute, value, ack);
    }
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
