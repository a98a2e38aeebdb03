//! In-memory stand-in for the TV used by dispatcher, poller and router tests.

use super::{CommandError, ConnectError, Connector, PointerInput, Session, POINTER_SOCKET_URI};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct FakeTvLog {
    pub sessions_opened: usize,
    pub sessions_closed: usize,
    pub pointers_opened: usize,
    pub pointers_closed: usize,
    pub requests: Vec<(String, Option<Value>)>,
    pub pointer_events: Vec<String>,
}

#[derive(Debug, Default)]
struct FakeTvState {
    log: FakeTvLog,
    responses: HashMap<String, Result<Value, CommandError>>,
    refuse_connect: bool,
    refuse_pointer: bool,
    fail_pointer_send: bool,
    delays: HashMap<String, Duration>,
}

/// Scriptable fake: every uri answers `{"returnValue": true}` unless told otherwise.
#[derive(Debug, Clone, Default)]
pub struct FakeTv {
    state: Arc<Mutex<FakeTvState>>,
}

impl FakeTv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, uri: &str, response: Result<Value, CommandError>) {
        self.state
            .lock()
            .unwrap()
            .responses
            .insert(uri.to_string(), response);
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.state.lock().unwrap().refuse_connect = refuse;
    }

    pub fn refuse_pointer(&self, refuse: bool) {
        self.state.lock().unwrap().refuse_pointer = refuse;
    }

    pub fn fail_pointer_send(&self, fail: bool) {
        self.state.lock().unwrap().fail_pointer_send = fail;
    }

    /// Holds replies to `uri` back for `delay` after the request is logged.
    pub fn delay(&self, uri: &str, delay: Duration) {
        self.state
            .lock()
            .unwrap()
            .delays
            .insert(uri.to_string(), delay);
    }

    pub fn with_log<T>(&self, f: impl FnOnce(&FakeTvLog) -> T) -> T {
        f(&self.state.lock().unwrap().log)
    }

    pub fn requested_uris(&self) -> Vec<String> {
        self.with_log(|log| log.requests.iter().map(|(uri, _)| uri.clone()).collect())
    }

    pub fn connector(&self) -> FakeConnector {
        FakeConnector { tv: self.clone() }
    }
}

pub struct FakeConnector {
    tv: FakeTv,
}

impl Connector for FakeConnector {
    type Session = FakeSession;

    async fn connect(&self) -> Result<FakeSession, ConnectError> {
        let mut state = self.tv.state.lock().unwrap();
        if state.refuse_connect {
            return Err(ConnectError::Closed);
        }
        state.log.sessions_opened += 1;
        Ok(FakeSession {
            tv: self.tv.clone(),
        })
    }
}

pub struct FakeSession {
    tv: FakeTv,
}

impl Session for FakeSession {
    type Pointer = FakePointer;

    async fn request(&mut self, uri: &str, payload: Option<Value>) -> Result<Value, CommandError> {
        let uri = super::normalize_uri(uri);
        let delay = {
            let mut state = self.tv.state.lock().unwrap();
            state.log.requests.push((uri.clone(), payload));
            state.delays.get(&uri).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.tv
            .state
            .lock()
            .unwrap()
            .responses
            .get(&uri)
            .cloned()
            .unwrap_or_else(|| Ok(json!({ "returnValue": true })))
    }

    async fn pointer_socket(&mut self) -> Result<FakePointer, ConnectError> {
        let mut state = self.tv.state.lock().unwrap();
        state.log.requests.push((POINTER_SOCKET_URI.to_string(), None));
        if state.refuse_pointer {
            return Err(ConnectError::Protocol("pointer socket unavailable".to_string()));
        }
        state.log.pointers_opened += 1;
        Ok(FakePointer {
            tv: self.tv.clone(),
        })
    }

    async fn disconnect(self) {
        self.tv.state.lock().unwrap().log.sessions_closed += 1;
    }
}

pub struct FakePointer {
    tv: FakeTv,
}

impl PointerInput for FakePointer {
    async fn send(&mut self, kind: &str, fields: &[(&str, &str)]) -> Result<(), CommandError> {
        let mut state = self.tv.state.lock().unwrap();
        if state.fail_pointer_send {
            return Err(CommandError::Transport("pointer socket reset".to_string()));
        }
        let event = super::encode_pointer_event(kind, fields);
        state.log.pointer_events.push(event);
        Ok(())
    }

    async fn close(self) {
        self.tv.state.lock().unwrap().log.pointers_closed += 1;
    }
}
