use crate::transport::{Connector, PointerInput, Session};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Something to send to the TV.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Request/response exchange on the SSAP channel.
    Rpc { uri: String, payload: Option<Value> },
    /// Discrete remote-control button on the pointer input socket.
    Button { name: String },
}

impl Command {
    pub fn rpc(uri: impl Into<String>, payload: Option<Value>) -> Self {
        Self::Rpc {
            uri: uri.into(),
            payload,
        }
    }

    pub fn button(name: impl Into<String>) -> Self {
        Self::Button { name: name.into() }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rpc { uri, .. } => f.write_str(uri),
            Self::Button { name } => write!(f, "button:{name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommandResult {
    pub succeeded: bool,
    pub error_detail: Option<String>,
    pub payload: Option<Value>,
}

impl CommandResult {
    pub fn ok(payload: Option<Value>) -> Self {
        Self {
            succeeded: true,
            error_detail: None,
            payload,
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            error_detail: Some(detail.into()),
            payload: None,
        }
    }
}

/// Runs each command on a session of its own and always tears it down.
pub struct Dispatcher<C> {
    connector: Arc<C>,
}

impl<C> Clone for Dispatcher<C> {
    fn clone(&self) -> Self {
        Self {
            connector: self.connector.clone(),
        }
    }
}

impl<C: Connector> Dispatcher<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector: Arc::new(connector),
        }
    }

    /// Never fails: every transport or device error comes back as a failed result.
    pub async fn dispatch(&self, command: Command) -> CommandResult {
        let mut session = match self.connector.connect().await {
            Ok(session) => session,
            Err(err) => {
                tracing::debug!(command = %command, error = %err, "error connecting to tv");
                return CommandResult::failed(err.to_string());
            }
        };

        let result = match command {
            Command::Rpc { uri, payload } => match session.request(&uri, payload).await {
                Ok(reply) => CommandResult::ok(Some(reply)),
                Err(err) => {
                    tracing::debug!(uri = %uri, error = %err, "tv rejected or dropped request");
                    CommandResult::failed(err.to_string())
                }
            },
            Command::Button { name } => match session.pointer_socket().await {
                Ok(mut pointer) => {
                    // delivery is not confirmed by the tv; an open socket counts as success
                    if let Err(err) = pointer.send("button", &[("name", name.as_str())]).await {
                        tracing::debug!(button = %name, error = %err, "pointer event send failed");
                    }
                    pointer.close().await;
                    CommandResult::ok(None)
                }
                Err(err) => {
                    tracing::debug!(button = %name, error = %err, "pointer input socket unavailable");
                    CommandResult::failed(err.to_string())
                }
            },
        };

        session.disconnect().await;
        result
    }
}
