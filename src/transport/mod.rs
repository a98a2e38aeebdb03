//! Connection primitives for the TV's SSAP WebSocket API.
//!
//! Every command runs on its own [`Session`]: connect, register, one request
//! (or one pointer socket episode), disconnect. Nothing is pooled or reused,
//! and a failed connect is never retried here.

mod webos;

#[cfg(test)]
pub mod testing;

pub use webos::WebOsConnector;

use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_tungstenite::tungstenite;

pub const POINTER_SOCKET_URI: &str = "ssap://com.webos.service.networkinput/getPointerInputSocket";

/// Opens fresh sessions against the TV.
pub trait Connector: Send + Sync + 'static {
    type Session: Session;

    fn connect(&self) -> impl Future<Output = Result<Self::Session, ConnectError>> + Send;
}

/// One registered connection. Callers must `disconnect` it when done.
pub trait Session: Send {
    type Pointer: PointerInput;

    fn request(
        &mut self,
        uri: &str,
        payload: Option<Value>,
    ) -> impl Future<Output = Result<Value, CommandError>> + Send;

    fn pointer_socket(&mut self) -> impl Future<Output = Result<Self::Pointer, ConnectError>> + Send;

    fn disconnect(self) -> impl Future<Output = ()> + Send;
}

/// Secondary socket accepting discrete remote-control events.
pub trait PointerInput: Send {
    fn send(
        &mut self,
        kind: &str,
        fields: &[(&str, &str)],
    ) -> impl Future<Output = Result<(), CommandError>> + Send;

    fn close(self) -> impl Future<Output = ()> + Send;
}

/// Builds a full SSAP uri; bare service paths get the `ssap://` scheme.
pub fn normalize_uri(uri: &str) -> String {
    if uri.contains("://") {
        uri.to_string()
    } else {
        format!("ssap://{}", uri.trim_start_matches('/'))
    }
}

/// Text frame understood by the pointer input socket.
pub fn encode_pointer_event(kind: &str, fields: &[(&str, &str)]) -> String {
    let mut out = format!("type:{}\n", kind);
    for (key, value) in fields {
        out.push_str(key);
        out.push(':');
        out.push_str(value);
        out.push('\n');
    }
    out.push('\n');
    out
}

#[derive(Debug)]
pub enum ConnectError {
    InvalidUrl(String),
    Timeout { stage: &'static str, after: Duration },
    WebSocket(tungstenite::Error),
    Pairing(String),
    Protocol(String),
    Closed,
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUrl(url) => write!(f, "invalid url: {url}"),
            Self::Timeout { stage, after } => {
                write!(f, "{stage} timed out after {}ms", after.as_millis())
            }
            Self::WebSocket(err) => write!(f, "websocket error: {err}"),
            Self::Pairing(msg) => write!(f, "pairing failed: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::Closed => write!(f, "connection closed during handshake"),
        }
    }
}

impl std::error::Error for ConnectError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    Rejected(String),
    MissingPayload,
    Timeout(Duration),
    Closed,
    Transport(String),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(msg) => write!(f, "rejected by tv: {msg}"),
            Self::MissingPayload => write!(f, "response carried no payload"),
            Self::Timeout(after) => write!(f, "no response after {}ms", after.as_millis()),
            Self::Closed => write!(f, "connection closed before response"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
        }
    }
}

impl std::error::Error for CommandError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_service_paths_get_ssap_scheme() {
        assert_eq!(
            normalize_uri("com.webos.applicationManager/getForegroundAppInfo"),
            "ssap://com.webos.applicationManager/getForegroundAppInfo"
        );
        assert_eq!(normalize_uri("ssap://tv/getCurrentChannel"), "ssap://tv/getCurrentChannel");
    }

    #[test]
    fn pointer_event_is_line_encoded() {
        assert_eq!(
            encode_pointer_event("button", &[("name", "UP")]),
            "type:button\nname:UP\n\n"
        );
    }

    #[test]
    fn errors_render_readably() {
        let err = ConnectError::Timeout {
            stage: "connect",
            after: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "connect timed out after 1500ms");
        assert_eq!(
            CommandError::Rejected("404 no such service".to_string()).to_string(),
            "rejected by tv: 404 no such service"
        );
    }
}
