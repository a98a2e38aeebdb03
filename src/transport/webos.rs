use super::{
    encode_pointer_event, normalize_uri, CommandError, ConnectError, Connector, PointerInput,
    Session, POINTER_SOCKET_URI,
};
use crate::keystore::{client_key_name, KeyStore};
use crate::model::DeviceEndpoint;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const REGISTER_ID: &str = "register_0";

#[derive(Debug, Deserialize)]
struct IncomingFrame {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Opens one registered SSAP session per call, persisting the client key
/// the TV hands out on first pairing.
#[derive(Debug, Clone)]
pub struct WebOsConnector {
    endpoint: DeviceEndpoint,
    keys: Arc<Mutex<KeyStore>>,
}

impl WebOsConnector {
    pub fn new(endpoint: DeviceEndpoint, keys: Arc<Mutex<KeyStore>>) -> Self {
        Self { endpoint, keys }
    }

    fn known_client_key(&self) -> Option<String> {
        let name = client_key_name(&self.endpoint.host);
        self.keys
            .lock()
            .ok()
            .and_then(|keys| keys.retrieve(&name).map(str::to_string))
    }

    fn remember_client_key(&self, key: &str) {
        let name = client_key_name(&self.endpoint.host);
        if let Ok(mut keys) = self.keys.lock() {
            if let Err(err) = keys.store(&name, key) {
                tracing::warn!(error = %err, "failed to persist tv client key");
            }
        }
    }
}

impl Connector for WebOsConnector {
    type Session = WebOsSession;

    async fn connect(&self) -> Result<WebOsSession, ConnectError> {
        let url = self.endpoint.url();
        tracing::debug!(url = %url, "connecting to webos tv");

        let ws = open_socket(&url, self.endpoint.handshake_timeout).await?;
        let mut session = WebOsSession {
            ws,
            reply_timeout: self.endpoint.handshake_timeout,
        };

        let known_key = self.known_client_key();
        let issued = match session.register(known_key.as_deref(), &self.endpoint).await {
            Ok(issued) => issued,
            Err(err) => {
                tracing::debug!(host = %self.endpoint.host, error = %err, "tv registration failed");
                session.disconnect().await;
                return Err(err);
            }
        };

        if let Some(issued) = issued {
            if known_key.as_deref() != Some(issued.as_str()) {
                tracing::info!(host = %self.endpoint.host, "paired with tv, storing client key");
                self.remember_client_key(&issued);
            }
        }

        Ok(session)
    }
}

pub struct WebOsSession {
    ws: WsStream,
    reply_timeout: Duration,
}

impl WebOsSession {
    async fn register(
        &mut self,
        client_key: Option<&str>,
        endpoint: &DeviceEndpoint,
    ) -> Result<Option<String>, ConnectError> {
        let text = frame_text("register", REGISTER_ID, None, Some(register_payload(client_key)));
        self.ws
            .send(Message::Text(text))
            .await
            .map_err(ConnectError::WebSocket)?;

        let mut deadline = Instant::now() + endpoint.handshake_timeout;
        let mut prompted = false;

        loop {
            let frame = match timeout_at(deadline, self.next_frame()).await {
                Err(_) if prompted => {
                    return Err(ConnectError::Timeout {
                        stage: "pairing confirmation",
                        after: endpoint.pairing_timeout,
                    })
                }
                Err(_) => {
                    return Err(ConnectError::Timeout {
                        stage: "registration",
                        after: endpoint.handshake_timeout,
                    })
                }
                Ok(Err(err)) => return Err(ConnectError::WebSocket(err)),
                Ok(Ok(None)) => return Err(ConnectError::Closed),
                Ok(Ok(Some(frame))) => frame,
            };

            if frame.id.as_deref() != Some(REGISTER_ID) {
                continue;
            }

            match frame.kind.as_str() {
                "registered" => {
                    return Ok(frame
                        .payload
                        .as_ref()
                        .and_then(|p| p.get("client-key"))
                        .and_then(Value::as_str)
                        .map(str::to_string));
                }
                "error" => {
                    return Err(ConnectError::Pairing(
                        frame
                            .error
                            .unwrap_or_else(|| "registration refused".to_string()),
                    ));
                }
                "response" => {
                    let wants_prompt = frame
                        .payload
                        .as_ref()
                        .and_then(|p| p.get("pairingType"))
                        .and_then(Value::as_str)
                        == Some("PROMPT");
                    if wants_prompt && !prompted {
                        prompted = true;
                        deadline = Instant::now() + endpoint.pairing_timeout;
                        tracing::debug!(host = %endpoint.host, "waiting for pairing confirmation on tv");
                    }
                }
                other => {
                    tracing::debug!(kind = %other, "ignoring frame during registration");
                }
            }
        }
    }

    async fn next_frame(&mut self) -> Result<Option<IncomingFrame>, tungstenite::Error> {
        while let Some(message) = self.ws.next().await {
            match message? {
                Message::Text(text) => match serde_json::from_str::<IncomingFrame>(&text) {
                    Ok(frame) => return Ok(Some(frame)),
                    Err(err) => tracing::debug!(error = %err, "skipping unparsable frame"),
                },
                Message::Close(_) => return Ok(None),
                _ => {}
            }
        }
        Ok(None)
    }

    async fn await_reply(&mut self, id: &str) -> Result<IncomingFrame, CommandError> {
        loop {
            match self.next_frame().await {
                Ok(Some(frame)) if frame.id.as_deref() == Some(id) => return Ok(frame),
                Ok(Some(_)) => continue,
                Ok(None) => return Err(CommandError::Closed),
                Err(err) => return Err(CommandError::Transport(err.to_string())),
            }
        }
    }
}

impl Session for WebOsSession {
    type Pointer = WebOsPointer;

    async fn request(&mut self, uri: &str, payload: Option<Value>) -> Result<Value, CommandError> {
        let id = format!("request_{}", Uuid::new_v4());
        let uri = normalize_uri(uri);
        let text = frame_text("request", &id, Some(&uri), payload);

        self.ws
            .send(Message::Text(text))
            .await
            .map_err(|err| CommandError::Transport(err.to_string()))?;

        let limit = self.reply_timeout;
        let reply = timeout(limit, self.await_reply(&id))
            .await
            .map_err(|_| CommandError::Timeout(limit))??;
        classify_reply(reply)
    }

    async fn pointer_socket(&mut self) -> Result<WebOsPointer, ConnectError> {
        let payload = self
            .request(POINTER_SOCKET_URI, None)
            .await
            .map_err(|err| ConnectError::Protocol(format!("pointer socket request failed: {err}")))?;

        let path = payload
            .get("socketPath")
            .and_then(Value::as_str)
            .ok_or_else(|| ConnectError::Protocol("pointer socket reply missing socketPath".to_string()))?;
        if !(path.starts_with("ws://") || path.starts_with("wss://")) {
            return Err(ConnectError::InvalidUrl(path.to_string()));
        }

        tracing::debug!(socket = %path, "opening pointer input socket");
        let ws = open_socket(path, self.reply_timeout).await?;
        Ok(WebOsPointer { ws })
    }

    async fn disconnect(mut self) {
        if let Err(err) = self.ws.close(None).await {
            tracing::debug!(error = %err, "close on tv session failed");
        }
    }
}

pub struct WebOsPointer {
    ws: WsStream,
}

impl PointerInput for WebOsPointer {
    async fn send(&mut self, kind: &str, fields: &[(&str, &str)]) -> Result<(), CommandError> {
        self.ws
            .send(Message::Text(encode_pointer_event(kind, fields)))
            .await
            .map_err(|err| CommandError::Transport(err.to_string()))
    }

    async fn close(mut self) {
        if let Err(err) = self.ws.close(None).await {
            tracing::debug!(error = %err, "close on pointer socket failed");
        }
    }
}

async fn open_socket(url: &str, limit: Duration) -> Result<WsStream, ConnectError> {
    match timeout(limit, connect_async(url)).await {
        Err(_) => Err(ConnectError::Timeout {
            stage: "connect",
            after: limit,
        }),
        Ok(Err(err)) => Err(ConnectError::WebSocket(err)),
        Ok(Ok((ws, _response))) => Ok(ws),
    }
}

fn frame_text(kind: &str, id: &str, uri: Option<&str>, payload: Option<Value>) -> String {
    let mut frame = json!({ "type": kind, "id": id });
    if let Some(uri) = uri {
        frame["uri"] = Value::String(uri.to_string());
    }
    if let Some(payload) = payload.filter(|p| !p.is_null()) {
        frame["payload"] = payload;
    }
    frame.to_string()
}

fn register_payload(client_key: Option<&str>) -> Value {
    let mut payload = json!({
        "forcePairing": false,
        "pairingType": "PROMPT",
        "manifest": {
            "manifestVersion": 1,
            "appVersion": env!("CARGO_PKG_VERSION"),
            "permissions": [
                "LAUNCH",
                "LAUNCH_WEBAPP",
                "APP_TO_APP",
                "CONTROL_AUDIO",
                "CONTROL_DISPLAY",
                "CONTROL_INPUT_TV",
                "CONTROL_POWER",
                "CONTROL_INPUT_JOYSTICK",
                "CONTROL_MOUSE_AND_KEYBOARD",
                "READ_CURRENT_CHANNEL",
                "READ_RUNNING_APPS",
                "READ_INPUT_DEVICE_LIST",
                "READ_TV_CHANNEL_LIST",
                "WRITE_NOTIFICATION_TOAST"
            ]
        }
    });
    if let Some(key) = client_key {
        payload["client-key"] = Value::String(key.to_string());
    }
    payload
}

fn classify_reply(frame: IncomingFrame) -> Result<Value, CommandError> {
    if frame.kind == "error" {
        return Err(CommandError::Rejected(
            frame.error.unwrap_or_else(|| "unknown error".to_string()),
        ));
    }

    let payload = match frame.payload {
        None | Some(Value::Null) => return Err(CommandError::MissingPayload),
        Some(payload) => payload,
    };

    if payload.get("returnValue").and_then(Value::as_bool) == Some(false) {
        let text = payload
            .get("errorText")
            .and_then(Value::as_str)
            .unwrap_or("returnValue false");
        return Err(CommandError::Rejected(text.to_string()));
    }

    Ok(payload)
}
