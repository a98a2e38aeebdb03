use crate::config::TurnOffMode;
use crate::dispatch::{Command, CommandResult, Dispatcher};
use crate::model::{
    ATTR_3D_MODE, ATTR_BUTTON, ATTR_CHANNEL, ATTR_INPUT, ATTR_LAUNCH, ATTR_MUTE, ATTR_POPUP,
    ATTR_TURN_OFF, ATTR_VOLUME_DOWN, ATTR_VOLUME_UP,
};
use crate::state::{StateChange, StateSink};
use crate::transport::Connector;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

const LAUNCH_URI: &str = "ssap://system.launcher/launch";
const OPEN_URI: &str = "ssap://system.launcher/open";

/// Short launch names accepted by the `launch` attribute.
const KNOWN_APPS: &[(&str, &str)] = &[
    ("livetv", "com.webos.app.livetv"),
    ("smartshare", "com.webos.app.smartshare"),
    ("tvuserguide", "com.webos.app.tvuserguide"),
    ("netflix", "netflix"),
    ("youtube", "youtube.leanback.v4"),
    ("prime", "lovefilm.de"),
    ("amazon", "amazon"),
];

/// Outbound command for an intent plus the value acknowledged once it succeeds.
#[derive(Debug, Clone, PartialEq)]
pub struct Routed {
    pub command: Command,
    pub ack_value: Value,
}

impl Routed {
    fn new(command: Command, ack_value: Value) -> Self {
        Self { command, ack_value }
    }
}

/// Maps an attribute intent to a command. `None` for attributes the TV has no
/// command for, and for `3Dmode` values that are not booleans.
pub fn route(attribute: &str, value: &Value, turn_off: TurnOffMode) -> Option<Routed> {
    let routed = match attribute {
        ATTR_POPUP => Routed::new(
            Command::rpc(
                "ssap://system.notifications/createToast",
                Some(json!({ "message": as_text(value) })),
            ),
            value.clone(),
        ),
        ATTR_TURN_OFF => {
            let command = match turn_off {
                TurnOffMode::Request => Command::rpc("ssap://system/turnOff", None),
                TurnOffMode::Button => Command::button("POWER"),
            };
            Routed::new(command, value.clone())
        }
        ATTR_MUTE => {
            let mute = truthy(value);
            Routed::new(
                Command::rpc("ssap://audio/setMute", Some(json!({ "mute": mute }))),
                Value::Bool(mute),
            )
        }
        ATTR_VOLUME_UP => Routed::new(
            Command::rpc("ssap://audio/volumeUp", None),
            Value::Bool(truthy(value)),
        ),
        ATTR_VOLUME_DOWN => Routed::new(
            Command::rpc("ssap://audio/volumeDown", None),
            Value::Bool(truthy(value)),
        ),
        ATTR_3D_MODE => {
            let uri = match value.as_bool()? {
                true => "ssap://com.webos.service.tv.display/set3DOn",
                false => "ssap://com.webos.service.tv.display/set3DOff",
            };
            Routed::new(Command::rpc(uri, None), value.clone())
        }
        ATTR_LAUNCH => {
            let name = as_text(value);
            let command = match launch_app_id(&name) {
                Some(app_id) => Command::rpc(LAUNCH_URI, Some(json!({ "id": app_id }))),
                None => Command::rpc(OPEN_URI, Some(json!({ "target": name }))),
            };
            Routed::new(command, value.clone())
        }
        ATTR_CHANNEL => Routed::new(
            Command::rpc(
                "ssap://tv/openChannel",
                Some(json!({ "channelNumber": as_text(value) })),
            ),
            value.clone(),
        ),
        ATTR_INPUT => Routed::new(
            Command::rpc(
                "ssap://tv/switchInput",
                Some(json!({ "inputId": as_text(value) })),
            ),
            value.clone(),
        ),
        ATTR_BUTTON => Routed::new(Command::button(as_text(value)), value.clone()),
        _ => return None,
    };
    Some(routed)
}

pub fn launch_app_id(name: &str) -> Option<&'static str> {
    KNOWN_APPS
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, app_id)| *app_id)
}

/// Loose truthiness: `0`, `""`, `false` and `null` are false.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Turns intents into commands and acknowledges what the TV accepted.
pub struct Router<C, S> {
    dispatcher: Dispatcher<C>,
    sink: Arc<S>,
    turn_off: TurnOffMode,
}

impl<C, S> Clone for Router<C, S> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
            sink: self.sink.clone(),
            turn_off: self.turn_off,
        }
    }
}

impl<C: Connector, S: StateSink> Router<C, S> {
    pub fn new(dispatcher: Dispatcher<C>, sink: Arc<S>, turn_off: TurnOffMode) -> Self {
        Self {
            dispatcher,
            sink,
            turn_off,
        }
    }

    /// Handles one intent. Returns `None` when the attribute is not routable.
    /// On failure prior state is left alone for the next poll to reconcile.
    pub async fn on_intent(&self, attribute: &str, value: Value) -> Option<CommandResult> {
        let Some(routed) = route(attribute, &value, self.turn_off) else {
            tracing::debug!(attribute, "ignoring intent without a tv command");
            return None;
        };

        tracing::debug!(attribute, value = %value, command = %routed.command, "sending command to tv");
        let result = self.dispatcher.dispatch(routed.command).await;

        if result.succeeded {
            self.sink.set_state(attribute, routed.ack_value, true);
        } else {
            tracing::debug!(
                attribute,
                error = result.error_detail.as_deref().unwrap_or("unknown"),
                "command failed, state left unacknowledged"
            );
        }
        Some(result)
    }
}

/// Reacts to unacknowledged changes only; acknowledged ones are this bridge's
/// own writes echoing back. Each intent runs in its own task.
pub fn spawn_intent_listener<C: Connector, S: StateSink>(
    router: Router<C, S>,
    mut changes: broadcast::Receiver<StateChange>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let change = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                received = changes.recv() => received,
            };

            match change {
                Ok(change) if !change.ack => {
                    let router = router.clone();
                    tokio::spawn(async move {
                        router.on_intent(&change.attribute, change.val).await;
                    });
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "intent listener lagged behind state changes");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::debug!("intent listener stopped");
    })
}
