use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const ATTR_POPUP: &str = "popup";
pub const ATTR_TURN_OFF: &str = "turnOff";
pub const ATTR_MUTE: &str = "mute";
pub const ATTR_VOLUME_UP: &str = "volumeUp";
pub const ATTR_VOLUME_DOWN: &str = "volumeDown";
pub const ATTR_3D_MODE: &str = "3Dmode";
pub const ATTR_LAUNCH: &str = "launch";
pub const ATTR_CHANNEL: &str = "channel";
pub const ATTR_INPUT: &str = "input";
pub const ATTR_BUTTON: &str = "button";
pub const ATTR_POWER: &str = "power";

/// Where the TV listens. Built once from config and shared read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEndpoint {
    pub host: String,
    pub port: u16,
    pub handshake_timeout: Duration,
    pub pairing_timeout: Duration,
}

impl DeviceEndpoint {
    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum InputSource {
    #[serde(rename = "HDMI_1")]
    Hdmi1,
    #[serde(rename = "HDMI_2")]
    Hdmi2,
    #[serde(rename = "HDMI_3")]
    Hdmi3,
    #[serde(rename = "SCART_1")]
    Scart1,
    #[serde(rename = "COMP_1")]
    Comp1,
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
}

impl InputSource {
    /// Exact-match lookup of the foreground app that represents an input.
    /// Anything else is not an input source and yields `None`.
    pub fn from_app_id(app_id: &str) -> Option<Self> {
        match app_id {
            "com.webos.app.hdmi1" => Some(Self::Hdmi1),
            "com.webos.app.hdmi2" => Some(Self::Hdmi2),
            "com.webos.app.hdmi3" => Some(Self::Hdmi3),
            "com.webos.app.externalinput.scart" => Some(Self::Scart1),
            "com.webos.app.externalinput.component" => Some(Self::Comp1),
            _ => None,
        }
    }

    pub fn from_state(value: &str) -> Self {
        match value {
            "HDMI_1" => Self::Hdmi1,
            "HDMI_2" => Self::Hdmi2,
            "HDMI_3" => Self::Hdmi3,
            "SCART_1" => Self::Scart1,
            "COMP_1" => Self::Comp1,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hdmi1 => "HDMI_1",
            Self::Hdmi2 => "HDMI_2",
            Self::Hdmi3 => "HDMI_3",
            Self::Scart1 => "SCART_1",
            Self::Comp1 => "COMP_1",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed view of the acknowledged TV state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceState {
    pub channel: String,
    pub power: bool,
    pub input: InputSource,
}
