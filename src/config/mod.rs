use crate::model::DeviceEndpoint;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "config.toml";
const APP_DIR: &str = "webos-tv-bridge";
const ENV_PREFIX: &str = "WEBOS_BRIDGE_";
/// Ceiling for every configured duration: one day.
const MAX_DURATION_MS: u64 = 86_400_000;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    pub tv: TvConfig,
    pub poll: PollConfig,
    pub server: ServerConfig,
    pub keystore: KeyStoreConfig,
}

/// How a `turnOff` intent reaches the TV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TurnOffMode {
    /// `ssap://system/turnOff` request.
    Request,
    /// Synthetic `POWER` press on the pointer input socket.
    #[default]
    Button,
}

impl std::str::FromStr for TurnOffMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "request" => Ok(Self::Request),
            "button" => Ok(Self::Button),
            other => Err(format!("unknown turn_off mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TvConfig {
    pub host: String,
    pub port: u16,
    pub handshake_timeout_ms: u64,
    pub pairing_timeout_ms: u64,
    pub turn_off: TurnOffMode,
}

impl Default for TvConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.100".to_string(),
            port: 3000,
            handshake_timeout_ms: 5000,
            pairing_timeout_ms: 60_000,
            turn_off: TurnOffMode::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PollConfig {
    /// Shared period of the channel, online and input cycles. 0 disables polling.
    pub interval_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self { interval_ms: 10_000 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enable: bool,
    pub port: u16,
    pub token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enable: true,
            port: 7070,
            token: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct KeyStoreConfig {
    pub path: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = Self::default();
        let config_path = active_config_path();

        if let Ok(raw) = fs::read_to_string(&config_path) {
            match toml::from_str::<Config>(&raw) {
                Ok(file_config) => config = file_config,
                Err(err) => {
                    tracing::warn!(path = %config_path.display(), error = %err, "ignoring unparsable config file");
                }
            }
        }

        config.apply_env_overrides()?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.apply_overrides(|name| env::var(format!("{}{}", ENV_PREFIX, name)).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), Box<dyn std::error::Error>>
    where
        F: Fn(&str) -> Option<String>,
    {
        // TV settings
        if let Some(val) = lookup("TV_HOST") {
            self.tv.host = val;
        }
        if let Some(val) = lookup("TV_PORT") {
            if let Ok(port) = val.parse() {
                self.tv.port = port;
            }
        }
        if let Some(val) = lookup("TV_TIMEOUT_MS") {
            if let Ok(timeout) = val.parse() {
                self.tv.handshake_timeout_ms = timeout;
            }
        }
        if let Some(val) = lookup("TV_PAIRING_TIMEOUT_MS") {
            if let Ok(timeout) = val.parse() {
                self.tv.pairing_timeout_ms = timeout;
            }
        }
        if let Some(val) = lookup("TV_TURN_OFF") {
            self.tv.turn_off = val.parse()?;
        }

        // Polling
        if let Some(val) = lookup("POLL_INTERVAL_MS") {
            if let Ok(interval) = val.parse() {
                self.poll.interval_ms = interval;
            }
        }

        // Server settings
        if let Some(val) = lookup("SERVER_ENABLE") {
            self.server.enable = val.parse().unwrap_or(true);
        }
        if let Some(val) = lookup("SERVER_PORT") {
            if let Ok(port) = val.parse() {
                self.server.port = port;
            }
        }
        if let Some(val) = lookup("SERVER_TOKEN") {
            self.server.token = Some(val);
        }

        if let Some(val) = lookup("KEYSTORE_PATH") {
            self.keystore.path = Some(val);
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.tv.host.trim().is_empty() {
            return Err("tv.host must be set".into());
        }
        if self.tv.port == 0 {
            return Err("tv.port must be non-zero".into());
        }
        if self.tv.handshake_timeout_ms == 0 {
            return Err("tv.handshake_timeout_ms must be non-zero".into());
        }
        if self.tv.pairing_timeout_ms < self.tv.handshake_timeout_ms {
            return Err("tv.pairing_timeout_ms must be >= tv.handshake_timeout_ms".into());
        }
        for (name, ms) in [
            ("tv.handshake_timeout_ms", self.tv.handshake_timeout_ms),
            ("tv.pairing_timeout_ms", self.tv.pairing_timeout_ms),
            ("poll.interval_ms", self.poll.interval_ms),
        ] {
            if ms > MAX_DURATION_MS {
                return Err(format!("{name} must be at most {MAX_DURATION_MS}").into());
            }
        }
        if self.server.enable && self.server.port == 0 {
            return Err("server.port must be non-zero".into());
        }
        Ok(())
    }

    pub fn endpoint(&self) -> DeviceEndpoint {
        DeviceEndpoint {
            host: self.tv.host.trim().to_string(),
            port: self.tv.port,
            handshake_timeout: Duration::from_millis(self.tv.handshake_timeout_ms),
            pairing_timeout: Duration::from_millis(self.tv.pairing_timeout_ms),
        }
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        match self.poll.interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<(), Box<dyn std::error::Error>> {
        if path.as_ref().exists() {
            return Err("config.toml already exists".into());
        }
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let data = toml::to_string_pretty(&Config::default())?;
        fs::write(path, data)?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        managed_config_path()
    }
}

pub fn app_dir() -> PathBuf {
    let base = env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|_| env::var("HOME").map(|home| Path::new(&home).join(".config")))
        .unwrap_or_else(|_| PathBuf::from("."));
    base.join(APP_DIR)
}

fn managed_config_path() -> PathBuf {
    if let Ok(path) = env::var(format!("{}CONFIG_PATH", ENV_PREFIX)) {
        return PathBuf::from(path);
    }
    app_dir().join(CONFIG_FILE)
}

fn active_config_path() -> PathBuf {
    let local = PathBuf::from(CONFIG_FILE);
    if local.exists() {
        local
    } else {
        managed_config_path()
    }
}
