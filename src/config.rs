use crate::error::{BridgeError, Result};
use crate::heartbeat::{HeartbeatReporter, MAX_HEARTBEAT_MINUTES};
use reqwest::Url;
use serde_derive::Deserialize;
use std::{env, fmt, fs, path::Path, str::FromStr, time::Duration};

/// Only access type the meter client knows how to talk to.
const ACCESS_TYPE_ON_PREMISE: &str = "OnPremise";

pub const ENV_HOST: &str = "SHELLY_EM_HOST";
pub const ENV_USERNAME: &str = "SHELLY_EM_USERNAME";
pub const ENV_PASSWORD: &str = "SHELLY_EM_PASSWORD";

/// Role the service announces itself as on the energy-management bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Grid,
    PvInverter,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Grid => "grid",
            Role::PvInverter => "pvinverter",
        }
    }
}

impl FromStr for Role {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "grid" => Ok(Role::Grid),
            "pvinverter" => Ok(Role::PvInverter),
            other => Err(BridgeError::Configuration(format!(
                "role '{other}' is not supported (expected grid or pvinverter)"
            ))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The meter's `/status` URL, basic credentials embedded in the authority.
#[derive(Debug, Clone, PartialEq)]
pub struct MeterEndpoint {
    url: Url,
}

impl MeterEndpoint {
    /// Builds the status URL for a meter on the local network.
    /// `host` may carry an explicit `http://` or `https://` scheme.
    pub fn on_premise(host: &str, username: &str, password: &str) -> Result<Self> {
        let host = host.trim();
        if host.is_empty() {
            return Err(BridgeError::Configuration(
                "onpremise.host must be set".to_string(),
            ));
        }
        let base = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("http://{host}")
        };
        let mut url = Url::parse(&base).map_err(|e| {
            BridgeError::Configuration(format!("invalid meter host '{host}': {e}"))
        })?;
        url.set_path("/status");

        if !username.is_empty() {
            url.set_username(username).map_err(|_| {
                BridgeError::Configuration(format!("cannot embed username in '{host}'"))
            })?;
        }
        if !password.is_empty() {
            url.set_password(Some(password)).map_err(|_| {
                BridgeError::Configuration(format!("cannot embed password in '{host}'"))
            })?;
        }

        Ok(Self { url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

// Never print the password.
impl fmt::Display for MeterEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut shown = self.url.clone();
        if shown.password().is_some() {
            let _ = shown.set_password(Some("***"));
        }
        write!(f, "{shown}")
    }
}

/// Operator settings, read once at startup and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSnapshot {
    pub device_instance: u32,
    pub custom_name: String,
    pub channel: usize,
    pub role: Role,
    /// 0 = AC input 1, 1 = AC output, 2 = AC input 2
    pub ac_position: u8,
    pub endpoint: MeterEndpoint,
    /// Sign-of-life interval; 0 disables the heartbeat.
    pub heartbeat_interval_minutes: u64,
}

impl ConfigSnapshot {
    /// Reads the TOML file at `path`, then applies `SHELLY_EM_*` env overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            BridgeError::Configuration(format!("read config file {}: {e}", path.display()))
        })?;
        let mut file = parse_file_config(&content)?;
        apply_endpoint_overrides(&mut file, |key| env::var(key).ok());
        Self::from_file_config(file)
    }

    /// Parses a config document without consulting the environment.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Self::from_file_config(parse_file_config(content)?)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        HeartbeatReporter::new(self.heartbeat_interval_minutes).period()
    }

    /// Bus name the attribute store is published under,
    /// e.g. `com.victronenergy.grid.http_40`.
    pub fn service_name(&self) -> String {
        format!(
            "com.victronenergy.{}.http_{:02}",
            self.role, self.device_instance
        )
    }

    fn from_file_config(file: FileConfig) -> Result<Self> {
        let defaults = file.default;

        let device_instance = defaults
            .device_instance
            .ok_or_else(|| missing("default.device_instance"))?;
        let custom_name = defaults
            .custom_name
            .ok_or_else(|| missing("default.custom_name"))?;

        let channel = defaults.channel.unwrap_or(0);
        if channel > 1 {
            return Err(BridgeError::Configuration(format!(
                "default.channel must be 0 or 1, got {channel}"
            )));
        }

        let role = match defaults.role {
            Some(role) => role.parse()?,
            None => Role::Grid,
        };

        let ac_position = defaults.ac_position.unwrap_or(0);
        if ac_position > 2 {
            return Err(BridgeError::Configuration(format!(
                "default.ac_position must be 0, 1 or 2, got {ac_position}"
            )));
        }

        let access_type = defaults
            .access_type
            .ok_or_else(|| missing("default.access_type"))?;
        if access_type != ACCESS_TYPE_ON_PREMISE {
            return Err(BridgeError::Configuration(format!(
                "AccessType {access_type} is not supported"
            )));
        }

        let heartbeat_interval_minutes = defaults.sign_of_life_log.unwrap_or(0);
        if heartbeat_interval_minutes > MAX_HEARTBEAT_MINUTES {
            return Err(BridgeError::Configuration(format!(
                "default.sign_of_life_log must be at most {MAX_HEARTBEAT_MINUTES} minutes, got {heartbeat_interval_minutes}"
            )));
        }

        let on_premise = file
            .onpremise
            .ok_or_else(|| missing("[onpremise] section"))?;
        let endpoint = MeterEndpoint::on_premise(
            on_premise.host.as_deref().unwrap_or_default(),
            on_premise.username.as_deref().unwrap_or_default(),
            on_premise.password.as_deref().unwrap_or_default(),
        )?;

        Ok(Self {
            device_instance,
            custom_name,
            channel,
            role,
            ac_position,
            endpoint,
            heartbeat_interval_minutes,
        })
    }
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    default: FileDefaults,
    onpremise: Option<FileOnPremise>,
}

#[derive(Debug, Deserialize)]
struct FileDefaults {
    device_instance: Option<u32>,
    custom_name: Option<String>,
    channel: Option<usize>,
    role: Option<String>,
    ac_position: Option<u8>,
    sign_of_life_log: Option<u64>,
    access_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileOnPremise {
    host: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

fn parse_file_config(content: &str) -> Result<FileConfig> {
    toml::from_str(content)
        .map_err(|e| BridgeError::Configuration(format!("parse toml config: {e}")))
}

fn apply_endpoint_overrides(file: &mut FileConfig, lookup: impl Fn(&str) -> Option<String>) {
    let host = lookup(ENV_HOST);
    let username = lookup(ENV_USERNAME);
    let password = lookup(ENV_PASSWORD);
    if host.is_none() && username.is_none() && password.is_none() {
        return;
    }

    let on_premise = file.onpremise.get_or_insert_with(FileOnPremise::default);
    if let Some(host) = host {
        on_premise.host = Some(host);
    }
    if let Some(username) = username {
        on_premise.username = Some(username);
    }
    if let Some(password) = password {
        on_premise.password = Some(password);
    }
}

fn missing(key: &str) -> BridgeError {
    BridgeError::Configuration(format!("{key} is required"))
}
