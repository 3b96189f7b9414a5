use std::fmt;
use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::dispatch::DEFAULT_MAX_IN_FLIGHT;
use crate::estimate::PayloadBudget;

pub const DEFAULT_CREDENTIALS_PATH: &str = "credentials.json";

/// Environment variables with this prefix override file values, e.g.
/// `SKYLIGHT_PASSWORD` or `SKYLIGHT_APIURL`.
pub const ENV_PREFIX: &str = "SKYLIGHT";

/// Broker port used for TCP connections when the url names none.
pub const DEFAULT_MQTT_TLS_PORT: u16 = 8883;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load credentials: {0}")]
    Load(#[from] config::ConfigError),
    #[error("credentials are missing `{0}`")]
    MissingField(&'static str),
    #[error("credentials field `{field}` is not a valid url: {source}")]
    InvalidUrl {
        field: &'static str,
        source: url::ParseError,
    },
    #[error("credentials field `{field}` must use http or https, got `{scheme}`")]
    UnsupportedScheme { field: &'static str, scheme: String },
    #[error("credentials field `{0}` has no host")]
    MissingHost(&'static str),
    #[error("{0} can only be changed before connecting")]
    AlreadyConnected(&'static str),
    #[error("invalid setting: {0}")]
    InvalidSetting(String),
}

/// Raw shape of `credentials.json`.
///
/// The config crate folds keys to lowercase, so `apiUrl` arrives as `apiurl`;
/// the camelCase aliases cover values deserialized without it.
#[derive(Debug, Default, Deserialize)]
struct RawCredentials {
    #[serde(default, alias = "integrationid", alias = "integrationId")]
    id: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default, rename = "apiurl", alias = "apiUrl")]
    api_url: Option<String>,
    #[serde(default, rename = "mqtturl", alias = "mqttUrl")]
    mqtt_url: Option<String>,
}

/// Integration credentials, trimmed and validated once at load time.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub integration_id: String,
    pub username: String,
    pub password: String,
    pub domain: String,
    pub api_url: Url,
    pub mqtt_url: Url,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("integration_id", &self.integration_id)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("domain", &self.domain)
            .field("api_url", &self.api_url.as_str())
            .field("mqtt_url", &self.mqtt_url.as_str())
            .finish()
    }
}

impl Credentials {
    /// Reads a credentials file, then applies `SKYLIGHT_*` overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from(path.as_ref()).format(FileFormat::Json))
            .add_source(Environment::with_prefix(ENV_PREFIX))
            .build()?;
        Self::from_raw(settings.try_deserialize()?)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from_str(json, FileFormat::Json))
            .build()?;
        Self::from_raw(settings.try_deserialize()?)
    }

    fn from_raw(raw: RawCredentials) -> Result<Self, ConfigError> {
        let integration_id = required("id", raw.id)?;
        let username = required("username", raw.username)?;
        let password = required("password", raw.password)?;
        let domain = required("domain", raw.domain)?;

        let api_url = parse_url("apiUrl", &required("apiUrl", raw.api_url)?)?;
        if !matches!(api_url.scheme(), "http" | "https") {
            return Err(ConfigError::UnsupportedScheme {
                field: "apiUrl",
                scheme: api_url.scheme().to_string(),
            });
        }

        // Bare broker hosts are accepted and treated as TLS endpoints.
        let mqtt_raw = required("mqttUrl", raw.mqtt_url)?;
        let mqtt_url = if mqtt_raw.contains("://") {
            parse_url("mqttUrl", &mqtt_raw)?
        } else {
            parse_url("mqttUrl", &format!("ssl://{mqtt_raw}"))?
        };
        if mqtt_url.host_str().map_or(true, str::is_empty) {
            return Err(ConfigError::MissingHost("mqttUrl"));
        }

        Ok(Self {
            integration_id,
            username,
            password,
            domain,
            api_url,
            mqtt_url,
        })
    }

    /// Broker address with the scheme stripped, `host` or `host:port`.
    pub fn mqtt_host(&self) -> String {
        let host = self.mqtt_url.host_str().unwrap_or_default();
        match self.mqtt_url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }
}

fn required(field: &'static str, value: Option<String>) -> Result<String, ConfigError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::MissingField(field))
}

fn parse_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|source| ConfigError::InvalidUrl { field, source })
}

/// How the messaging client reaches the broker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MqttConnectionType {
    #[default]
    Tcp,
    WebSocket,
}

impl MqttConnectionType {
    pub fn broker_endpoint(self, credentials: &Credentials) -> String {
        let host = credentials.mqtt_url.host_str().unwrap_or_default();
        match self {
            MqttConnectionType::Tcp => {
                let port = credentials.mqtt_url.port().unwrap_or(DEFAULT_MQTT_TLS_PORT);
                format!("mqtts://{host}:{port}")
            }
            MqttConnectionType::WebSocket => format!("wss://{host}/mqtt"),
        }
    }
}

/// Client tunables. The payload budget and connection type are fixed once
/// the manager connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientSettings {
    pub max_payload: PayloadBudget,
    pub mqtt_connection_type: MqttConnectionType,
    pub max_in_flight: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            max_payload: PayloadBudget::default(),
            mqtt_connection_type: MqttConnectionType::default(),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}
