//! Provisioning files.
//!
//! `authority.toml` belongs to the issuer and holds every secret. Each reader
//! gets its own `reader_<id>.toml` with only what that reader needs.

use {
    consts::{MQTT_PORT, PUBLISH_TOPIC},
    std::path::{Path, PathBuf},
    tag_protocol::SchemeKind,
};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ReaderConfig {
    pub id: u32,
    pub label: String,
    pub scheme: SchemeKind,
    /// AES key shared with the issuer, hex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_key: Option<String>,
    /// SEC1 issuer public key, hex (StepAuth).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_public_key: Option<String>,
    /// SEC1 El-Gamal public key, hex (Tracker).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracker_public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x0: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coefficient: Option<String>,
    /// Counter increment; when set the reader counts instead of tracking
    /// the path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<String>,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wifi: Option<WifiConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub topic: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "localhost".to_owned(),
            port: MQTT_PORT,
            topic: PUBLISH_TOPIC.to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WifiConfig {
    pub ssid: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AuthorityConfig {
    pub scheme: SchemeKind,
    /// PEM encoded issuer signing key, relative to this file (StepAuth).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_key: Option<PathBuf>,
    /// Key shared by all readers, hex (Baseline).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_key: Option<String>,
    /// Paths the manager accepts (Tracker).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub valid_paths: Vec<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracker: Option<TrackerSecrets>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub readers: Vec<ReaderEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TrackerSecrets {
    pub secret: String,
    pub hash_key: String,
    pub x0: String,
    pub a0: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ReaderEntry {
    pub id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coefficient: Option<String>,
}

pub fn load<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, Error> {
    let config = std::fs::read_to_string(path)?;
    toml::from_str(&config).map_err(Into::into)
}

pub fn save<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), Error> {
    let config = toml::to_string(config)?;
    std::fs::write(path, config)?;
    Ok(())
}

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Toml(toml::de::Error),
    TomlSerialize(toml::ser::Error),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Toml(e)
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Error::TomlSerialize(e)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "failed to access config file: {e}"),
            Error::Toml(e) => write!(f, "config file format error in TOML: {e}"),
            Error::TomlSerialize(e) => write!(f, "failed to serialize config: {e}"),
        }
    }
}

impl std::error::Error for Error {}
