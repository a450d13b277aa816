use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::value::Record;

/// Error raised when a configuration document cannot be used.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid service uuid '{0}'")]
    InvalidServiceUuid(String),

    #[error("invalid uuid '{uuid}' for characteristic '{name}'")]
    InvalidCharacteristicUuid { name: String, uuid: String },

    #[error("characteristic '{0}' has an empty data_key")]
    EmptyDataKey(String),

    #[error("update interval out of range, got {0}")]
    InvalidInterval(f64),

    #[error("randomize range must be a non-negative fraction, got {0}")]
    InvalidRandomizeRange(f64),
}

/// Shortest update interval accepted, in seconds.
const MIN_UPDATE_INTERVAL: f64 = 0.001;

/// Longest update interval accepted, in seconds (one day).
const MAX_UPDATE_INTERVAL: f64 = 86_400.0;

/// Full device description loaded from a configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfiguration {
    pub device_config: DeviceIdentity,
    pub ble_config: BleConfig,
    pub data_config: DataConfig,
    pub data_streams: HashMap<String, DataStream>,
}

/// Identity fields used to populate the device info payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BleConfig {
    pub advertised_name: String,
    pub service_uuid: String,
    pub characteristics: Vec<CharacteristicConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacteristicConfig {
    pub uuid: String,
    pub name: String,
    pub properties: Vec<String>,
    pub permissions: Vec<String>,
    pub data_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub update_interval_seconds: f64,
    /// Informational only. The encoder is selected per data key.
    pub data_format: String,
    pub auto_cycle: bool,
    pub randomize_values: bool,
    pub randomize_range: f64,
}

/// One named data stream backing a characteristic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataStream {
    /// Informational kind label from the document ("array" or "object").
    #[serde(rename = "type")]
    pub kind: String,
    pub data: StreamData,
}

/// Stream content: cycling telemetry records or a single static record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamData {
    Array(Vec<Record>),
    Object(Record),
}

/// Characteristic capability, parsed from a document token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Property {
    Read,
    Write,
    Notify,
    Indicate,
    Broadcast,
    WriteWithoutResponse,
}

impl Property {
    /// Parses a capability token, case-insensitively. Unknown tokens map
    /// to `None` and are dropped by the caller with a warning.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "read" => Some(Property::Read),
            "write" => Some(Property::Write),
            "notify" => Some(Property::Notify),
            "indicate" => Some(Property::Indicate),
            "broadcast" => Some(Property::Broadcast),
            "writewithoutresponse" => Some(Property::WriteWithoutResponse),
            _ => None,
        }
    }
}

/// Characteristic access permission, parsed from a document token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Readable,
    Writeable,
    ReadEncryptionRequired,
    WriteEncryptionRequired,
}

impl Permission {
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "readable" => Some(Permission::Readable),
            "writeable" => Some(Permission::Writeable),
            "readencryptionrequired" => Some(Permission::ReadEncryptionRequired),
            "writeencryptionrequired" => Some(Permission::WriteEncryptionRequired),
            _ => None,
        }
    }
}

impl DeviceConfiguration {
    /// Parse and validate a configuration document.
    pub fn parse(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: DeviceConfiguration = serde_json::from_slice(bytes)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration back into a pretty-printed document.
    pub fn to_json_pretty(&self) -> Result<Vec<u8>, ConfigError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Also re-run at session start: a caller may mutate a parsed
    /// configuration before handing it to the engine.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if Uuid::parse_str(&self.ble_config.service_uuid).is_err() {
            return Err(ConfigError::InvalidServiceUuid(
                self.ble_config.service_uuid.clone(),
            ));
        }

        for characteristic in &self.ble_config.characteristics {
            if Uuid::parse_str(&characteristic.uuid).is_err() {
                return Err(ConfigError::InvalidCharacteristicUuid {
                    name: characteristic.name.clone(),
                    uuid: characteristic.uuid.clone(),
                });
            }

            if characteristic.data_key.is_empty() {
                return Err(ConfigError::EmptyDataKey(characteristic.name.clone()));
            }
        }

        // Bounded so the interval survives the conversion to Duration
        // without panicking or rounding down to zero.
        let interval = self.data_config.update_interval_seconds;
        if !interval.is_finite() || !(MIN_UPDATE_INTERVAL..=MAX_UPDATE_INTERVAL).contains(&interval)
        {
            return Err(ConfigError::InvalidInterval(interval));
        }

        let range = self.data_config.randomize_range;
        if !range.is_finite() || range < 0.0 {
            return Err(ConfigError::InvalidRandomizeRange(range));
        }

        Ok(())
    }
}
