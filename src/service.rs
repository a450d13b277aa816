use std::collections::HashSet;

use uuid::Uuid;

use crate::config::{ConfigError, DeviceConfiguration, Permission, Property};
use crate::encoder::Encoding;
use crate::resolver;
use crate::value::{Record, Value};

/// Immutable description of the advertised service, derived from the
/// configuration once per session start.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub uuid: Uuid,
    pub advertised_name: String,
    pub characteristics: Vec<CharacteristicDescriptor>,
}

/// One data endpoint of the advertised service.
#[derive(Debug, Clone)]
pub struct CharacteristicDescriptor {
    pub uuid: Uuid,
    pub name: String,
    pub properties: HashSet<Property>,
    pub permissions: HashSet<Permission>,
    pub data_key: String,
    pub encoding: Encoding,
}

impl ServiceDescriptor {
    /// Builds the service descriptor from a validated configuration.
    pub fn from_config(config: &DeviceConfiguration) -> Result<Self, ConfigError> {
        let uuid = Uuid::parse_str(&config.ble_config.service_uuid)
            .map_err(|_| ConfigError::InvalidServiceUuid(config.ble_config.service_uuid.clone()))?;

        let mut characteristics = Vec::with_capacity(config.ble_config.characteristics.len());
        for characteristic in &config.ble_config.characteristics {
            let characteristic_uuid = Uuid::parse_str(&characteristic.uuid).map_err(|_| {
                ConfigError::InvalidCharacteristicUuid {
                    name: characteristic.name.clone(),
                    uuid: characteristic.uuid.clone(),
                }
            })?;

            if characteristic.data_key.is_empty() {
                return Err(ConfigError::EmptyDataKey(characteristic.name.clone()));
            }

            characteristics.push(CharacteristicDescriptor {
                uuid: characteristic_uuid,
                name: characteristic.name.clone(),
                properties: parse_tokens(&characteristic.properties, Property::from_token),
                permissions: parse_tokens(&characteristic.permissions, Permission::from_token),
                data_key: characteristic.data_key.clone(),
                encoding: Encoding::for_data_key(&characteristic.data_key),
            });
        }

        Ok(Self {
            uuid,
            advertised_name: config.ble_config.advertised_name.clone(),
            characteristics,
        })
    }

    pub fn characteristic_by_uuid(&self, uuid: Uuid) -> Option<&CharacteristicDescriptor> {
        self.characteristics
            .iter()
            .find(|characteristic| characteristic.uuid == uuid)
    }

    /// Manufacturer data blob for the advertisement: a fictional company
    /// id followed by "{manufacturer}:{name}", a separator and the model.
    pub fn manufacturer_data(&self, config: &DeviceConfiguration) -> Vec<u8> {
        let identity = &config.device_config;

        let mut data = vec![0xFF, 0xFE];

        let device_info = format!("{}:{}", identity.manufacturer, identity.name);
        data.extend(device_info.bytes().take(20));

        data.push(0x00);
        data.extend(identity.model.bytes().take(10));

        data
    }
}

/// Identity payload preloaded into the device info characteristic.
pub(crate) fn device_info_payload(config: &DeviceConfiguration) -> Vec<u8> {
    let identity = &config.device_config;

    let mut record = Record::new();
    record.insert(
        "device_name".to_string(),
        Value::from(config.ble_config.advertised_name.clone()),
    );
    record.insert("system_name".to_string(), Value::from(identity.name.clone()));
    record.insert(
        "manufacturer".to_string(),
        Value::from(identity.manufacturer.clone()),
    );
    record.insert("model".to_string(), Value::from(identity.model.clone()));
    record.insert(
        "serial_number".to_string(),
        Value::from(identity.serial_number.clone()),
    );
    record.insert(
        "service_uuid".to_string(),
        Value::from(config.ble_config.service_uuid.clone()),
    );
    record.insert(
        "ble_identifier".to_string(),
        Value::from(format!("{}-{}", identity.manufacturer, identity.model)),
    );
    record.insert(
        "last_updated".to_string(),
        Value::Float(resolver::epoch_seconds()),
    );

    serde_json::to_vec_pretty(&record).unwrap_or_default()
}

fn parse_tokens<T: std::hash::Hash + Eq>(
    tokens: &[String],
    parse: fn(&str) -> Option<T>,
) -> HashSet<T> {
    let mut parsed = HashSet::new();
    for token in tokens {
        match parse(token) {
            Some(value) => {
                parsed.insert(value);
            }
            None => log::warn!("Ignoring unrecognized token '{}'", token),
        }
    }
    parsed
}
