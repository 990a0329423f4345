//! Configuration documents and persistence seam.
//!
//! ```json
//! { "output_config": { "cfgver": 1, "MaxChannels": 3072,
//!   "channels": { "0": { "type": 0, "0": { ... } } } } }
//! ```
//!
//! Each channel entry names its selected protocol code under `type` and
//! keeps one settings object per protocol code it has been configured for.

use alloc::format;
use alloc::string::{String, ToString};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{ConfigError, StoreError};

pub const CURRENT_CONFIG_VERSION: u32 = 1;

pub const OUTPUT_CONFIG_KEY: &str = "output_config";
pub const VERSION_KEY: &str = "cfgver";
pub const MAX_CHANNELS_KEY: &str = "MaxChannels";
pub const CHANNELS_KEY: &str = "channels";
pub const TYPE_KEY: &str = "type";

/// Persistence of the output configuration document.
pub trait ConfigStore {
    fn load(&mut self) -> Result<Value, StoreError>;

    fn save(&mut self, document: &Value) -> Result<(), StoreError>;
}

/// Overlay the keys `current` knows about with values from `patch`.
///
/// Keys absent from `patch` keep their current value, unknown keys are
/// ignored. Fails without touching `current` if a value has the wrong type.
pub fn merge<T>(current: &T, patch: &Map<String, Value>) -> Result<T, ConfigError>
where
    T: Serialize + DeserializeOwned,
{
    let mut value =
        serde_json::to_value(current).map_err(|error| ConfigError::InvalidValue(error.to_string()))?;
    if let Value::Object(fields) = &mut value {
        for (key, patched) in patch {
            if let Some(field) = fields.get_mut(key) {
                *field = patched.clone();
            }
        }
    }
    serde_json::from_value(value).map_err(|error| ConfigError::InvalidValue(error.to_string()))
}

/// Write the fields of a serializable config into `out`.
pub fn write_fields<T: Serialize>(config: &T, out: &mut Map<String, Value>) {
    if let Ok(Value::Object(fields)) = serde_json::to_value(config) {
        out.extend(fields);
    }
}

/// Read a mandatory object out of `parent`.
pub fn section<'a>(
    parent: &'a Map<String, Value>,
    key: &'static str,
) -> Result<&'a Map<String, Value>, ConfigError> {
    parent
        .get(key)
        .and_then(Value::as_object)
        .ok_or(ConfigError::MissingSection(key))
}

/// Body and channel table of a document, if both are present.
pub fn document_sections(
    document: &Value,
) -> Result<(&Map<String, Value>, &Map<String, Value>), ConfigError> {
    let root = document
        .as_object()
        .ok_or(ConfigError::MissingSection(OUTPUT_CONFIG_KEY))?;
    let body = section(root, OUTPUT_CONFIG_KEY)?;
    let channels = section(body, CHANNELS_KEY)?;
    Ok((body, channels))
}

/// Protocol code selected for a channel entry.
pub fn type_code(channel: &Map<String, Value>) -> Result<u64, ConfigError> {
    match channel.get(TYPE_KEY) {
        Some(value) => value
            .as_u64()
            .ok_or_else(|| ConfigError::InvalidValue(format!("{TYPE_KEY}: {value}"))),
        None => Err(ConfigError::MissingSection(TYPE_KEY)),
    }
}

/// Document body with version and buffer size filled in.
pub fn output_config(max_channels: usize, channels: Map<String, Value>) -> Value {
    let mut body = Map::new();
    body.insert(VERSION_KEY.to_string(), Value::from(CURRENT_CONFIG_VERSION));
    body.insert(MAX_CHANNELS_KEY.to_string(), Value::from(max_channels));
    body.insert(CHANNELS_KEY.to_string(), Value::Object(channels));

    let mut root = Map::new();
    root.insert(OUTPUT_CONFIG_KEY.to_string(), Value::Object(body));
    Value::Object(root)
}
