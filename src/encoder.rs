use std::time::Duration;

use thiserror::Error;

use crate::value::Record;

/// Data key whose characteristic is preloaded with device identity.
pub const DEVICE_INFO_KEY: &str = "device_info";

/// Data key encoded as a fixed-width binary distance frame.
pub const LIDAR_KEY: &str = "lidar_measurements";

/// Data key throttled to one dispatch per refresh window.
pub const BATTERY_KEY: &str = "battery_info";

/// Record field holding the millimeter distances for the binary frame.
pub const DISTANCES_FIELD: &str = "distances_mm";

/// Fixed size of the binary distance frame: 20 u16 values.
pub const DISTANCE_FRAME_LEN: usize = 40;

const MAX_DISTANCES: usize = DISTANCE_FRAME_LEN / 2;

/// Minimum time between two battery dispatches.
pub const BATTERY_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Error raised when a record does not fit its encoding.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("missing '{0}' field")]
    MissingField(&'static str),

    #[error("field '{0}' is not an integer sequence")]
    InvalidShape(&'static str),

    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encoding strategy for a characteristic, selected by its data key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Self-describing JSON payload.
    Structured,
    /// 40-byte little-endian u16 distance frame.
    DistanceFrame,
    /// JSON payload, dispatched at most once per refresh window.
    RateLimited,
}

impl Encoding {
    pub fn for_data_key(data_key: &str) -> Self {
        match data_key {
            LIDAR_KEY => Encoding::DistanceFrame,
            BATTERY_KEY => Encoding::RateLimited,
            _ => Encoding::Structured,
        }
    }

    /// Encodes a resolved record into the characteristic payload.
    pub fn encode(&self, record: &Record) -> Result<Vec<u8>, EncodeError> {
        match self {
            Encoding::Structured | Encoding::RateLimited => Ok(serde_json::to_vec(record)?),
            Encoding::DistanceFrame => encode_distance_frame(record),
        }
    }
}

/// Packs the record's distance sequence into exactly 40 bytes.
///
/// Takes at most 20 entries, clamps each to `[0, 65535]` and writes it as
/// an unsigned 16-bit little-endian value, padding with zeros.
fn encode_distance_frame(record: &Record) -> Result<Vec<u8>, EncodeError> {
    let distances = record
        .get(DISTANCES_FIELD)
        .ok_or(EncodeError::MissingField(DISTANCES_FIELD))?
        .as_sequence()
        .ok_or(EncodeError::InvalidShape(DISTANCES_FIELD))?;

    let mut frame = Vec::with_capacity(DISTANCE_FRAME_LEN);
    for value in distances.iter().take(MAX_DISTANCES) {
        let distance = value
            .as_integer()
            .ok_or(EncodeError::InvalidShape(DISTANCES_FIELD))?;
        let clamped = distance.clamp(0, u16::MAX as i64) as u16;
        frame.extend_from_slice(&clamped.to_le_bytes());
    }

    frame.resize(DISTANCE_FRAME_LEN, 0);
    Ok(frame)
}
