//! Synthetic sensor log records.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Smallest sensor id handed out by the builder.
pub const MIN_SENSOR_ID: u32 = 1;
/// Largest sensor id handed out by the builder.
pub const MAX_SENSOR_ID: u32 = 5000;
/// Lower bound (inclusive) of generated temperatures.
pub const MIN_TEMPERATURE: f64 = 20.0;
/// Upper bound (exclusive) of generated temperatures.
pub const MAX_TEMPERATURE: f64 = 100.0;
/// Size in bytes of the filler payload carried by every record.
pub const HEAVY_PAYLOAD_LEN: usize = 1024;
/// Status reported by every simulated sensor.
pub const STATUS_OK: &str = "OK";

/// One log line emitted by a simulated sensor.
///
/// Serializes to the wire format consumed by the benchmark topic:
///
/// ```json
/// {"sensor_id":42,"temperature":57.3,"status":"OK","timestamp":1700000000.123,"heavy_payload":"xxxx..."}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub sensor_id: u32,
    pub temperature: f64,
    pub status: String,
    /// Seconds since the Unix epoch, with sub-second precision.
    pub timestamp: f64,
    #[serde(rename = "heavy_payload")]
    pub payload: String,
}

impl LogRecord {
    /// Build a fresh record using the thread-local RNG.
    pub fn build() -> Self {
        Self::build_with(&mut rand::rng())
    }

    /// Build a fresh record drawing its random fields from `rng`.
    pub fn build_with<R: Rng>(rng: &mut R) -> Self {
        Self {
            sensor_id: rng.random_range(MIN_SENSOR_ID..=MAX_SENSOR_ID),
            temperature: rng.random_range(MIN_TEMPERATURE..MAX_TEMPERATURE),
            status: STATUS_OK.to_string(),
            timestamp: epoch_seconds(),
            payload: "x".repeat(HEAVY_PAYLOAD_LEN),
        }
    }

    /// Encode the record as UTF-8 JSON bytes.
    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

fn epoch_seconds() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp_micros() as f64 / 1_000_000.0
}
