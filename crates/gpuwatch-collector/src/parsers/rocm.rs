use std::collections::BTreeMap;
use std::sync::Arc;

use gpuwatch_core::{bytes_to_megabytes, DeviceSample};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;

use super::{finite, OutputParser};
use crate::registry::DeviceRegistry;

/// One card entry of `rocm-smi --json`. Every value is emitted as a string.
#[derive(Debug, Default, Deserialize)]
struct RocmSmiCard {
    #[serde(rename = "GUID", default)]
    id: Option<String>,
    #[serde(rename = "Card series", default)]
    name: String,
    #[serde(rename = "Temperature (Sensor edge) (C)", default, deserialize_with = "lenient_number")]
    temperature: Option<f64>,
    #[serde(rename = "VRAM Total Used Memory (B)", default, deserialize_with = "lenient_number")]
    memory_used: Option<f64>,
    #[serde(rename = "VRAM Total Memory (B)", default, deserialize_with = "lenient_number")]
    memory_total: Option<f64>,
    #[serde(rename = "GPU use (%)", default, deserialize_with = "lenient_number")]
    usage: Option<f64>,
    #[serde(rename = "Average Graphics Package Power (W)", default, deserialize_with = "lenient_number")]
    power_package: Option<f64>,
    #[serde(rename = "Current Socket Graphics Package Power (W)", default, deserialize_with = "lenient_number")]
    power_socket: Option<f64>,
}

impl RocmSmiCard {
    /// Older cards report average package power, newer ones only current socket power
    fn preferred_power(&self) -> f64 {
        self.power_package.or(self.power_socket).unwrap_or(0.0)
    }
}

/// Accepts `"12.5"`, `12.5`, `null` or a non-numeric string such as `"N/A"`
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => finite(&s),
        _ => None,
    })
}

/// Parses the JSON map printed by `rocm-smi --json`
pub struct RocmSmiParser {
    registry: Arc<DeviceRegistry>,
}

impl RocmSmiParser {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self { registry }
    }
}

impl OutputParser for RocmSmiParser {
    fn parse(&mut self, chunk: &[u8]) -> bool {
        let cards: BTreeMap<String, RocmSmiCard> = match serde_json::from_slice(chunk) {
            Ok(cards) => cards,
            Err(e) => {
                debug!(error = %e, "Failed to parse rocm-smi JSON");
                return false;
            }
        };
        if cards.is_empty() {
            return false;
        }

        let mut devices = self.registry.lock();
        for (card, info) in cards {
            let id = info.id.clone().unwrap_or(card);
            let gpu = devices
                .entry(id)
                .or_insert_with(|| DeviceSample::named(info.name.trim()));

            gpu.temperature = info.temperature.unwrap_or(0.0);
            gpu.memory_used = bytes_to_megabytes(info.memory_used.unwrap_or(0.0));
            gpu.memory_total = bytes_to_megabytes(info.memory_total.unwrap_or(0.0));
            gpu.accumulate(info.usage.unwrap_or(0.0), info.preferred_power());
        }
        true
    }
}
