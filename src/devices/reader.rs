use log::{debug, warn};
use std::sync::Arc;

use super::catalogue::RegisterCatalogue;
use super::reading::{round_to, Reading};
use crate::modbus::client::ModbusClientTrait;

/// Reads one device's catalogue over the field bus, tolerating per-register failures.
pub struct DeviceReader {
    client: Arc<dyn ModbusClientTrait>,
}

impl DeviceReader {
    pub fn new(client: Arc<dyn ModbusClientTrait>) -> Self {
        Self { client }
    }

    /// Returns the values that could be read and whether at least one succeeded.
    pub async fn read(&self, device_id: u8, catalogue: &RegisterCatalogue) -> (Reading, bool) {
        let mut reading = Reading::new();

        for (module, spec) in catalogue.iter() {
            match self
                .client
                .read_float(device_id, spec.function, spec.address, spec.word_order)
                .await
            {
                Ok(value) if value.is_finite() => {
                    reading.insert(spec.name, round_to(value as f64, spec.round));
                }
                Ok(value) => {
                    warn!(
                        "485 Read Error - dev {} {}@0x{:04X}: non-finite value {}",
                        device_id, module, spec.address, value
                    );
                }
                Err(e) => {
                    warn!(
                        "485 Read Error - dev {} {}@0x{:04X}: {}",
                        device_id, module, spec.address, e
                    );
                }
            }
        }

        let any_valid = !reading.is_empty();
        if any_valid {
            debug!("Valid 485 data: {}", reading);
        } else {
            warn!("No valid 485 data from dev {}", device_id);
        }
        (reading, any_valid)
    }
}
