use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::transport::{DeviceId, SPP_SERVICE_UUID};

/// A rover that has already been paired with this controller and bound to a
/// local RFCOMM serial node (e.g. `rfcomm bind 0 98:D3:31:F5:12:34`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairedDevice {
    /// Bluetooth address.
    pub id: DeviceId,
    pub name: String,

    /// Serial node the address is bound to, e.g. /dev/rfcomm0.
    pub port: String,

    /// HC-05/HC-06 modules ship at 9600.
    #[serde(default = "default_baud")]
    pub baud: u32,

    #[serde(default = "default_service_uuid")]
    pub service_uuid: String,
}

fn default_baud() -> u32 {
    9600
}

fn default_service_uuid() -> String {
    SPP_SERVICE_UUID.to_string()
}

impl PairedDevice {
    pub fn speaks_spp(&self) -> bool {
        self.service_uuid.eq_ignore_ascii_case(SPP_SERVICE_UUID)
    }
}

/// Devices the pairing side has handed us. Lookups accept the address or the name.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: Vec<PairedDevice>,
}

impl DeviceRegistry {
    pub fn new(devices: Vec<PairedDevice>) -> Self {
        Self { devices }
    }

    pub fn devices(&self) -> &[PairedDevice] {
        &self.devices
    }

    pub fn resolve(&self, key: &str) -> Option<&PairedDevice> {
        self.devices
            .iter()
            .find(|d| d.id.as_str().eq_ignore_ascii_case(key))
            .or_else(|| self.devices.iter().find(|d| d.name == key))
    }
}

/// Serial ports the OS currently exposes. Bound RFCOMM nodes show up here
/// even when they are missing from the config.
pub fn scan_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports().context("enumerate serial ports")?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

pub fn is_rfcomm_port(path: &str) -> bool {
    path.rsplit('/').next().map(|n| n.starts_with("rfcomm")).unwrap_or(false)
}
