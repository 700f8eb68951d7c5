use anyhow::Result;
use std::collections::HashSet;

use crate::devices::PairedDevice;
use crate::LinkPolicy;

pub fn check_policy(p: &LinkPolicy) -> Result<()> {
    anyhow::ensure!(p.write_interval_ms >= 10 && p.write_interval_ms <= 1000, "link.write_interval_ms should be 10..1000");
    anyhow::ensure!(p.retry_delay_ms <= 5000, "link.retry_delay_ms above 5s stalls the command stream");
    anyhow::ensure!(p.max_io_retries <= 5, "link.max_io_retries too high");
    if let Some(t) = p.connect_timeout_ms {
        anyhow::ensure!(t >= 500, "link.connect_timeout_ms too short for an rfcomm handshake");
    }
    Ok(())
}

pub fn check_devices(devices: &[PairedDevice]) -> Result<()> {
    let mut seen = HashSet::new();
    for d in devices {
        anyhow::ensure!(!d.id.as_str().is_empty(), "device {:?} has an empty id", d.name);
        anyhow::ensure!(!d.port.is_empty(), "device {} has no port", d.id);
        anyhow::ensure!(d.baud > 0, "device {} baud invalid", d.id);
        anyhow::ensure!(d.speaks_spp(), "device {} service_uuid {} is not the serial port profile", d.id, d.service_uuid);
        anyhow::ensure!(seen.insert(d.id.as_str().to_ascii_uppercase()), "duplicate device id {}", d.id);
    }
    Ok(())
}
