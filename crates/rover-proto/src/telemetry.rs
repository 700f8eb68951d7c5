use serde::{Deserialize, Serialize};

/// One decoded telemetry line: proximity readings in the order the rover sent them.
/// Sensor count varies between lines; an empty list means no reading this tick.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub distances: Vec<u32>,
}

impl TelemetryRecord {
    pub fn new(distances: Vec<u32>) -> Self {
        Self { distances }
    }

    pub fn is_empty(&self) -> bool {
        self.distances.is_empty()
    }

    /// Closest obstacle reported on this line, if any.
    pub fn nearest(&self) -> Option<u32> {
        self.distances.iter().copied().min()
    }
}
