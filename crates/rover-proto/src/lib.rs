pub mod command;
pub mod frame;
pub mod telemetry;

pub use command::{CommandRecord, Vector2};
pub use frame::{decode, encode, ParseError};
pub use telemetry::TelemetryRecord;
