//! Line framing shared with the rover firmware.
//!
//! Outbound: `<driveX>,<driveY>,<sweep>,<dodge>,<sound>\r\n` (flags as 1/0).
//! Inbound:  `<d0>,<d1>,...,<dN>\r\n`, non-negative integer distances.

use thiserror::Error;

use crate::command::CommandRecord;
use crate::telemetry::TelemetryRecord;

pub const LINE_TERMINATOR: &str = "\r\n";
pub const FIELD_SEPARATOR: char = ',';

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed telemetry token {token:?} at field {position}")]
    Malformed { token: String, position: usize },
}

pub fn encode(cmd: &CommandRecord) -> String {
    let drive = cmd.drive.clamp();
    let mut line = String::with_capacity(32);
    push_axis(&mut line, drive.x);
    line.push(FIELD_SEPARATOR);
    push_axis(&mut line, drive.y);
    for flag in [cmd.sweep_enabled, cmd.dodge_mode_enabled, cmd.sound_enabled] {
        line.push(FIELD_SEPARATOR);
        line.push(if flag { '1' } else { '0' });
    }
    line.push_str(LINE_TERMINATOR);
    line
}

// f32 Display is shortest round-trip and never scientific, but prints
// integral values bare ("1"). The firmware parser expects "1.0", so the
// ".0" is appended here.
fn push_axis(out: &mut String, v: f32) {
    let v = if v == 0.0 { 0.0 } else { v };
    let text = v.to_string();
    out.push_str(&text);
    if !text.contains('.') {
        out.push_str(".0");
    }
}

pub fn decode(line: &str) -> Result<TelemetryRecord, ParseError> {
    let body = line.trim_end_matches(['\r', '\n']);
    if body.is_empty() {
        return Ok(TelemetryRecord::default());
    }

    let distances = body
        .split(FIELD_SEPARATOR)
        .enumerate()
        .map(|(position, token)| {
            token.parse::<u32>().map_err(|_| ParseError::Malformed {
                token: token.to_string(),
                position,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(TelemetryRecord { distances })
}

/// Renders telemetry the way the rover firmware does. Used by simulators and tests.
pub fn encode_telemetry(rec: &TelemetryRecord) -> String {
    let mut line = String::with_capacity(rec.distances.len() * 4 + LINE_TERMINATOR.len());
    for (i, d) in rec.distances.iter().enumerate() {
        if i > 0 {
            line.push(FIELD_SEPARATOR);
        }
        line.push_str(&d.to_string());
    }
    line.push_str(LINE_TERMINATOR);
    line
}
