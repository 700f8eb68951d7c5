use serde::{Deserialize, Serialize};
use std::ops::Add;

/// Joystick-space vector. Axes are expected in [-1.0, 1.0]; use
/// [`Vector2::clamped`] (or [`Vector2::clamp`]) before putting one on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

impl Vector2 {
    pub const ZERO: Vector2 = Vector2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Builds a vector with both axes clamped to [-1.0, 1.0] (inclusive). NaN becomes 0.
    pub fn clamped(x: f32, y: f32) -> Self {
        Self { x: clamp_axis(x), y: clamp_axis(y) }
    }

    pub fn clamp(self) -> Self {
        Self::clamped(self.x, self.y)
    }
}

impl Add for Vector2 {
    type Output = Vector2;

    fn add(self, rhs: Vector2) -> Vector2 {
        Vector2 { x: self.x + rhs.x, y: self.y + rhs.y }
    }
}

fn clamp_axis(v: f32) -> f32 {
    if v.is_nan() { 0.0 } else { v.clamp(-1.0, 1.0) }
}

/// Snapshot of everything the rover firmware expects on each command line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub drive: Vector2,
    pub sweep_enabled: bool,
    /// Only acted on by the firmware while sweeping, but always transmitted.
    pub dodge_mode_enabled: bool,
    pub sound_enabled: bool,
}

impl Default for CommandRecord {
    fn default() -> Self {
        Self {
            drive: Vector2::ZERO,
            sweep_enabled: false,
            dodge_mode_enabled: false,
            sound_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_each_axis_inclusively() {
        assert_eq!(Vector2::clamped(1.0, -1.0), Vector2::new(1.0, -1.0));
        assert_eq!(Vector2::clamped(1.7, -3.2), Vector2::new(1.0, -1.0));
        assert_eq!(Vector2::clamped(0.25, -0.5), Vector2::new(0.25, -0.5));
    }

    #[test]
    fn nan_axis_becomes_zero() {
        assert_eq!(Vector2::clamped(f32::NAN, 0.5), Vector2::new(0.0, 0.5));
    }

    #[test]
    fn combined_sticks_are_clamped_after_adding() {
        let throttle = Vector2::new(0.0, 0.8);
        let steer = Vector2::new(0.6, 0.7);
        assert_eq!((throttle + steer).clamp(), Vector2::new(0.6, 1.0));
    }

    #[test]
    fn sound_starts_enabled() {
        let rec = CommandRecord::default();
        assert!(rec.sound_enabled);
        assert!(!rec.sweep_enabled);
        assert!(!rec.dodge_mode_enabled);
        assert_eq!(rec.drive, Vector2::ZERO);
    }
}
