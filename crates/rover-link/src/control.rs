use std::sync::{Arc, Mutex, MutexGuard};

use rover_proto::{CommandRecord, Vector2};

/// Raw controller inputs. The command record is derived from these on every
/// write tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlInputs {
    pub left_stick: Vector2,
    pub right_stick: Vector2,
    /// false: left stick is throttle (y), right stick steers (x). true: roles swapped.
    pub swapped: bool,
    pub sweep_enabled: bool,
    pub dodge_mode_enabled: bool,
    pub sound_enabled: bool,
}

impl Default for ControlInputs {
    fn default() -> Self {
        let rec = CommandRecord::default();
        Self {
            left_stick: Vector2::ZERO,
            right_stick: Vector2::ZERO,
            swapped: false,
            sweep_enabled: rec.sweep_enabled,
            dodge_mode_enabled: rec.dodge_mode_enabled,
            sound_enabled: rec.sound_enabled,
        }
    }
}

impl ControlInputs {
    pub fn to_command(&self) -> CommandRecord {
        CommandRecord {
            drive: (self.left_stick + self.right_stick).clamp(),
            sweep_enabled: self.sweep_enabled,
            dodge_mode_enabled: self.dodge_mode_enabled,
            sound_enabled: self.sound_enabled,
        }
    }

    pub fn set_left_stick(&mut self, v: Vector2) {
        self.left_stick = if self.swapped { Vector2::new(v.x, 0.0) } else { Vector2::new(0.0, v.y) };
    }

    pub fn set_right_stick(&mut self, v: Vector2) {
        self.right_stick = if self.swapped { Vector2::new(0.0, v.y) } else { Vector2::new(v.x, 0.0) };
    }

    pub fn set_sweep(&mut self, on: bool) {
        self.sweep_enabled = on;
        if !on {
            self.dodge_mode_enabled = false;
        }
    }

    /// Ignored while sweeping is off.
    pub fn set_dodge_mode(&mut self, on: bool) {
        if self.sweep_enabled || !on {
            self.dodge_mode_enabled = on;
        }
    }
}

/// Shared handle to the controller state. Cheap to clone; every clone sees
/// the same record. Reads and writes take the whole record under one lock.
#[derive(Debug, Clone, Default)]
pub struct ControlState {
    inner: Arc<Mutex<ControlInputs>>,
}

impl ControlState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ControlInputs> {
        // Inputs are plain values; a panicked writer cannot leave them half-built.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> CommandRecord {
        self.lock().to_command()
    }

    pub fn inputs(&self) -> ControlInputs {
        *self.lock()
    }

    /// Applies several changes as one update.
    pub fn update<R>(&self, f: impl FnOnce(&mut ControlInputs) -> R) -> R {
        let mut guard = self.lock();
        f(&mut *guard)
    }

    pub fn set_left_stick(&self, v: Vector2) {
        self.update(|i| i.set_left_stick(v));
    }

    pub fn set_right_stick(&self, v: Vector2) {
        self.update(|i| i.set_right_stick(v));
    }

    /// Single-joystick callers: sets the combined drive vector directly.
    pub fn set_drive(&self, v: Vector2) {
        self.update(|i| {
            i.left_stick = v;
            i.right_stick = Vector2::ZERO;
        });
    }

    pub fn release_sticks(&self) {
        self.update(|i| {
            i.left_stick = Vector2::ZERO;
            i.right_stick = Vector2::ZERO;
        });
    }

    pub fn set_swapped(&self, on: bool) {
        self.update(|i| i.swapped = on);
    }

    pub fn set_sweep(&self, on: bool) {
        self.update(|i| i.set_sweep(on));
    }

    pub fn set_dodge_mode(&self, on: bool) {
        self.update(|i| i.set_dodge_mode(on));
    }

    pub fn set_sound(&self, on: bool) {
        self.update(|i| i.sound_enabled = on);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sticks_are_masked_to_their_axis() {
        let st = ControlState::new();
        st.set_left_stick(Vector2::new(0.9, 0.4));
        st.set_right_stick(Vector2::new(-0.3, 0.8));
        assert_eq!(st.snapshot().drive, Vector2::new(-0.3, 0.4));
    }

    #[test]
    fn swap_exchanges_stick_roles() {
        let st = ControlState::new();
        st.set_swapped(true);
        st.set_left_stick(Vector2::new(0.9, 0.4));
        st.set_right_stick(Vector2::new(-0.3, 0.8));
        assert_eq!(st.snapshot().drive, Vector2::new(0.9, 0.8));
    }

    #[test]
    fn combined_drive_clamps_inclusively() {
        let st = ControlState::new();
        st.update(|i| {
            i.left_stick = Vector2::new(0.7, 1.0);
            i.right_stick = Vector2::new(0.6, 0.0);
        });
        assert_eq!(st.snapshot().drive, Vector2::new(1.0, 1.0));

        st.set_drive(Vector2::new(-1.0, 1.0));
        assert_eq!(st.snapshot().drive, Vector2::new(-1.0, 1.0));
    }

    #[test]
    fn release_recentres() {
        let st = ControlState::new();
        st.set_left_stick(Vector2::new(0.0, 1.0));
        st.set_right_stick(Vector2::new(1.0, 0.0));
        st.release_sticks();
        assert_eq!(st.snapshot().drive, Vector2::ZERO);
    }

    #[test]
    fn dodge_follows_sweep() {
        let st = ControlState::new();
        st.set_dodge_mode(true);
        assert!(!st.snapshot().dodge_mode_enabled);

        st.set_sweep(true);
        st.set_dodge_mode(true);
        let rec = st.snapshot();
        assert!(rec.sweep_enabled && rec.dodge_mode_enabled);

        st.set_sweep(false);
        assert!(!st.snapshot().dodge_mode_enabled);
    }

    #[test]
    fn inputs_keep_raw_sticks() {
        let st = ControlState::new();
        st.set_swapped(true);
        st.set_left_stick(Vector2::new(0.9, 0.4));
        let inputs = st.inputs();
        assert!(inputs.swapped);
        assert_eq!(inputs.left_stick, Vector2::new(0.9, 0.4));
        assert_eq!(inputs.to_command(), st.snapshot());
    }

    #[test]
    fn clones_share_state() {
        let ui = ControlState::new();
        let writer = ui.clone();
        ui.set_sound(false);
        assert!(!writer.snapshot().sound_enabled);
    }

    #[test]
    fn concurrent_updates_never_tear() {
        let st = ControlState::new();
        st.set_sound(false);
        let writer = st.clone();
        let handle = std::thread::spawn(move || {
            for n in 0..2000 {
                let on = n % 2 == 0;
                writer.update(|i| {
                    i.left_stick = if on { Vector2::new(1.0, 1.0) } else { Vector2::ZERO };
                    i.sweep_enabled = on;
                    i.sound_enabled = on;
                });
            }
        });
        for _ in 0..2000 {
            let rec = st.snapshot();
            let on = rec.sweep_enabled;
            assert_eq!(rec.sound_enabled, on);
            assert_eq!(rec.drive == Vector2::new(1.0, 1.0), on);
        }
        handle.join().unwrap();
    }
}
