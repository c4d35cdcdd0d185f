//! Keyboard fly camera.

use glam::Vec3;
use hashbrown::HashSet;
use orrery_render::Camera;
use winit::event::{ElementState, KeyEvent};
use winit::keyboard::{KeyCode, PhysicalKey};

/// Camera movement speed in units per second.
const MOVE_SPEED: f32 = 2.0;

/// Camera sprint multiplier.
const SPRINT_MULT: f32 = 3.0;

/// Turn rate of the arrow keys in radians per second.
const LOOK_SPEED: f32 = 1.5;

/// Moves the camera from held keys: WASD to fly, Space/Ctrl for up and down,
/// arrows to look around, Shift to sprint.
#[derive(Debug, Default)]
pub struct CameraController {
    pressed: HashSet<KeyCode>,
}

impl CameraController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a key event. Returns `true` for keys the controller uses.
    pub fn process_key_event(&mut self, event: &KeyEvent) -> bool {
        let PhysicalKey::Code(code) = event.physical_key else {
            return false;
        };
        self.set_key(code, event.state == ElementState::Pressed)
    }

    pub fn set_key(&mut self, code: KeyCode, pressed: bool) -> bool {
        if !is_bound(code) {
            return false;
        }
        if pressed {
            self.pressed.insert(code);
        } else {
            self.pressed.remove(&code);
        }
        true
    }

    fn axis(&self, positive: &[KeyCode], negative: &[KeyCode]) -> f32 {
        let held = |keys: &[KeyCode]| keys.iter().any(|k| self.pressed.contains(k));
        f32::from(u8::from(held(positive))) - f32::from(u8::from(held(negative)))
    }

    /// Local movement direction: x right, y up, z forward.
    pub fn movement(&self) -> Vec3 {
        Vec3::new(
            self.axis(&[KeyCode::KeyD], &[KeyCode::KeyA]),
            self.axis(&[KeyCode::Space], &[KeyCode::ControlLeft, KeyCode::ControlRight]),
            self.axis(&[KeyCode::KeyW], &[KeyCode::KeyS]),
        )
    }

    /// Apply `dt` seconds of held input to `camera`.
    pub fn update(&self, camera: &mut Camera, dt: f32) {
        let speed = if self.pressed.contains(&KeyCode::ShiftLeft)
            || self.pressed.contains(&KeyCode::ShiftRight)
        {
            MOVE_SPEED * SPRINT_MULT
        } else {
            MOVE_SPEED
        };

        let movement = self.movement();
        if movement != Vec3::ZERO {
            camera.move_local(movement.normalize() * speed * dt);
        }

        let yaw = self.axis(&[KeyCode::ArrowLeft], &[KeyCode::ArrowRight]);
        let pitch = self.axis(&[KeyCode::ArrowUp], &[KeyCode::ArrowDown]);
        if yaw != 0.0 || pitch != 0.0 {
            camera.rotate(yaw * LOOK_SPEED * dt, pitch * LOOK_SPEED * dt);
        }
    }
}

const fn is_bound(code: KeyCode) -> bool {
    matches!(
        code,
        KeyCode::KeyW
            | KeyCode::KeyA
            | KeyCode::KeyS
            | KeyCode::KeyD
            | KeyCode::Space
            | KeyCode::ControlLeft
            | KeyCode::ControlRight
            | KeyCode::ShiftLeft
            | KeyCode::ShiftRight
            | KeyCode::ArrowLeft
            | KeyCode::ArrowRight
            | KeyCode::ArrowUp
            | KeyCode::ArrowDown
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_key_moves_along_view() {
        let mut controller = CameraController::new();
        let mut camera = Camera::default();
        let start = camera.position;

        assert!(controller.set_key(KeyCode::KeyW, true));
        controller.update(&mut camera, 0.5);

        let moved = camera.position - start;
        assert!((moved - camera.forward() * MOVE_SPEED * 0.5).length() < 1e-5);
    }

    #[test]
    fn opposite_keys_cancel() {
        let mut controller = CameraController::new();
        controller.set_key(KeyCode::KeyA, true);
        controller.set_key(KeyCode::KeyD, true);
        assert_eq!(controller.movement(), Vec3::ZERO);

        controller.set_key(KeyCode::KeyA, false);
        assert_eq!(controller.movement(), Vec3::X);
    }

    #[test]
    fn arrows_turn_the_camera() {
        let mut controller = CameraController::new();
        let mut camera = Camera::default();

        controller.set_key(KeyCode::ArrowLeft, true);
        controller.update(&mut camera, 0.1);

        assert!((camera.yaw - LOOK_SPEED * 0.1).abs() < 1e-6);
        assert_eq!(camera.position, Camera::default().position);
    }

    #[test]
    fn unbound_keys_are_ignored() {
        let mut controller = CameraController::new();
        assert!(!controller.set_key(KeyCode::KeyQ, true));
        assert_eq!(controller.movement(), Vec3::ZERO);
    }
}
