//! Camera and per-frame global uniforms.

use glam::{Mat4, Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// Fly camera described by position and yaw/pitch angles (radians).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Camera {
    pub position: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 1.0, 6.0),
            yaw: 0.0,
            pitch: 0.0,
            fov: 50f32.to_radians(),
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

/// Width over height, or 1.0 for a zero-height extent.
pub fn aspect_ratio(width: u32, height: u32) -> f32 {
    if height == 0 {
        1.0
    } else {
        width as f32 / height as f32
    }
}

impl Camera {
    /// Pitch is kept just short of straight up or down.
    const PITCH_LIMIT: f32 = 1.55;

    /// Set the aspect ratio.
    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = aspect;
    }

    /// Unit vector the camera looks along.
    pub fn forward(&self) -> Vec3 {
        Vec3::new(
            -self.yaw.sin() * self.pitch.cos(),
            self.pitch.sin(),
            -self.yaw.cos() * self.pitch.cos(),
        )
    }

    /// Unit vector to the camera's right, parallel to the ground.
    pub fn right(&self) -> Vec3 {
        Vec3::new(self.yaw.cos(), 0.0, -self.yaw.sin())
    }

    /// Move relative to the view: x right, y up, z forward.
    pub fn move_local(&mut self, delta: Vec3) {
        self.position += self.right() * delta.x + Vec3::Y * delta.y + self.forward() * delta.z;
    }

    /// Turn by the given yaw and pitch deltas.
    pub fn rotate(&mut self, yaw: f32, pitch: f32) {
        self.yaw = (self.yaw + yaw).rem_euclid(std::f32::consts::TAU);
        self.pitch = (self.pitch + pitch).clamp(-Self::PITCH_LIMIT, Self::PITCH_LIMIT);
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.position, self.forward(), Vec3::Y)
    }

    /// Perspective projection with Vulkan clip conventions (y down, depth 0..1).
    pub fn projection_matrix(&self) -> Mat4 {
        let mut projection = Mat4::perspective_rh(self.fov, self.aspect, self.near, self.far);
        projection.y_axis.y *= -1.0;
        projection
    }
}

/// Single point light.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PointLight {
    pub position: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub radius: f32,
}

impl Default for PointLight {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 3.0, 0.0),
            color: Vec3::ONE,
            intensity: 6.0,
            radius: 0.1,
        }
    }
}

/// Per-frame uniform block shared by every pipeline (std140).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GlobalUbo {
    pub projection: Mat4,
    pub view: Mat4,
    pub inverse_view: Mat4,
    pub ambient_light: Vec4,
    pub light_position: Vec4,
    pub light_color: Vec4,
}

impl GlobalUbo {
    /// Fill from a camera, an ambient colour (w = intensity) and a light.
    pub fn new(camera: &Camera, ambient: Vec4, light: &PointLight) -> Self {
        let view = camera.view_matrix();
        Self {
            projection: camera.projection_matrix(),
            view,
            inverse_view: view.inverse(),
            ambient_light: ambient,
            light_position: light.position.extend(1.0),
            light_color: light.color.extend(light.intensity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn aspect_of_zero_height_is_one() {
        assert_relative_eq!(aspect_ratio(800, 0), 1.0);
        assert_relative_eq!(aspect_ratio(800, 400), 2.0);
    }

    #[test]
    fn default_camera_looks_down_negative_z() {
        let camera = Camera::default();
        let forward = camera.forward();
        assert_relative_eq!(forward.z, -1.0, epsilon = 1e-6);
        assert_relative_eq!(camera.right().x, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn pitch_is_clamped() {
        let mut camera = Camera::default();
        camera.rotate(0.0, 10.0);
        assert_relative_eq!(camera.pitch, Camera::PITCH_LIMIT);
        camera.rotate(0.0, -20.0);
        assert_relative_eq!(camera.pitch, -Camera::PITCH_LIMIT);
    }

    #[test]
    fn move_local_follows_view() {
        let mut camera = Camera::default();
        let start = camera.position;
        camera.move_local(Vec3::new(0.0, 0.0, 2.0));
        assert_relative_eq!(camera.position.z, start.z - 2.0, epsilon = 1e-5);
    }

    #[test]
    fn projection_flips_y() {
        let camera = Camera::default();
        let gl = Mat4::perspective_rh(camera.fov, camera.aspect, camera.near, camera.far);
        assert_relative_eq!(camera.projection_matrix().y_axis.y, -gl.y_axis.y);
    }

    #[test]
    fn ubo_layout_is_std140_sized() {
        assert_eq!(std::mem::size_of::<GlobalUbo>(), 3 * 64 + 3 * 16);
    }

    #[test]
    fn ubo_inverse_view_round_trips() {
        let camera = Camera::default();
        let ubo = GlobalUbo::new(&camera, Vec4::new(1.0, 1.0, 1.0, 0.1), &PointLight::default());
        let identity = ubo.view * ubo.inverse_view;
        assert!(identity.abs_diff_eq(Mat4::IDENTITY, 1e-4));
        assert_relative_eq!(ubo.inverse_view.w_axis.z, camera.position.z, epsilon = 1e-4);
    }
}
