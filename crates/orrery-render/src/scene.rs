//! Scene objects, their animation and the per-draw push payload.

use crate::gravity::{FieldSample, MassBody};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Quat, Vec3, Vec4};
use orrery_core::{IdAllocator, ObjectId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-frame motion applied by [`Scene::animate`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum Animation {
    #[default]
    None,
    /// Rotate about `axis` at a fixed angular rate.
    ConstantSpin { axis: Vec3, rate_deg_per_ms: f32 },
}

impl Animation {
    /// Rotation produced over `elapsed`.
    pub fn rotation(&self, elapsed: Duration) -> Quat {
        match *self {
            Self::None => Quat::IDENTITY,
            Self::ConstantSpin {
                axis,
                rate_deg_per_ms,
            } => {
                let Some(axis) = axis.try_normalize() else {
                    return Quat::IDENTITY;
                };
                let millis = elapsed.as_secs_f32() * 1000.0;
                Quat::from_axis_angle(axis, (rate_deg_per_ms * millis).to_radians())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

/// Role of an object in the gravity simulation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum GravityRole {
    /// A body that attracts and moves; drawn at its simulated position.
    Body { mass: f32, velocity: Vec3 },
    /// A probe drawn along the force at its position.
    FieldProbe,
}

/// A finished scene object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneObject {
    pub id: ObjectId,
    /// Index into the application's mesh list.
    pub mesh: usize,
    pub transform: Transform,
    pub tint: Vec4,
    /// Texture slot, or `None` to sample the default white texture.
    pub texture: Option<u32>,
    pub animation: Animation,
    pub gravity: Option<GravityRole>,
    /// Index into the body or field buffer, set when the object joins a scene.
    gravity_index: Option<u32>,
}

impl SceneObject {
    /// Push payload for this object.
    ///
    /// With `gravity` off the shader ignores the body and field buffers.
    pub fn push_data(&self, gravity: bool) -> PushData {
        let index = |role_is_body: bool| match (gravity, self.gravity, self.gravity_index) {
            (true, Some(GravityRole::Body { .. }), Some(i)) if role_is_body => i as i32,
            (true, Some(GravityRole::FieldProbe), Some(i)) if !role_is_body => i as i32,
            _ => -1,
        };
        PushData {
            transform: self.transform.matrix(),
            tint: self.tint,
            texture_index: self.texture.map_or(-1, |t| t as i32),
            field_index: index(false),
            body_index: index(true),
            _pad: 0,
        }
    }

    pub const fn gravity_index(&self) -> Option<u32> {
        self.gravity_index
    }
}

/// Builder for a [`SceneObject`]; the ID comes from the caller's allocator.
pub struct SceneBuilder<'a> {
    ids: &'a mut IdAllocator,
    mesh: usize,
    transform: Transform,
    tint: Vec4,
    texture: Option<u32>,
    animation: Animation,
    gravity: Option<GravityRole>,
}

impl<'a> SceneBuilder<'a> {
    pub fn new(ids: &'a mut IdAllocator, mesh: usize) -> Self {
        Self {
            ids,
            mesh,
            transform: Transform::default(),
            tint: Vec4::ONE,
            texture: None,
            animation: Animation::None,
            gravity: None,
        }
    }

    #[must_use]
    pub fn translate(mut self, offset: Vec3) -> Self {
        self.transform.translation += offset;
        self
    }

    /// Rotate by `degrees` about `axis`, after any earlier rotation.
    #[must_use]
    pub fn rotate(mut self, axis: Vec3, degrees: f32) -> Self {
        if let Some(axis) = axis.try_normalize() {
            self.transform.rotation =
                Quat::from_axis_angle(axis, degrees.to_radians()) * self.transform.rotation;
        }
        self
    }

    #[must_use]
    pub fn scale(mut self, factor: Vec3) -> Self {
        self.transform.scale *= factor;
        self
    }

    #[must_use]
    pub const fn tint(mut self, tint: Vec4) -> Self {
        self.tint = tint;
        self
    }

    #[must_use]
    pub const fn texture(mut self, slot: u32) -> Self {
        self.texture = Some(slot);
        self
    }

    #[must_use]
    pub const fn animation(mut self, animation: Animation) -> Self {
        self.animation = animation;
        self
    }

    /// Make the object a gravitating body starting at its translation.
    #[must_use]
    pub const fn mass(mut self, mass: f32, velocity: Vec3) -> Self {
        self.gravity = Some(GravityRole::Body { mass, velocity });
        self
    }

    /// Make the object a force field probe at its translation.
    #[must_use]
    pub const fn field(mut self) -> Self {
        self.gravity = Some(GravityRole::FieldProbe);
        self
    }

    pub fn build(self) -> SceneObject {
        SceneObject {
            id: self.ids.allocate(),
            mesh: self.mesh,
            transform: self.transform,
            tint: self.tint,
            texture: self.texture,
            animation: self.animation,
            gravity: self.gravity,
            gravity_index: None,
        }
    }
}

/// Ordered list of objects drawn every frame.
#[derive(Debug, Clone, Default)]
pub struct Scene {
    objects: Vec<SceneObject>,
    bodies: u32,
    probes: u32,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object, giving it the next body or field index.
    pub fn add(&mut self, mut object: SceneObject) -> ObjectId {
        object.gravity_index = match object.gravity {
            Some(GravityRole::Body { .. }) => {
                self.bodies += 1;
                Some(self.bodies - 1)
            }
            Some(GravityRole::FieldProbe) => {
                self.probes += 1;
                Some(self.probes - 1)
            }
            None => None,
        };
        let id = object.id;
        self.objects.push(object);
        id
    }

    pub fn objects(&self) -> &[SceneObject] {
        &self.objects
    }

    pub fn get(&self, id: ObjectId) -> Option<&SceneObject> {
        self.objects.iter().find(|o| o.id == id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Advance every object's animation by `elapsed`.
    pub fn animate(&mut self, elapsed: Duration) {
        for object in &mut self.objects {
            if object.animation != Animation::None {
                let step = object.animation.rotation(elapsed);
                object.transform.rotation = (step * object.transform.rotation).normalize();
            }
        }
    }

    /// Initial body state, ordered by body index.
    pub fn mass_bodies(&self) -> Vec<MassBody> {
        self.objects
            .iter()
            .filter_map(|o| match o.gravity {
                Some(GravityRole::Body { mass, velocity }) => {
                    Some(MassBody::new(o.transform.translation, mass, velocity))
                }
                _ => None,
            })
            .collect()
    }

    /// Field sample points, ordered by field index.
    pub fn field_samples(&self) -> Vec<FieldSample> {
        self.objects
            .iter()
            .filter(|o| o.gravity == Some(GravityRole::FieldProbe))
            .map(|o| FieldSample::new(o.transform.translation))
            .collect()
    }
}

/// Per-draw push constants of the mesh pipeline (96 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct PushData {
    pub transform: Mat4,
    pub tint: Vec4,
    pub texture_index: i32,
    pub field_index: i32,
    pub body_index: i32,
    pub _pad: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn push_data_fits_minimum_push_range() {
        assert_eq!(std::mem::size_of::<PushData>(), 96);
        assert!(std::mem::size_of::<PushData>() <= 128);
    }

    #[test]
    fn builder_ids_come_from_injected_allocator() {
        let mut ids = IdAllocator::new();
        let a = SceneBuilder::new(&mut ids, 0).build();
        let b = SceneBuilder::new(&mut ids, 0).build();
        assert_eq!(a.id, ObjectId(0));
        assert_eq!(b.id, ObjectId(1));

        let mut other = IdAllocator::new();
        assert_eq!(SceneBuilder::new(&mut other, 0).build().id, ObjectId(0));
    }

    #[test]
    fn builder_composes_transform() {
        let mut ids = IdAllocator::new();
        let object = SceneBuilder::new(&mut ids, 2)
            .translate(Vec3::new(1.0, 0.0, 0.0))
            .translate(Vec3::new(0.0, 2.0, 0.0))
            .scale(Vec3::splat(2.0))
            .rotate(Vec3::Y, 90.0)
            .texture(1)
            .build();

        let m = object.transform.matrix();
        let p = m.transform_point3(Vec3::X);
        assert_relative_eq!(p.x, 1.0, epsilon = 1e-5);
        assert_relative_eq!(p.y, 2.0, epsilon = 1e-5);
        assert_relative_eq!(p.z, -2.0, epsilon = 1e-5);
        assert_eq!(object.mesh, 2);
        assert_eq!(object.push_data(true).texture_index, 1);
    }

    #[test]
    fn constant_spin_accumulates() {
        let mut ids = IdAllocator::new();
        let mut scene = Scene::new();
        let id = scene.add(
            SceneBuilder::new(&mut ids, 0)
                .animation(Animation::ConstantSpin {
                    axis: Vec3::Z,
                    rate_deg_per_ms: 0.09,
                })
                .build(),
        );

        // 0.09 deg/ms for 500ms twice is 90 degrees
        scene.animate(Duration::from_millis(500));
        scene.animate(Duration::from_millis(500));
        let rotation = scene.get(id).unwrap().transform.rotation;
        let p = rotation * Vec3::X;
        assert_relative_eq!(p.x, 0.0, epsilon = 1e-4);
        assert_relative_eq!(p.y, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn static_objects_do_not_move() {
        let mut ids = IdAllocator::new();
        let mut scene = Scene::new();
        let id = scene.add(SceneBuilder::new(&mut ids, 0).rotate(Vec3::X, 30.0).build());
        let before = scene.get(id).unwrap().transform;
        scene.animate(Duration::from_secs(3));
        assert_eq!(scene.get(id).unwrap().transform, before);
    }

    #[test]
    fn degenerate_spin_axis_is_ignored() {
        let spin = Animation::ConstantSpin {
            axis: Vec3::ZERO,
            rate_deg_per_ms: 1.0,
        };
        assert_eq!(spin.rotation(Duration::from_millis(10)), Quat::IDENTITY);
    }

    #[test]
    fn gravity_indices_follow_insertion_order() {
        let mut ids = IdAllocator::new();
        let mut scene = Scene::new();
        let probe = SceneBuilder::new(&mut ids, 1).translate(Vec3::X).field().build();
        let sun = SceneBuilder::new(&mut ids, 0).mass(10.0, Vec3::ZERO).build();
        let planet = SceneBuilder::new(&mut ids, 0)
            .translate(Vec3::new(3.0, 0.0, 0.0))
            .mass(1.0, Vec3::new(0.0, 0.0, 1.5))
            .build();
        let plain = SceneBuilder::new(&mut ids, 2).build();
        for object in [probe, sun, planet, plain] {
            scene.add(object);
        }

        let objects = scene.objects();
        assert_eq!(objects[0].gravity_index(), Some(0));
        assert_eq!(objects[1].gravity_index(), Some(0));
        assert_eq!(objects[2].gravity_index(), Some(1));
        assert_eq!(objects[3].gravity_index(), None);

        let bodies = scene.mass_bodies();
        assert_eq!(bodies.len(), 2);
        assert_eq!(bodies[1].position, [3.0, 0.0, 0.0]);
        assert_eq!(bodies[1].velocity, [0.0, 0.0, 1.5]);
        assert_eq!(scene.field_samples().len(), 1);

        let push = objects[2].push_data(true);
        assert_eq!((push.body_index, push.field_index), (1, -1));
        let push = objects[0].push_data(true);
        assert_eq!((push.body_index, push.field_index), (-1, 0));
        let push = objects[2].push_data(false);
        assert_eq!((push.body_index, push.field_index), (-1, -1));
        assert_eq!(objects[3].push_data(true).texture_index, -1);
    }
}
