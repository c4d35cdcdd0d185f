//! Frame orchestration and rendering for the Orrery engine.
//!
//! This crate provides:
//! - The frame orchestrator (`begin_frame` / `end_frame` and the render pass)
//! - Frame loop policy for resizes and stale surfaces
//! - The compute-to-graphics gravity bridge
//! - Meshes, textures, camera and per-frame uniforms
//! - Scene objects with animation and the mesh and point light draw systems

pub mod camera;
pub mod draw;
pub mod frame;
pub mod frame_loop;
pub mod gravity;
pub mod mesh;
pub mod renderer;
pub mod scene;
pub mod settings;
pub mod texture;

pub use camera::{aspect_ratio, Camera, GlobalUbo, PointLight};
pub use draw::{MeshDrawSystem, PointLightPush, PointLightSystem};
pub use frame::{FrameResources, PerFrame};
pub use frame_loop::{drive_frame, FrameOutcome, FrameReport, FrameTarget, RendererTarget, ResizeTracker};
pub use gravity::{
    BodySnapshot, FieldPush, FieldSample, ForceSample, GravitySimulation, IntegratePush, MassBody,
    PingPong, SubstepPlan,
};
pub use mesh::{Drawable, Mesh, MeshData, Vertex};
pub use renderer::{Frame, FrameRing, Renderer};
pub use scene::{Animation, GravityRole, PushData, Scene, SceneBuilder, SceneObject, Transform};
pub use settings::{GravitySettings, RenderSettings};
pub use texture::Texture;
