//! Viewer application: a textured floor, a small orbiting system and its
//! gravity field drawn as arrows.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use glam::{Vec3, Vec4};
use orrery_app::{AppConfig, AppContext, Camera, FrameContext, GpuContext, OrreryApp, WindowEvent};
use orrery_core::IdAllocator;
use orrery_render::{
    Animation, FrameResources, GlobalUbo, GravitySettings, GravitySimulation, Mesh,
    MeshDrawSystem, PointLight, PointLightSystem, Scene, SceneBuilder, Texture,
};
use tracing::{error, info};

use crate::controller::CameraController;
use crate::geometry;

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

/// Indices into [`Viewer::meshes`].
const CUBE: usize = 0;
const PLANE: usize = 1;
const ARROW: usize = 2;

const SUN_MASS: f32 = 20.0;
const PLANET_MASS: f32 = 0.05;
const PLANET_ORBITS: [f32; 3] = [1.5, 2.5, 3.5];

/// Half extent of the field probe grid.
const PROBE_RADIUS: i32 = 3;
const PROBE_HEIGHT: f32 = -1.0;
const FLOOR_HEIGHT: f32 = -1.5;

/// Light orbit in radians per second.
const LIGHT_ORBIT_SPEED: f32 = 0.4;

/// Command line options.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewerOptions {
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
    pub validation: Option<bool>,
    pub gravity: bool,
    pub shader_dir: Option<PathBuf>,
    pub fps: Option<u32>,
    /// Image for the floor; a checkerboard when unset.
    pub texture: Option<PathBuf>,
    pub help: bool,
}

impl Default for ViewerOptions {
    fn default() -> Self {
        Self {
            width: WIDTH,
            height: HEIGHT,
            vsync: false,
            validation: None,
            gravity: true,
            shader_dir: None,
            fps: None,
            texture: None,
            help: false,
        }
    }
}

impl ViewerOptions {
    /// Parse options from the process arguments.
    pub fn from_env() -> Result<Self, String> {
        Self::parse(std::env::args().skip(1))
    }

    /// Parse options, program name excluded.
    pub fn parse(args: impl IntoIterator<Item = String>) -> Result<Self, String> {
        let mut options = Self::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            let mut value = |name: &str| {
                args.next()
                    .ok_or_else(|| format!("{name} requires a value"))
            };
            match arg.as_str() {
                "--width" => options.width = parse_number(&arg, &value(&arg)?)?,
                "--height" => options.height = parse_number(&arg, &value(&arg)?)?,
                "--fps" => options.fps = Some(parse_number(&arg, &value(&arg)?)?),
                "--shader-dir" => options.shader_dir = Some(PathBuf::from(value(&arg)?)),
                "--texture" => options.texture = Some(PathBuf::from(value(&arg)?)),
                "--vsync" => options.vsync = true,
                "--validation" => options.validation = Some(true),
                "--no-gravity" => options.gravity = false,
                "-h" | "--help" => options.help = true,
                other => return Err(format!("Unknown option: {other}")),
            }
        }

        if options.width == 0 || options.height == 0 {
            return Err("Window size must be non-zero".to_string());
        }
        Ok(options)
    }

    pub fn app_config(&self) -> AppConfig {
        let mut config = AppConfig::new("Orrery Viewer")
            .with_size(self.width, self.height)
            .with_vsync(self.vsync);
        if let Some(fps) = self.fps {
            config = config.with_target_fps(fps);
        }
        if let Some(validation) = self.validation {
            config = config.with_validation(validation);
        }
        if let Some(dir) = &self.shader_dir {
            config = config.with_shader_dir(dir.clone());
        }
        config
    }
}

fn parse_number(flag: &str, value: &str) -> Result<u32, String> {
    value
        .parse()
        .map_err(|_| format!("{flag} expects a number, got '{value}'"))
}

/// Speed of a circular orbit of `radius` around `mass`.
fn orbital_speed(gravitational_constant: f32, mass: f32, radius: f32) -> f32 {
    (gravitational_constant * mass / radius).sqrt()
}

/// Build the demo scene. With `gravity` the sun and planets become bodies
/// and a grid of arrows samples the field.
pub fn build_scene(ids: &mut IdAllocator, gravity: Option<&GravitySettings>) -> Scene {
    let mut scene = Scene::new();

    scene.add(
        SceneBuilder::new(ids, PLANE)
            .translate(Vec3::new(0.0, FLOOR_HEIGHT, 0.0))
            .scale(Vec3::new(8.0, 1.0, 8.0))
            .texture(0)
            .build(),
    );

    let mut sun = SceneBuilder::new(ids, CUBE)
        .scale(Vec3::splat(0.6))
        .tint(Vec4::new(1.0, 0.9, 0.4, 1.0))
        .animation(Animation::ConstantSpin {
            axis: Vec3::Y,
            rate_deg_per_ms: 0.03,
        });
    if gravity.is_some() {
        sun = sun.mass(SUN_MASS, Vec3::ZERO);
    }
    scene.add(sun.build());

    for (i, radius) in PLANET_ORBITS.into_iter().enumerate() {
        let mut planet = SceneBuilder::new(ids, CUBE)
            .translate(Vec3::new(radius, 0.0, 0.0))
            .scale(Vec3::splat(0.2))
            .rotate(Vec3::Z, 20.0 * i as f32)
            .animation(Animation::ConstantSpin {
                axis: Vec3::new(0.3, 1.0, 0.0),
                rate_deg_per_ms: 0.1 + 0.05 * i as f32,
            });
        if let Some(settings) = gravity {
            let speed = orbital_speed(settings.gravitational_constant, SUN_MASS, radius);
            planet = planet.mass(PLANET_MASS, Vec3::new(0.0, 0.0, -speed));
        }
        scene.add(planet.build());
    }

    if gravity.is_some() {
        for x in -PROBE_RADIUS..=PROBE_RADIUS {
            for z in -PROBE_RADIUS..=PROBE_RADIUS {
                scene.add(
                    SceneBuilder::new(ids, ARROW)
                        .translate(Vec3::new(x as f32, PROBE_HEIGHT, z as f32))
                        .scale(Vec3::splat(0.4))
                        .field()
                        .build(),
                );
            }
        }
    }

    scene
}

fn load_texture(gpu: &GpuContext, path: Option<&Path>) -> anyhow::Result<Texture> {
    let Some(path) = path else {
        let size = 256;
        return Texture::from_rgba8(gpu, size, size, &geometry::checker(size, 8))
            .context("Creating checker texture");
    };

    let image = image::open(path)
        .with_context(|| format!("Reading texture {}", path.display()))?
        .to_rgba8();
    info!(
        "Loaded texture {} ({}x{})",
        path.display(),
        image.width(),
        image.height()
    );
    Texture::from_rgba8(gpu, image.width(), image.height(), image.as_raw())
        .with_context(|| format!("Uploading texture {}", path.display()))
}

/// Viewer application state.
pub struct Viewer {
    meshes: Vec<Mesh>,
    texture: Texture,
    gravity: Option<GravitySimulation>,
    frame_resources: FrameResources,
    mesh_system: MeshDrawSystem,
    light_system: PointLightSystem,
    scene: Scene,
    camera: Camera,
    controller: CameraController,
    light: PointLight,
    ambient: Vec4,
    light_angle: f32,
}

impl OrreryApp for Viewer {
    type Options = ViewerOptions;

    fn init(ctx: &mut AppContext, options: ViewerOptions) -> anyhow::Result<Self> {
        let gpu = &ctx.gpu;

        let mut meshes = Vec::new();
        for (name, data) in [
            ("cube", geometry::cube()),
            ("plane", geometry::plane(8.0)),
            ("arrow", geometry::arrow()),
        ] {
            meshes.push(Mesh::new(gpu, &data, name).with_context(|| format!("Uploading mesh {name}"))?);
        }

        let texture = load_texture(gpu, options.texture.as_deref())?;

        let settings = GravitySettings::default();
        let mut ids = IdAllocator::new();
        let scene = build_scene(&mut ids, options.gravity.then_some(&settings));
        info!("Scene built with {} objects", scene.len());

        let gravity = if options.gravity {
            Some(
                GravitySimulation::new(
                    gpu,
                    &ctx.shaders,
                    settings,
                    &scene.mass_bodies(),
                    &scene.field_samples(),
                )
                .context("Creating gravity simulation")?,
            )
        } else {
            info!("Gravity disabled");
            None
        };

        let frame_resources = FrameResources::new(gpu, &texture, gravity.as_ref())
            .context("Creating per-frame resources")?;
        let mesh_system = MeshDrawSystem::new(gpu, &ctx.shaders, ctx.render_pass(), frame_resources.layout())
            .context("Creating mesh pipeline")?;
        let light_system =
            PointLightSystem::new(gpu, &ctx.shaders, ctx.render_pass(), frame_resources.layout())
                .context("Creating point light pipeline")?;

        let mut camera = Camera {
            position: Vec3::new(0.0, 2.0, 7.0),
            pitch: -0.3,
            ..Camera::default()
        };
        camera.set_aspect(ctx.aspect_ratio());

        info!("Viewer initialized successfully!");

        Ok(Self {
            meshes,
            texture,
            gravity,
            frame_resources,
            mesh_system,
            light_system,
            scene,
            camera,
            controller: CameraController::new(),
            light: PointLight::default(),
            ambient: Vec4::new(1.0, 1.0, 1.0, 0.08),
            light_angle: 0.0,
        })
    }

    fn update(&mut self, _ctx: &AppContext, dt: f32) {
        self.controller.update(&mut self.camera, dt);
        self.scene.animate(Duration::from_secs_f32(dt));

        self.light_angle = (self.light_angle + LIGHT_ORBIT_SPEED * dt) % std::f32::consts::TAU;
        self.light.position = Vec3::new(
            4.0 * self.light_angle.cos(),
            3.0,
            4.0 * self.light_angle.sin(),
        );
    }

    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn render(&mut self, frame: &mut FrameContext<'_>) -> anyhow::Result<()> {
        let slot = frame.slot();

        if let Some(gravity) = &mut self.gravity {
            let cmd = frame.renderer.compute_command_buffer(slot);
            let wait = gravity
                .record_and_submit(frame.gpu, cmd, slot, frame.elapsed)
                .context("Submitting gravity compute")?;
            frame.add_wait(wait);
        }

        self.camera.set_aspect(frame.renderer.aspect_ratio());
        let ubo = GlobalUbo::new(&self.camera, self.ambient, &self.light);
        self.frame_resources.write_ubo(slot, &ubo)?;

        frame.begin_render_pass()?;
        let cmd = frame.command_buffer();
        let set = self.frame_resources.set(slot);
        self.mesh_system.render(
            frame.gpu,
            cmd,
            set,
            &self.scene,
            &self.meshes,
            self.gravity.is_some(),
        )?;
        self.light_system.render(frame.gpu, cmd, set, &self.light);
        frame.end_render_pass();

        Ok(())
    }

    fn on_resize(&mut self, _ctx: &mut AppContext, width: u32, height: u32) -> anyhow::Result<()> {
        info!("Viewer now drawing at {width}x{height}");
        Ok(())
    }

    fn on_event(&mut self, event: &WindowEvent) -> bool {
        match event {
            WindowEvent::KeyboardInput { event, .. } => self.controller.process_key_event(event),
            _ => false,
        }
    }

    fn cleanup(&mut self, ctx: &mut AppContext) {
        let gpu = &ctx.gpu;
        if let Some(gravity) = &self.gravity {
            info!("Gravity ran {} sub-steps", gravity.steps_taken());
        }

        unsafe {
            self.light_system.destroy(gpu);
            self.mesh_system.destroy(gpu);
            if let Err(e) = self.frame_resources.destroy(gpu) {
                error!("Failed to destroy frame resources: {e}");
            }
            if let Some(mut gravity) = self.gravity.take() {
                if let Err(e) = gravity.destroy(gpu) {
                    error!("Failed to destroy gravity simulation: {e}");
                }
            }
            if let Err(e) = self.texture.destroy(gpu) {
                error!("Failed to destroy texture: {e}");
            }
        }
        for mesh in &mut self.meshes {
            if let Err(e) = mesh.destroy(gpu) {
                error!("Failed to destroy mesh: {e}");
            }
        }
        self.meshes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn defaults_without_arguments() {
        let options = ViewerOptions::parse(Vec::new()).unwrap();
        assert_eq!(options, ViewerOptions::default());
        assert!(options.gravity);
    }

    #[test]
    fn parses_every_flag() {
        let options = ViewerOptions::parse(args(&[
            "--width",
            "800",
            "--height",
            "600",
            "--vsync",
            "--validation",
            "--no-gravity",
            "--shader-dir",
            "out/shaders",
            "--fps",
            "60",
            "--texture",
            "floor.png",
        ]))
        .unwrap();

        assert_eq!((options.width, options.height), (800, 600));
        assert!(options.vsync);
        assert_eq!(options.validation, Some(true));
        assert!(!options.gravity);
        assert_eq!(options.fps, Some(60));
        assert_eq!(options.texture, Some(PathBuf::from("floor.png")));

        let config = options.app_config();
        assert_eq!((config.width, config.height), (800, 600));
        assert!(config.vsync);
        assert!(config.validation);
        assert_eq!(config.target_fps, Some(60));
        assert_eq!(config.shader_dir, Some(PathBuf::from("out/shaders")));
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(ViewerOptions::parse(args(&["--width"])).is_err());
        assert!(ViewerOptions::parse(args(&["--fps", "fast"])).is_err());
        assert!(ViewerOptions::parse(args(&["--height", "0"])).is_err());
        assert!(ViewerOptions::parse(args(&["--frobnicate"])).is_err());
    }

    #[test]
    fn gravity_scene_has_bodies_and_probes() {
        let settings = GravitySettings::default();
        let mut ids = IdAllocator::new();
        let scene = build_scene(&mut ids, Some(&settings));

        let side = (2 * PROBE_RADIUS + 1) as usize;
        assert_eq!(scene.mass_bodies().len(), 1 + PLANET_ORBITS.len());
        assert_eq!(scene.field_samples().len(), side * side);
        assert_eq!(scene.len(), 2 + PLANET_ORBITS.len() + side * side);
        assert_eq!(ids.allocated() as usize, scene.len());
    }

    #[test]
    fn planets_start_on_circular_orbits() {
        let settings = GravitySettings::default();
        let mut ids = IdAllocator::new();
        let bodies = build_scene(&mut ids, Some(&settings)).mass_bodies();

        for (body, radius) in bodies[1..].iter().zip(PLANET_ORBITS) {
            let speed = Vec3::from(body.velocity).length();
            let expected = (settings.gravitational_constant * SUN_MASS / radius).sqrt();
            assert!((speed - expected).abs() < 1e-5);
            assert!((Vec3::from(body.position).length() - radius).abs() < 1e-5);
        }
    }

    #[test]
    fn plain_scene_has_no_gravity_roles() {
        let mut ids = IdAllocator::new();
        let scene = build_scene(&mut ids, None);

        assert!(scene.mass_bodies().is_empty());
        assert!(scene.field_samples().is_empty());
        assert!(scene
            .objects()
            .iter()
            .all(|o| o.push_data(true).body_index == -1));
    }
}
