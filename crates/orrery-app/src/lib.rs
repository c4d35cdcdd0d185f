//! Application framework for Orrery.
//!
//! This crate owns the pieces every windowed Orrery program needs:
//! - Window creation and the winit event loop
//! - GPU context and frame orchestrator setup
//! - Swapchain recreation on resize or a stale surface
//! - Logging and frame pacing
//!
//! # Example
//!
//! ```no_run
//! use orrery_app::{run_app, AppConfig, AppContext, FrameContext, OrreryApp};
//!
//! struct MyApp;
//!
//! impl OrreryApp for MyApp {
//!     type Options = ();
//!
//!     fn init(_ctx: &mut AppContext, (): ()) -> anyhow::Result<Self> {
//!         Ok(MyApp)
//!     }
//!
//!     fn update(&mut self, _ctx: &AppContext, _dt: f32) {}
//!
//!     fn render(&mut self, frame: &mut FrameContext<'_>) -> anyhow::Result<()> {
//!         frame.begin_render_pass()?;
//!         frame.end_render_pass();
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<MyApp>(AppConfig::default(), ())
//! }
//! ```

mod app;
mod config;
mod context;
mod frame;
pub mod logging;
mod runner;

pub use app::OrreryApp;
pub use config::AppConfig;
pub use context::AppContext;
pub use frame::FrameContext;
pub use runner::run_app;

// Re-export commonly used types for convenience
pub use orrery_gpu::{GpuContext, GpuContextBuilder};
pub use orrery_render::Camera;
pub use winit::event::WindowEvent;
