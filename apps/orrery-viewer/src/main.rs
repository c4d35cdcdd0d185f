//! Orrery Demo Viewer
//!
//! Draws a textured floor lit by an orbiting point light, a small system of
//! bodies integrated on the compute queue, and a grid of arrows showing the
//! gravity field they produce.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p orrery-viewer -- [OPTIONS]
//! ```
//!
//! ## Controls
//!
//! - `WASD`: fly, `Space`/`Ctrl`: up and down, `Shift`: sprint
//! - Arrow keys: look around
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)
//! - `ORRERY_SHADER_DIR`: Directory of compiled shaders

mod app;
mod controller;
mod geometry;

use orrery_app::run_app;

use crate::app::{Viewer, ViewerOptions};

fn main() -> anyhow::Result<()> {
    let options = ViewerOptions::from_env().map_err(anyhow::Error::msg)?;

    // Check for help flag before starting the app
    if options.help {
        print_help();
        return Ok(());
    }

    let config = options.app_config();
    run_app::<Viewer>(config, options)
}

fn print_help() {
    eprintln!(
        "Orrery Demo Viewer

USAGE:
    cargo run -p orrery-viewer -- [OPTIONS]

WINDOW OPTIONS:
    --width <N>             Window width (default: 1280)
    --height <N>            Window height (default: 720)
    --vsync                 Present with FIFO instead of preferring mailbox
    --fps <N>               Frame rate cap (default: unlimited)

RENDERING OPTIONS:
    --no-gravity            Draw the scene without the compute simulation
    --texture <PATH>        Floor texture (default: checkerboard)
    --shader-dir <DIR>      Directory of compiled .spv shaders
    --validation            Enable Vulkan validation layers

OTHER:
    -h, --help              Print this help message

CONTROLS:
    WASD                    Fly
    Space / Ctrl            Up / down
    Shift                   Sprint
    Arrow keys              Look around

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)
    ORRERY_SHADER_DIR       Directory of compiled shaders"
    );
}
