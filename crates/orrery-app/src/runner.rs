//! Application runner and event loop.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use orrery_gpu::GpuError;
use orrery_render::{drive_frame, FrameOutcome, RendererTarget};
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::app::OrreryApp;
use crate::config::AppConfig;
use crate::context::AppContext;
use crate::frame::FrameContext;
use crate::logging;

/// Run an [`OrreryApp`] with the given configuration.
///
/// Initializes logging, creates the window, GPU context and renderer, and
/// runs the event loop until the window closes. `options` is passed to
/// [`OrreryApp::init`] once the window exists. A fatal error stops the loop,
/// tears everything down and is returned.
pub fn run_app<A: OrreryApp + 'static>(config: AppConfig, options: A::Options) -> anyhow::Result<()> {
    logging::init();

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new().context("Creating event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<A> {
        config,
        options: Some(options),
        state: None,
        error: None,
    };

    event_loop
        .run_app(&mut runner)
        .context("Running event loop")?;

    runner.error.take().map_or(Ok(()), Err)
}

/// Internal application runner that implements winit's `ApplicationHandler`.
struct AppRunner<A: OrreryApp> {
    config: AppConfig,
    /// Consumed by the first successful window creation.
    options: Option<A::Options>,
    state: Option<AppState<A>>,
    error: Option<anyhow::Error>,
}

/// Internal application state.
struct AppState<A: OrreryApp> {
    ctx: AppContext,
    app: A,
    target_frame_time: Option<Duration>,
    last_frame_time: Instant,
    // FPS tracking
    min_fps: f64,
    max_fps: f64,
    fps_sum: f64,
    timed_frames: u64,
}

impl<A: OrreryApp + 'static> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        info!("Creating application state...");

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready!");
            }
            Err(e) => self.fail(event_loop, e.context("Initializing application")),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        // Let the app handle the event first
        if let Some(state) = &mut self.state {
            if state.app.on_event(&event) {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                if let Some(mut state) = self.state.take() {
                    state.cleanup();
                }
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                let Some(state) = &mut self.state else {
                    return;
                };
                if state.ctx.is_minimized() {
                    return;
                }
                if let Err(e) = state.render_frame() {
                    self.fail(event_loop, e);
                }
            }
            WindowEvent::Resized(size) => {
                if let Some(state) = &mut self.state {
                    state.ctx.resize.on_resize(size.width, size.height);
                    info!("Window resized to {}x{}", size.width, size.height);
                    // Sleep until the next event while there is nothing to draw
                    event_loop.set_control_flow(if state.ctx.is_minimized() {
                        ControlFlow::Wait
                    } else {
                        ControlFlow::Poll
                    });
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            if !state.ctx.is_minimized() {
                state.ctx.window.request_redraw();
            }
        }
    }
}

impl<A: OrreryApp + 'static> AppRunner<A> {
    fn create_state(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        let options = self.take_options()?;

        let window_attrs = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));

        let window = Arc::new(
            event_loop
                .create_window(window_attrs)
                .context("Creating window")?,
        );

        let mut ctx = AppContext::new(window, &self.config)?;

        let app = match A::init(&mut ctx, options) {
            Ok(app) => app,
            Err(e) => {
                if let Err(idle) = ctx.gpu.wait_idle() {
                    error!("Failed to wait idle: {idle}");
                }
                unsafe { ctx.cleanup() };
                return Err(e);
            }
        };

        Ok(AppState {
            ctx,
            app,
            target_frame_time: self.config.target_frame_time(),
            last_frame_time: Instant::now(),
            min_fps: f64::MAX,
            max_fps: 0.0,
            fps_sum: 0.0,
            timed_frames: 0,
        })
    }

    /// Hand the application its options. Only the first call succeeds.
    fn take_options(&mut self) -> anyhow::Result<A::Options> {
        self.options
            .take()
            .context("Application options already consumed")
    }

    /// Stop the loop on a fatal error, keeping the error for `run_app`.
    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("Fatal: {err:#}");
        if let Some(mut state) = self.state.take() {
            state.cleanup();
        }
        self.error = Some(err);
        event_loop.exit();
    }
}

impl<A: OrreryApp> AppState<A> {
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn render_frame(&mut self) -> anyhow::Result<()> {
        let frame_start = Instant::now();
        let elapsed = frame_start.duration_since(self.last_frame_time);
        self.last_frame_time = frame_start;
        let dt = elapsed.as_secs_f32();

        if dt > 0.0 {
            let fps = 1.0 / f64::from(dt);
            self.min_fps = self.min_fps.min(fps);
            self.max_fps = self.max_fps.max(fps);
            self.fps_sum += fps;
            self.timed_frames += 1;
        }

        self.app.update(&self.ctx, dt);

        let AppContext {
            gpu,
            renderer,
            resize,
            ..
        } = &mut self.ctx;
        let app = &mut self.app;
        let mut app_error = None;
        let mut target = RendererTarget {
            gpu: &*gpu,
            renderer,
        };

        let report = drive_frame(&mut target, resize, |t, frame| {
            let mut frame_ctx = FrameContext {
                gpu: t.gpu,
                renderer: &*t.renderer,
                frame,
                dt,
                elapsed,
            };
            app.render(&mut frame_ctx).map_err(|e| {
                let message = format!("{e:#}");
                app_error = Some(e);
                GpuError::InvalidState(message)
            })
        });

        if let Some(e) = app_error {
            return Err(e.context("Recording frame"));
        }
        let report = report.context("Drawing frame")?;
        self.ctx.frame_count = self.ctx.renderer.frame_index();

        if report.recreated {
            let extent = self.ctx.extent();
            self.app
                .on_resize(&mut self.ctx, extent.width, extent.height)
                .context("Resizing application resources")?;
        }

        // Frame pacing
        if report.outcome == FrameOutcome::Presented {
            if let Some(target) = self.target_frame_time {
                let spent = frame_start.elapsed();
                if spent < target {
                    thread::sleep(target - spent);
                }
            }
        }

        Ok(())
    }

    fn cleanup(&mut self) {
        if self.timed_frames > 0 {
            let avg_fps = self.fps_sum / self.timed_frames as f64;
            info!("FPS Statistics:");
            info!("  Min: {:.1}", self.min_fps);
            info!("  Max: {:.1}", self.max_fps);
            info!("  Avg: {:.1}", avg_fps);
            info!("  Total frames: {}", self.ctx.frame_count);
        }

        info!("Starting cleanup...");
        if let Err(e) = self.ctx.gpu.wait_idle() {
            error!("Failed to wait idle: {e}");
        }

        // The app's resources go before the renderer they were built for
        self.app.cleanup(&mut self.ctx);
        unsafe { self.ctx.cleanup() };

        info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Idle;

    impl OrreryApp for Idle {
        type Options = u32;

        fn init(_ctx: &mut AppContext, _options: u32) -> anyhow::Result<Self> {
            Ok(Self)
        }

        fn update(&mut self, _ctx: &AppContext, _dt: f32) {}

        fn render(&mut self, _frame: &mut FrameContext<'_>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn options_are_handed_over_once() {
        let mut runner = AppRunner::<Idle> {
            config: AppConfig::default(),
            options: Some(7),
            state: None,
            error: None,
        };
        assert_eq!(runner.take_options().unwrap(), 7);
        assert!(runner.take_options().is_err());
    }
}
