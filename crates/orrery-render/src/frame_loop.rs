//! Per-iteration frame policy: recreation on resize or stale surface, and
//! skipping frames while the window has no area.

use crate::renderer::{Frame, Renderer};
use ash::vk;
use orrery_gpu::swapchain::is_degenerate;
use orrery_gpu::{GpuContext, GpuError, Result};

/// What the frame loop drives.
pub trait FrameTarget {
    type Frame;

    /// Acquire an image and start recording.
    fn begin_frame(&mut self) -> Result<Self::Frame>;

    /// Submit and present.
    fn end_frame(&mut self, frame: Self::Frame) -> Result<()>;

    /// Rebuild everything that depends on the surface extent.
    fn recreate(&mut self, extent: vk::Extent2D) -> Result<()>;
}

/// Tracks the window extent and whether the swapchain must be rebuilt.
#[derive(Debug, Clone)]
pub struct ResizeTracker {
    extent: vk::Extent2D,
    resized: bool,
    stale: bool,
}

impl ResizeTracker {
    pub const fn new(extent: vk::Extent2D) -> Self {
        Self {
            extent,
            resized: false,
            stale: false,
        }
    }

    /// Record a window resize.
    pub fn on_resize(&mut self, width: u32, height: u32) {
        self.extent = vk::Extent2D { width, height };
        self.resized = true;
    }

    /// Record that acquire or present reported a stale surface.
    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    /// Latest extent reported by the window.
    pub const fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub const fn needs_recreate(&self) -> bool {
        self.resized || self.stale
    }

    /// Whether the window currently has no drawable area.
    pub const fn is_minimized(&self) -> bool {
        is_degenerate(self.extent)
    }

    /// Take the pending recreation, clearing the latches.
    ///
    /// Returns `None` when nothing is pending or while the extent is
    /// degenerate; in the latter case the request stays pending.
    pub fn take_recreate(&mut self) -> Option<vk::Extent2D> {
        if !self.needs_recreate() || self.is_minimized() {
            return None;
        }
        self.resized = false;
        self.stale = false;
        Some(self.extent)
    }
}

/// Result of one [`drive_frame`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame was submitted and presented.
    Presented,
    /// Acquire or present found the surface stale; recreation is pending.
    Stale,
    /// The window or its surface has no area; nothing was done.
    Minimized,
}

/// What happened during one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    pub outcome: FrameOutcome,
    /// The swapchain was recreated before the frame began.
    pub recreated: bool,
}

/// Run one frame: recreate first if needed, then begin, record and end.
///
/// [`GpuError::SurfaceStale`] and a [`GpuError::SurfaceMinimized`] recreation
/// are absorbed; every other error is returned.
pub fn drive_frame<T, F>(target: &mut T, tracker: &mut ResizeTracker, record: F) -> Result<FrameReport>
where
    T: FrameTarget,
    F: FnOnce(&mut T, &mut T::Frame) -> Result<()>,
{
    let minimized = FrameReport {
        outcome: FrameOutcome::Minimized,
        recreated: false,
    };

    let mut recreated = false;
    if tracker.needs_recreate() {
        let Some(extent) = tracker.take_recreate() else {
            return Ok(minimized);
        };
        match target.recreate(extent) {
            Ok(()) => recreated = true,
            Err(GpuError::SurfaceMinimized) => {
                tracing::debug!("Surface has no area, recreation deferred");
                tracker.mark_stale();
                return Ok(minimized);
            }
            Err(e) => return Err(e),
        }
    }

    let report = |outcome| FrameReport { outcome, recreated };

    let mut frame = match target.begin_frame() {
        Ok(frame) => frame,
        Err(GpuError::SurfaceStale) => {
            tracing::debug!("Surface stale at acquire");
            tracker.mark_stale();
            return Ok(report(FrameOutcome::Stale));
        }
        Err(e) => return Err(e),
    };

    record(target, &mut frame)?;

    match target.end_frame(frame) {
        Ok(()) => Ok(report(FrameOutcome::Presented)),
        Err(GpuError::SurfaceStale) => {
            tracing::debug!("Surface stale at present");
            tracker.mark_stale();
            Ok(report(FrameOutcome::Stale))
        }
        Err(e) => Err(e),
    }
}

/// [`FrameTarget`] over the real renderer.
pub struct RendererTarget<'a> {
    pub gpu: &'a GpuContext,
    pub renderer: &'a mut Renderer,
}

impl FrameTarget for RendererTarget<'_> {
    type Frame = Frame;

    fn begin_frame(&mut self) -> Result<Frame> {
        self.renderer.begin_frame(self.gpu)
    }

    fn end_frame(&mut self, frame: Frame) -> Result<()> {
        self.renderer.end_frame(self.gpu, frame)
    }

    fn recreate(&mut self, extent: vk::Extent2D) -> Result<()> {
        self.renderer.recreate(self.gpu, extent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Begin(u64),
        Record(u64),
        End(u64),
        Recreate(u32, u32),
    }

    /// Swapchain stand-in that can be told to go stale on a given frame.
    struct FakeTarget {
        calls: Vec<Call>,
        frame: u64,
        render_pass: u64,
        swapchain: u64,
        framebuffer_extent: vk::Extent2D,
        stale_acquire_on: Option<u64>,
        stale_present_on: Option<u64>,
        /// Extent the surface itself reports, which can lag the window's.
        surface_extent: Option<vk::Extent2D>,
        presented: Vec<u64>,
    }

    impl FakeTarget {
        fn new(extent: vk::Extent2D) -> Self {
            Self {
                calls: Vec::new(),
                frame: 0,
                render_pass: 1,
                swapchain: 1,
                framebuffer_extent: extent,
                stale_acquire_on: None,
                stale_present_on: None,
                surface_extent: None,
                presented: Vec::new(),
            }
        }
    }

    impl FrameTarget for FakeTarget {
        type Frame = u64;

        fn begin_frame(&mut self) -> Result<u64> {
            if self.stale_acquire_on == Some(self.frame) {
                self.stale_acquire_on = None;
                return Err(GpuError::SurfaceStale);
            }
            self.calls.push(Call::Begin(self.frame));
            Ok(self.frame)
        }

        fn end_frame(&mut self, frame: u64) -> Result<()> {
            self.calls.push(Call::End(frame));
            // Submission happened either way, so the frame counter advances
            self.frame += 1;
            if self.stale_present_on == Some(frame) {
                self.stale_present_on = None;
                return Err(GpuError::SurfaceStale);
            }
            self.presented.push(frame);
            Ok(())
        }

        fn recreate(&mut self, extent: vk::Extent2D) -> Result<()> {
            assert!(!is_degenerate(extent));
            if self.surface_extent.is_some_and(is_degenerate) {
                return Err(GpuError::SurfaceMinimized);
            }
            self.calls.push(Call::Recreate(extent.width, extent.height));
            self.swapchain += 1;
            self.framebuffer_extent = extent;
            Ok(())
        }
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn run(target: &mut FakeTarget, tracker: &mut ResizeTracker) -> FrameReport {
        drive_frame(target, tracker, |t, frame| {
            t.calls.push(Call::Record(*frame));
            Ok(())
        })
        .unwrap()
    }

    #[test]
    fn steady_frames_present_in_order() {
        let mut target = FakeTarget::new(extent(800, 600));
        let mut tracker = ResizeTracker::new(extent(800, 600));
        for _ in 0..4 {
            let report = run(&mut target, &mut tracker);
            assert_eq!(report.outcome, FrameOutcome::Presented);
            assert!(!report.recreated);
        }
        assert_eq!(target.presented, vec![0, 1, 2, 3]);
        assert_eq!(target.calls[..3], [Call::Begin(0), Call::Record(0), Call::End(0)]);
    }

    #[test]
    fn stale_present_recreates_before_next_begin() {
        let mut target = FakeTarget::new(extent(800, 600));
        let mut tracker = ResizeTracker::new(extent(800, 600));
        target.stale_present_on = Some(5);

        for _ in 0..5 {
            run(&mut target, &mut tracker);
        }
        let render_pass = target.render_pass;
        let swapchain = target.swapchain;

        tracker.on_resize(1024, 768);
        let report = run(&mut target, &mut tracker);
        assert_eq!(report.outcome, FrameOutcome::Stale);
        assert!(tracker.needs_recreate());
        // Frame 5 was submitted but its present failed, so nothing was shown
        assert!(!target.presented.contains(&5));

        let calls_before = target.calls.len();
        let report = run(&mut target, &mut tracker);
        assert_eq!(report.outcome, FrameOutcome::Presented);
        assert!(report.recreated);
        assert_eq!(
            target.calls[calls_before..calls_before + 2],
            [Call::Recreate(1024, 768), Call::Begin(6)]
        );
        assert_eq!(target.render_pass, render_pass);
        assert_ne!(target.swapchain, swapchain);
        assert_eq!(target.framebuffer_extent, extent(1024, 768));
    }

    #[test]
    fn stale_acquire_records_nothing() {
        let mut target = FakeTarget::new(extent(800, 600));
        let mut tracker = ResizeTracker::new(extent(800, 600));
        target.stale_acquire_on = Some(0);

        let report = run(&mut target, &mut tracker);
        assert_eq!(report.outcome, FrameOutcome::Stale);
        assert!(target.calls.is_empty());

        let report = run(&mut target, &mut tracker);
        assert!(report.recreated);
        assert_eq!(
            target.calls,
            vec![
                Call::Recreate(800, 600),
                Call::Begin(0),
                Call::Record(0),
                Call::End(0)
            ]
        );
    }

    #[test]
    fn degenerate_extent_never_reaches_recreate() {
        let mut target = FakeTarget::new(extent(800, 600));
        let mut tracker = ResizeTracker::new(extent(800, 600));

        tracker.on_resize(0, 0);
        for _ in 0..3 {
            let report = run(&mut target, &mut tracker);
            assert_eq!(report.outcome, FrameOutcome::Minimized);
        }
        tracker.on_resize(640, 0);
        assert_eq!(run(&mut target, &mut tracker).outcome, FrameOutcome::Minimized);
        assert!(target.calls.is_empty());
        assert!(tracker.needs_recreate());

        tracker.on_resize(640, 480);
        let report = run(&mut target, &mut tracker);
        assert!(report.recreated);
        assert_eq!(target.calls[0], Call::Recreate(640, 480));
    }

    #[test]
    fn zero_area_surface_defers_recreation() {
        let mut target = FakeTarget::new(extent(800, 600));
        let mut tracker = ResizeTracker::new(extent(800, 600));

        // The window reports an area but the surface still reports none
        tracker.on_resize(1024, 768);
        target.surface_extent = Some(extent(0, 0));
        for _ in 0..2 {
            let report = run(&mut target, &mut tracker);
            assert_eq!(report.outcome, FrameOutcome::Minimized);
            assert!(!report.recreated);
            assert!(tracker.needs_recreate());
        }
        assert!(target.calls.is_empty());
        assert_eq!(target.framebuffer_extent, extent(800, 600));

        target.surface_extent = None;
        let report = run(&mut target, &mut tracker);
        assert_eq!(report.outcome, FrameOutcome::Presented);
        assert!(report.recreated);
        assert_eq!(
            target.calls,
            vec![
                Call::Recreate(1024, 768),
                Call::Begin(0),
                Call::Record(0),
                Call::End(0)
            ]
        );
        assert!(!tracker.needs_recreate());
    }

    #[test]
    fn failed_recreation_is_fatal() {
        struct NoSwapchain;
        impl FrameTarget for NoSwapchain {
            type Frame = ();
            fn begin_frame(&mut self) -> Result<()> {
                Ok(())
            }
            fn end_frame(&mut self, (): ()) -> Result<()> {
                Ok(())
            }
            fn recreate(&mut self, _: vk::Extent2D) -> Result<()> {
                Err(GpuError::SwapchainCreation("lost".into()))
            }
        }

        let mut tracker = ResizeTracker::new(extent(800, 600));
        tracker.mark_stale();
        let result = drive_frame(&mut NoSwapchain, &mut tracker, |_, ()| Ok(()));
        assert!(matches!(result, Err(GpuError::SwapchainCreation(_))));
    }

    #[test]
    fn stale_while_minimized_waits_for_area() {
        let mut tracker = ResizeTracker::new(extent(800, 600));
        tracker.mark_stale();
        tracker.on_resize(0, 600);
        assert_eq!(tracker.take_recreate(), None);
        assert!(tracker.needs_recreate());
        tracker.on_resize(800, 600);
        assert_eq!(tracker.take_recreate(), Some(extent(800, 600)));
        assert!(!tracker.needs_recreate());
    }

    #[test]
    fn repeated_resizes_coalesce() {
        let mut target = FakeTarget::new(extent(800, 600));
        let mut tracker = ResizeTracker::new(extent(800, 600));
        tracker.on_resize(900, 700);
        tracker.on_resize(1000, 700);
        run(&mut target, &mut tracker);
        let recreates: Vec<_> = target
            .calls
            .iter()
            .filter(|c| matches!(c, Call::Recreate(..)))
            .collect();
        assert_eq!(recreates, vec![&Call::Recreate(1000, 700)]);
    }

    #[test]
    fn fatal_errors_propagate() {
        struct Broken;
        impl FrameTarget for Broken {
            type Frame = ();
            fn begin_frame(&mut self) -> Result<()> {
                Err(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST))
            }
            fn end_frame(&mut self, (): ()) -> Result<()> {
                Ok(())
            }
            fn recreate(&mut self, _: vk::Extent2D) -> Result<()> {
                Ok(())
            }
        }

        let mut tracker = ResizeTracker::new(extent(800, 600));
        let result = drive_frame(&mut Broken, &mut tracker, |_, ()| Ok(()));
        assert!(matches!(result, Err(GpuError::Vulkan(_))));
        assert!(!tracker.needs_recreate());
    }
}
