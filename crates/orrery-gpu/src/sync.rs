//! Synchronization primitives and the frames-in-flight ring.

use crate::error::Result;
use ash::vk;
use orrery_core::constants::NO_TIMEOUT;

/// Create a semaphore.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let create_info = vk::SemaphoreCreateInfo::default();
    Ok(unsafe { device.create_semaphore(&create_info, None)? })
}

/// Create a fence.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };

    let create_info = vk::FenceCreateInfo::default().flags(flags);
    Ok(unsafe { device.create_fence(&create_info, None)? })
}

/// Wait for a fence to be signaled.
///
/// # Safety
/// The device and fence must be valid.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub unsafe fn wait_for_fence(device: &ash::Device, fence: vk::Fence, timeout_ns: u64) -> Result<()> {
    unsafe { device.wait_for_fences(&[fence], true, timeout_ns)? };
    Ok(())
}

/// Reset a fence to unsignaled state.
///
/// # Safety
/// The device and fence must be valid.
pub unsafe fn reset_fence(device: &ash::Device, fence: vk::Fence) -> Result<()> {
    unsafe { device.reset_fences(&[fence])? };
    Ok(())
}

/// Synchronization objects owned by one frame slot.
#[derive(Debug, Clone, Copy)]
pub struct FrameSync {
    /// Signaled when the acquired swapchain image can be rendered to
    pub image_available: vk::Semaphore,
    /// Signaled when the slot's graphics work is done; presentation waits on it
    pub render_finished: vk::Semaphore,
    /// Signaled when the slot's submission has completed on the GPU
    pub in_flight: vk::Fence,
}

impl FrameSync {
    /// Create frame synchronization resources. The fence starts signaled so
    /// the first wait on a fresh slot returns immediately.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device) -> Result<Self> {
        unsafe {
            Ok(Self {
                image_available: create_semaphore(device)?,
                render_finished: create_semaphore(device)?,
                in_flight: create_fence(device, true)?,
            })
        }
    }

    /// Block until this slot's previous submission has completed.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn wait(&self, device: &ash::Device) -> Result<()> {
        unsafe { wait_for_fence(device, self.in_flight, NO_TIMEOUT) }
    }

    /// Destroy synchronization resources.
    ///
    /// # Safety
    /// The device must be valid and resources must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight, None);
        }
    }
}

/// Per-slot synchronization objects for N frames in flight.
///
/// The ring does not track a current slot; the frame orchestrator owns the
/// slot index and passes it in.
pub struct FrameSyncRing {
    slots: Vec<FrameSync>,
}

impl FrameSyncRing {
    /// Create a ring with `frames_in_flight` slots.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device, frames_in_flight: usize) -> Result<Self> {
        let mut slots = Vec::with_capacity(frames_in_flight);
        for _ in 0..frames_in_flight {
            slots.push(unsafe { FrameSync::new(device)? });
        }

        Ok(Self { slots })
    }

    /// Sync objects of a specific slot.
    pub fn slot(&self, index: usize) -> &FrameSync {
        &self.slots[index]
    }

    /// Number of slots (frames in flight).
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Wait until every slot's last submission has completed.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn wait_all(&self, device: &ash::Device) -> Result<()> {
        let fences: Vec<vk::Fence> = self.slots.iter().map(|s| s.in_flight).collect();
        if !fences.is_empty() {
            unsafe { device.wait_for_fences(&fences, true, NO_TIMEOUT)? };
        }
        Ok(())
    }

    /// Destroy all resources.
    ///
    /// # Safety
    /// The device must be valid and all resources must not be in use.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for sync in self.slots.drain(..) {
            unsafe { sync.destroy(device) };
        }
    }
}

/// Tracks which fence currently guards each swapchain image.
///
/// The presentation engine may hand back images in any order and the image
/// count K need not equal the number of frame slots N, so an image can be
/// re-acquired while the submission that last rendered to it is still
/// running under another slot's fence.
#[derive(Debug, Clone)]
pub struct ImagesInFlight<F> {
    guards: Vec<Option<F>>,
}

impl<F: Copy + PartialEq> ImagesInFlight<F> {
    /// Create a map for `image_count` images, none guarded.
    pub fn new(image_count: usize) -> Self {
        Self {
            guards: vec![None; image_count],
        }
    }

    /// Forget all guards and resize for a new swapchain.
    pub fn reset(&mut self, image_count: usize) {
        self.guards.clear();
        self.guards.resize(image_count, None);
    }

    /// Fence guarding `image`, if any.
    pub fn guard(&self, image: u32) -> Option<F> {
        self.guards.get(image as usize).copied().flatten()
    }

    /// Register `fence` as the guard of `image`.
    ///
    /// Returns the fence that guarded the image before, when it differs from
    /// `fence`; the caller must wait on it before submitting work that
    /// targets the image.
    pub fn claim(&mut self, image: u32, fence: F) -> Option<F> {
        let slot = self.guards.get_mut(image as usize)?;
        let previous = slot.replace(fence);
        previous.filter(|prev| *prev != fence)
    }

    /// Number of tracked images.
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orrery_core::next_slot;

    /// In-order queue model: fences are slot indices, a wait retires every
    /// submission up to and including the last one that used that fence.
    struct SimQueue {
        signaled: Vec<bool>,
        /// (fence, image, command buffer) in submission order
        pending: Vec<(usize, u32, usize)>,
    }

    impl SimQueue {
        fn new(slots: usize) -> Self {
            Self {
                signaled: vec![true; slots],
                pending: Vec::new(),
            }
        }

        fn wait(&mut self, fence: usize) {
            if let Some(last) = self.pending.iter().rposition(|(f, _, _)| *f == fence) {
                for (f, _, _) in self.pending.drain(..=last) {
                    self.signaled[f] = true;
                }
            }
        }

        fn submit(&mut self, fence: usize, image: u32, cmd: usize) {
            assert!(
                !self.pending.iter().any(|(_, _, c)| *c == cmd),
                "command buffer {cmd} submitted while still pending"
            );
            assert!(
                !self.pending.iter().any(|(_, i, _)| *i == image),
                "image {image} targeted while an earlier submission still renders to it"
            );
            self.signaled[fence] = false;
            self.pending.push((fence, image, cmd));
        }
    }

    /// Drive the acquire/submit protocol for `frames` frames with the given
    /// presentation order and return the acquired image indices.
    fn run_protocol(slots: usize, images: &[u32], image_count: usize) -> Vec<u32> {
        let mut queue = SimQueue::new(slots);
        let mut in_flight = ImagesInFlight::new(image_count);
        let mut slot = 0;
        let mut acquired = Vec::new();

        for &image in images {
            // acquire: wait the slot's own fence first
            queue.wait(slot);
            assert!(queue.signaled[slot], "slot {slot} re-recorded while in flight");

            // submit: wait whichever fence still guards the image
            if let Some(previous) = in_flight.claim(image, slot) {
                queue.wait(previous);
            }
            // command buffer index == slot index
            queue.submit(slot, image, slot);
            acquired.push(image);
            slot = next_slot(slot, slots);
        }
        acquired
    }

    #[test]
    fn two_images_two_slots_cycle() {
        let acquired = run_protocol(2, &[0, 1, 0, 1], 2);
        assert_eq!(acquired, vec![0, 1, 0, 1]);
    }

    #[test]
    fn more_images_than_slots() {
        run_protocol(2, &[0, 1, 2, 0, 1, 2, 0, 1], 3);
    }

    #[test]
    fn out_of_order_presentation_engine() {
        // Image 0 comes back two frames in a row under different slots
        run_protocol(2, &[0, 1, 1, 0, 2, 2, 0], 3);
    }

    #[test]
    fn fewer_images_than_slots() {
        run_protocol(3, &[0, 1, 0, 1, 0, 1], 2);
    }

    #[test]
    fn claim_returns_previous_guard() {
        let mut map = ImagesInFlight::new(3);
        assert_eq!(map.claim(0, 10), None);
        assert_eq!(map.claim(0, 11), Some(10));
        assert_eq!(map.guard(0), Some(11));
        // Re-claiming with the same fence needs no extra wait
        assert_eq!(map.claim(0, 11), None);
        assert_eq!(map.guard(1), None);
    }

    #[test]
    fn reset_forgets_guards() {
        let mut map = ImagesInFlight::new(2);
        map.claim(1, 7);
        map.reset(3);
        assert_eq!(map.len(), 3);
        assert_eq!(map.guard(1), None);
    }

    #[test]
    fn out_of_range_image_is_ignored() {
        let mut map = ImagesInFlight::new(2);
        assert_eq!(map.claim(5, 1), None);
        assert_eq!(map.guard(5), None);
    }
}
