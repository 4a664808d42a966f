//! Semaphores, fences and per-slot frame synchronization
//!
//! # Objects
//!
//! [`Semaphore`] and [`Fence`] are RAII wrappers that destroy through the
//! device's capability table. [`FrameSync`] bundles the three objects one
//! frame slot needs; the renderer creates K of them once and never resizes
//! the set.
//!
//! # GPU-GPU ordering (semaphores)
//!
//! ```text
//! acquire(j) --signal--> image_available[i]
//!                              |
//!             submit(cmd[i]) waits at COLOR_ATTACHMENT_OUTPUT
//!                              |
//!            submit --signal--> render_finished[i]
//!                              |
//!                   present(j) waits
//! ```
//!
//! Only the color output stage waits for the image, so vertex work of the
//! frame may start before the presentation engine releases it.
//!
//! # CPU-GPU ordering (fences)
//!
//! ```text
//! frame n     : wait in_flight[i] -> ... -> reset in_flight[i] -> submit(signal in_flight[i])
//! frame n + K : wait in_flight[i] -> ...
//! ```
//!
//! Fences start signaled so the first K frames do not block. A fence is only
//! reset immediately before the submission that signals it again; a frame
//! abandoned before submission leaves it signaled. Waits are bounded by the
//! configured timeout and expiry is a fatal [`VulkanError::Timeout`].

use ash::vk;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::driver::{DeviceDriver, FenceWait};
use crate::backend::initialization::device::Device;
use crate::backend::{VulkanError, VulkanResult};

/// Binary semaphore with RAII cleanup
pub struct Semaphore {
    driver: Arc<dyn DeviceDriver>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a new semaphore
    pub fn new(device: &Device) -> VulkanResult<Self> {
        let driver = Arc::clone(device.driver());
        let semaphore = driver.create_semaphore()?;
        Ok(Self { driver, semaphore })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        self.driver.destroy_semaphore(self.semaphore);
    }
}

/// Fence wrapper with RAII cleanup
pub struct Fence {
    driver: Arc<dyn DeviceDriver>,
    fence: vk::Fence,
}

impl Fence {
    /// Create a new fence
    pub fn new(device: &Device, signaled: bool) -> VulkanResult<Self> {
        let driver = Arc::clone(device.driver());
        let fence = driver.create_fence(signaled)?;
        Ok(Self { driver, fence })
    }

    /// Block until the fence signals; expiry of `timeout` is a fatal [`VulkanError::Timeout`]
    pub fn wait(&self, timeout: Duration) -> VulkanResult<()> {
        match self.driver.wait_for_fence(self.fence, timeout)? {
            FenceWait::Signaled => Ok(()),
            FenceWait::TimedOut => {
                log::error!("Fence {:?} not signaled after {:?}", self.fence, timeout);
                Err(VulkanError::Timeout { waited: timeout })
            }
        }
    }

    /// Whether the fence is signaled, without blocking
    pub fn is_signaled(&self) -> VulkanResult<bool> {
        self.driver.fence_status(self.fence)
    }

    /// Reset fence
    pub fn reset(&self) -> VulkanResult<()> {
        self.driver.reset_fence(self.fence)
    }

    /// Get the fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        self.driver.destroy_fence(self.fence);
    }
}

/// Synchronization objects of one frame slot
pub struct FrameSync {
    /// Signaled when the acquired swapchain image is ready
    pub image_available: Semaphore,
    /// Signaled when the slot's submission finishes rendering
    pub render_finished: Semaphore,
    /// Signaled when the slot's submission completes; created signaled
    pub in_flight: Fence,
}

impl FrameSync {
    /// Create frame synchronization objects
    pub fn new(device: &Device) -> VulkanResult<Self> {
        Ok(Self {
            image_available: Semaphore::new(device)?,
            render_finished: Semaphore::new(device)?,
            in_flight: Fence::new(device, true)?,
        })
    }

    /// One set of objects for each of `frames_in_flight` slots
    pub fn for_slots(device: &Device, frames_in_flight: usize) -> VulkanResult<Vec<Self>> {
        if frames_in_flight == 0 {
            return Err(VulkanError::invalid("at least one frame in flight is required"));
        }
        log::debug!("Creating sync objects for {frames_in_flight} frames in flight");
        (0..frames_in_flight).map(|_| Self::new(device)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::driver::headless::DriverCall;
    use crate::backend::initialization::device::tests::headless_device;

    #[test]
    fn test_in_flight_fence_starts_signaled() {
        let (instance, device) = headless_device();
        let slots = FrameSync::for_slots(&device, 2).unwrap();
        assert_eq!(slots.len(), 2);
        for slot in &slots {
            assert!(slot.in_flight.is_signaled().unwrap());
            slot.in_flight.wait(Duration::from_millis(10)).unwrap();
        }
        assert_ne!(slots[0].image_available.handle(), slots[1].image_available.handle());

        drop(slots);
        assert!(instance.live_objects().is_empty());
    }

    #[test]
    fn test_unsignaled_fence_times_out() {
        let (instance, device) = headless_device();
        let fence = Fence::new(&device, false).unwrap();
        let result = fence.wait(Duration::from_millis(5));
        assert!(matches!(result, Err(VulkanError::Timeout { waited }) if waited == Duration::from_millis(5)));
        assert!(!fence.is_signaled().unwrap());
        assert!(instance.calls().contains(&DriverCall::WaitForFence { fence: fence.handle() }));
    }

    #[test]
    fn test_reset_returns_fence_to_unsignaled() {
        let (instance, device) = headless_device();
        let fence = Fence::new(&device, true).unwrap();
        fence.reset().unwrap();
        assert!(!fence.is_signaled().unwrap());
        assert!(instance.violations().is_empty());
    }

    #[test]
    fn test_zero_slots_rejected() {
        let (_instance, device) = headless_device();
        assert!(FrameSync::for_slots(&device, 0).is_err());
    }
}
