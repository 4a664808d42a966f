//! Frame-slot state machine
//!
//! Each of the K frames in flight moves through
//! `Idle -> Acquiring -> Recording -> Submitted -> Presenting -> Idle`.
//! A frame abandoned because the swapchain went stale returns from
//! `Acquiring` straight to `Idle`.

use crate::backend::{VulkanError, VulkanResult};

/// Where a frame slot is in the per-frame protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotState {
    /// Free; its fence may still be pending from the last submission
    Idle,
    /// Fence waited, swapchain image being acquired
    Acquiring,
    /// The slot's command buffer being recorded
    Recording,
    /// Work handed to the graphics queue
    Submitted,
    /// Image handed to the presentation engine
    Presenting,
}

impl SlotState {
    fn can_advance_to(self, next: SlotState) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Acquiring)
                | (Self::Acquiring, Self::Recording)
                | (Self::Acquiring, Self::Idle)
                | (Self::Recording, Self::Submitted)
                | (Self::Submitted, Self::Presenting)
                | (Self::Presenting, Self::Idle)
        )
    }
}

/// The K frame slots and the index of the current one
#[derive(Debug, Clone)]
pub struct FrameSlots {
    states: Vec<SlotState>,
    current: usize,
}

impl FrameSlots {
    /// `count` idle slots, starting at slot 0
    pub fn new(count: usize) -> VulkanResult<Self> {
        if count == 0 {
            return Err(VulkanError::invalid("at least one frame slot is required"));
        }
        Ok(Self {
            states: vec![SlotState::Idle; count],
            current: 0,
        })
    }

    /// Index of the slot the next frame uses
    pub fn current(&self) -> usize {
        self.current
    }

    /// State of the current slot
    pub fn state(&self) -> SlotState {
        self.states[self.current]
    }

    /// State of slot `index`
    pub fn state_of(&self, index: usize) -> Option<SlotState> {
        self.states.get(index).copied()
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Always false; a slot set has at least one slot
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Move the current slot to `next`
    pub fn advance(&mut self, next: SlotState) -> VulkanResult<()> {
        let state = &mut self.states[self.current];
        if !state.can_advance_to(next) {
            return Err(VulkanError::invalid(format!(
                "frame slot {} cannot go from {state:?} to {next:?}",
                self.current
            )));
        }
        log::trace!("Frame slot {}: {:?} -> {:?}", self.current, state, next);
        *state = next;
        Ok(())
    }

    /// Finish the current frame after presentation and move to the next slot
    pub fn complete(&mut self) -> VulkanResult<()> {
        self.advance(SlotState::Idle)?;
        self.current = (self.current + 1) % self.states.len();
        Ok(())
    }

    /// Give up on the current frame during acquisition; the slot stays current
    pub fn abandon(&mut self) -> VulkanResult<()> {
        if self.state() != SlotState::Acquiring {
            return Err(VulkanError::invalid(format!(
                "frame slot {} abandoned while {:?}",
                self.current,
                self.state()
            )));
        }
        self.advance(SlotState::Idle)
    }

    /// Return every slot to `Idle` after a failed frame, keeping the current index
    pub fn reset(&mut self) {
        self.states.iter_mut().for_each(|state| *state = SlotState::Idle);
    }
}
