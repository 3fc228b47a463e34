//! Saved legacy frames and task priorities.

/// Lowest legal task priority.
pub const PRIORITY_MIN: Priority = -32;
/// Highest legal task priority.
pub const PRIORITY_MAX: Priority = 15;

/// Task priority. Higher values are dispatched first.
pub type Priority = i8;

/// Clamps an arbitrary priority request into the legal band.
#[must_use]
pub fn clamp_priority(requested: i32) -> Priority {
    let clamped = requested.clamp(i32::from(PRIORITY_MIN), i32::from(PRIORITY_MAX));
    Priority::try_from(clamped).unwrap_or(PRIORITY_MIN)
}

/// Saved execution context of a legacy frame.
///
/// Holds the suspended frame's stack pointer and the chain pointer back to
/// the native frame that entered the scheduler. The scheduler only moves
/// these values between descriptors; the context-switch primitive of the
/// host bridge is the sole interpreter.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Debug)]
pub struct LegacyContext {
    stack_pointer: u32,
    frame_chain: u32,
}

impl LegacyContext {
    /// Creates a context from the values produced by the image loader.
    #[must_use]
    pub const fn new(stack_pointer: u32, frame_chain: u32) -> Self {
        Self {
            stack_pointer,
            frame_chain,
        }
    }

    /// Saved stack pointer of the suspended frame.
    #[must_use]
    pub const fn stack_pointer(&self) -> u32 {
        self.stack_pointer
    }

    /// Chain pointer back to the invoking native frame.
    #[must_use]
    pub const fn frame_chain(&self) -> u32 {
        self.frame_chain
    }
}
