//! Frame lifecycle driving.
//!
//! [`FrameLoop`] runs the per-frame state machine
//! (`Idle -> Acquiring -> Recording -> Submitted -> Presenting -> Idle`, with
//! a side trip through `Recreating` whenever the surface goes stale) against
//! any [`FrameBackend`]. [`FrameSlots`] holds the frame-slot cursor, the
//! per-swapchain-image guards and the fence protocol shared by every backend.

use anyhow::Result;
use log::*;

use crate::error::{EngineError, Subsystem};
use crate::vulkan::constants::MAX_FRAMES_IN_FLIGHT;

/// Lifecycle of a single frame slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Acquiring,
    Submitted,
    Presented,
}

/// Frame-slot cursor plus the record of which slot last submitted work
/// against each swapchain image.
#[derive(Clone, Debug)]
pub struct FrameSlots {
    current: usize,
    states: [SlotState; MAX_FRAMES_IN_FLIGHT],
    image_guards: Vec<Option<usize>>,
}

impl FrameSlots {
    pub fn new(image_count: usize) -> Self {
        Self {
            current: 0,
            states: [SlotState::Idle; MAX_FRAMES_IN_FLIGHT],
            image_guards: vec![None; image_count],
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn state(&self, slot: usize) -> Option<SlotState> {
        self.states.get(slot).copied()
    }

    pub fn image_count(&self) -> usize {
        self.image_guards.len()
    }

    /// The slot whose submission last targeted `image_index`.
    pub fn guard_of(&self, image_index: usize) -> Option<usize> {
        self.image_guards.get(image_index).copied().flatten()
    }

    pub fn begin_acquire(&mut self) {
        self.states[self.current] = SlotState::Acquiring;
    }

    /// The surface went stale before an image was handed out; the slot keeps
    /// its signaled guard and is not consumed.
    pub fn cancel_acquire(&mut self) {
        self.states[self.current] = SlotState::Idle;
    }

    /// Binds `image_index` to the current slot.
    ///
    /// Returns the older slot that must be waited on first when the image is
    /// still referenced by a submission from a different slot.
    pub fn guard_image(&mut self, image_index: usize) -> Result<Option<usize>> {
        let current = self.current;
        let image_count = self.image_guards.len();
        let guard = self.image_guards.get_mut(image_index).ok_or_else(|| {
            EngineError::Synchronization(
                Subsystem::Synchronizer,
                format!("image index {image_index} outside swapchain of {image_count}"),
            )
        })?;
        let previous = guard.replace(current);
        Ok(previous.filter(|&slot| slot != current))
    }

    pub fn mark_submitted(&mut self) {
        self.states[self.current] = SlotState::Submitted;
    }

    pub fn mark_presented(&mut self) {
        self.states[self.current] = SlotState::Presented;
    }

    /// Moves the cursor to the next slot and returns it.
    pub fn advance(&mut self) -> usize {
        self.current = (self.current + 1) % MAX_FRAMES_IN_FLIGHT;
        self.current
    }

    /// Forgets all image guards; the swapchain images they referred to are gone.
    pub fn reset_image_guards(&mut self, image_count: usize) {
        self.image_guards = vec![None; image_count];
    }

    /// Waits for the current slot's fence, asks `acquire` for an image, then
    /// waits for the older slot still rendering into that image, if any.
    ///
    /// An out-of-date result leaves the slot unconsumed and its fence
    /// untouched.
    pub fn acquire<F, A>(&mut self, fences: &mut F, acquire: A) -> Result<AcquireOutcome>
    where
        F: InFlightFences,
        A: FnOnce(usize) -> Result<AcquireOutcome>,
    {
        let slot = self.current;
        self.begin_acquire();
        fences.wait(slot)?;

        match acquire(slot)? {
            AcquireOutcome::OutOfDate => {
                self.cancel_acquire();
                Ok(AcquireOutcome::OutOfDate)
            }
            AcquireOutcome::Ready(image_index) => {
                if let Some(older) = self.guard_image(image_index as usize)? {
                    fences.wait(older)?;
                }
                Ok(AcquireOutcome::Ready(image_index))
            }
        }
    }

    /// Resets the current slot's fence, then lets `submit` queue work that
    /// signals it.
    pub fn submit<F, S>(&mut self, fences: &mut F, submit: S) -> Result<()>
    where
        F: InFlightFences,
        S: FnOnce(&mut F, usize) -> Result<()>,
    {
        let slot = self.current;
        fences.reset(slot)?;
        submit(fences, slot)?;
        self.mark_submitted();
        Ok(())
    }
}

/// Per-slot in-flight fences as seen by [`FrameSlots`].
pub trait InFlightFences {
    /// Blocks until the fence of `slot` is signaled.
    fn wait(&mut self, slot: usize) -> Result<()>;
    fn reset(&mut self, slot: usize) -> Result<()>;
}

/// Where the frame loop currently stands.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Recording,
    Submitted,
    Presenting,
    Recreating,
}

/// Flags raised by the window collaborator and consumed at the top of a frame.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameSignals {
    pub framebuffer_resized: bool,
    pub minimized: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    Ready(u32),
    OutOfDate,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RecreateTrigger {
    OutOfDateOnAcquire,
    StaleOnPresent,
    Resized,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Recreation {
    Rebuilt,
    /// The surface has no area; the old swapchain was left in place.
    Deferred,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Minimized: nothing was acquired, submitted or presented.
    Skipped,
    Presented { image_index: u32 },
    Recreated { trigger: RecreateTrigger },
    /// A rebuild was due but the surface had no area. Rendering is
    /// suspended and the rebuild stays pending.
    Deferred { trigger: RecreateTrigger },
}

/// The operations a frame needs from a presentation backend.
pub trait FrameBackend {
    /// Waits for the current slot's in-flight guard, then asks for the next
    /// presentable image.
    fn acquire_frame(&mut self) -> Result<AcquireOutcome>;
    fn update_uniforms(&mut self, image_index: u32) -> Result<()>;
    fn record_commands(&mut self, image_index: u32) -> Result<()>;
    fn submit(&mut self, image_index: u32) -> Result<()>;
    /// Returns `true` when the swapchain must be rebuilt.
    fn present(&mut self, image_index: u32, resize_requested: bool) -> Result<bool>;
    fn advance(&mut self);
    /// Waits for the device to go idle and rebuilds every swapchain-dependent
    /// object, unless the surface currently has no area.
    fn recreate_swapchain(&mut self) -> Result<Recreation>;
}

#[derive(Debug)]
pub struct FrameLoop {
    state: FrameState,
    transitions: Vec<FrameState>,
    frames_presented: u64,
    recreations: u64,
}

impl Default for FrameLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameLoop {
    pub fn new() -> Self {
        Self {
            state: FrameState::Idle,
            transitions: Vec::new(),
            frames_presented: 0,
            recreations: 0,
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// States entered during the last frame, in order.
    pub fn transitions(&self) -> &[FrameState] {
        &self.transitions
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn recreations(&self) -> u64 {
        self.recreations
    }

    /// Runs one frame and hands back the signals with consumed flags cleared.
    pub fn draw_frame<B: FrameBackend>(
        &mut self,
        backend: &mut B,
        mut signals: FrameSignals,
    ) -> Result<(FrameOutcome, FrameSignals)> {
        self.transitions.clear();
        if signals.minimized {
            return Ok((FrameOutcome::Skipped, signals));
        }

        self.enter(FrameState::Acquiring);
        let image_index = match backend.acquire_frame()? {
            AcquireOutcome::Ready(index) => index,
            AcquireOutcome::OutOfDate => {
                // A pending resize is satisfied by this rebuild as well.
                signals.framebuffer_resized = false;
                let outcome =
                    self.recreate(backend, RecreateTrigger::OutOfDateOnAcquire, &mut signals)?;
                self.enter(FrameState::Idle);
                return Ok((outcome, signals));
            }
        };

        self.enter(FrameState::Recording);
        backend.update_uniforms(image_index)?;
        backend.record_commands(image_index)?;
        backend.submit(image_index)?;
        self.enter(FrameState::Submitted);

        self.enter(FrameState::Presenting);
        let resized = signals.framebuffer_resized;
        let must_recreate = backend.present(image_index, resized)?;
        self.frames_presented += 1;

        let outcome = if must_recreate {
            let trigger = if resized {
                RecreateTrigger::Resized
            } else {
                RecreateTrigger::StaleOnPresent
            };
            signals.framebuffer_resized = false;
            self.recreate(backend, trigger, &mut signals)?
        } else {
            FrameOutcome::Presented { image_index }
        };

        backend.advance();
        self.enter(FrameState::Idle);
        Ok((outcome, signals))
    }

    fn enter(&mut self, state: FrameState) {
        self.state = state;
        self.transitions.push(state);
    }

    fn recreate<B: FrameBackend>(
        &mut self,
        backend: &mut B,
        trigger: RecreateTrigger,
        signals: &mut FrameSignals,
    ) -> Result<FrameOutcome> {
        self.enter(FrameState::Recreating);
        info!("Recreating swapchain ({:?}).", trigger);
        match backend.recreate_swapchain()? {
            Recreation::Rebuilt => {
                self.recreations += 1;
                Ok(FrameOutcome::Recreated { trigger })
            }
            Recreation::Deferred => {
                info!("Surface has no area, suspending rendering.");
                signals.minimized = true;
                signals.framebuffer_resized = true;
                Ok(FrameOutcome::Deferred { trigger })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    enum FenceOp {
        Wait(usize),
        Reset(usize),
        Acquire(usize),
        Queue(usize),
    }

    struct FenceLog<'a>(&'a RefCell<Vec<FenceOp>>);

    impl InFlightFences for FenceLog<'_> {
        fn wait(&mut self, slot: usize) -> Result<()> {
            self.0.borrow_mut().push(FenceOp::Wait(slot));
            Ok(())
        }

        fn reset(&mut self, slot: usize) -> Result<()> {
            self.0.borrow_mut().push(FenceOp::Reset(slot));
            Ok(())
        }
    }

    fn frame(slots: &mut FrameSlots, log: &RefCell<Vec<FenceOp>>, image: u32) {
        let mut fences = FenceLog(log);
        let outcome = slots
            .acquire(&mut fences, |slot| {
                log.borrow_mut().push(FenceOp::Acquire(slot));
                Ok(AcquireOutcome::Ready(image))
            })
            .unwrap();
        assert_eq!(outcome, AcquireOutcome::Ready(image));
        slots
            .submit(&mut fences, |_, slot| {
                log.borrow_mut().push(FenceOp::Queue(slot));
                Ok(())
            })
            .unwrap();
        slots.advance();
    }

    #[test]
    fn cursor_cycles_with_frames_in_flight_period() {
        let mut slots = FrameSlots::new(3);
        let start = slots.current();
        for k in 1..=16 {
            let slot = slots.advance();
            assert!(slot < MAX_FRAMES_IN_FLIGHT);
            assert_eq!(slot == start, k % MAX_FRAMES_IN_FLIGHT == 0, "after {k} advances");
        }
    }

    #[test]
    fn guard_reports_older_slot_only() {
        let mut slots = FrameSlots::new(3);
        assert_eq!(slots.guard_image(1).unwrap(), None);
        // Same slot again: already waited on at acquire time.
        assert_eq!(slots.guard_image(1).unwrap(), None);

        slots.advance();
        assert_eq!(slots.guard_image(1).unwrap(), Some(0));
        assert_eq!(slots.guard_of(1), Some(1));
    }

    #[test]
    fn guard_rejects_out_of_range_image() {
        let mut slots = FrameSlots::new(2);
        let error = slots.guard_image(2).unwrap_err();
        let engine_error = error.downcast_ref::<EngineError>().unwrap();
        assert_eq!(engine_error.subsystem(), Subsystem::Synchronizer);
    }

    #[test]
    fn reset_clears_guards_and_resizes() {
        let mut slots = FrameSlots::new(2);
        slots.guard_image(0).unwrap();
        slots.reset_image_guards(4);
        assert_eq!(slots.image_count(), 4);
        assert!((0..4).all(|i| slots.guard_of(i).is_none()));
    }

    #[test]
    fn slot_states_follow_frame() {
        let mut slots = FrameSlots::new(2);
        assert_eq!(slots.state(0), Some(SlotState::Idle));
        slots.begin_acquire();
        assert_eq!(slots.state(0), Some(SlotState::Acquiring));
        slots.mark_submitted();
        assert_eq!(slots.state(0), Some(SlotState::Submitted));
        slots.mark_presented();
        assert_eq!(slots.state(0), Some(SlotState::Presented));
        slots.advance();
        slots.begin_acquire();
        slots.cancel_acquire();
        assert_eq!(slots.state(1), Some(SlotState::Idle));
        assert_eq!(slots.state(MAX_FRAMES_IN_FLIGHT), None);
    }

    #[test]
    fn acquire_waits_own_fence_then_older_image_owner() {
        let mut slots = FrameSlots::new(2);
        let log = RefCell::new(Vec::new());

        frame(&mut slots, &log, 0);
        frame(&mut slots, &log, 0);

        assert_eq!(
            log.into_inner(),
            vec![
                FenceOp::Wait(0),
                FenceOp::Acquire(0),
                FenceOp::Reset(0),
                FenceOp::Queue(0),
                FenceOp::Wait(1),
                FenceOp::Acquire(1),
                // Image 0 is still referenced by slot 0.
                FenceOp::Wait(0),
                FenceOp::Reset(1),
                FenceOp::Queue(1),
            ]
        );
        assert_eq!(slots.guard_of(0), Some(1));
    }

    #[test]
    fn out_of_date_acquire_leaves_fence_and_guards_alone() {
        let mut slots = FrameSlots::new(2);
        let log = RefCell::new(Vec::new());

        let outcome = slots
            .acquire(&mut FenceLog(&log), |_| Ok(AcquireOutcome::OutOfDate))
            .unwrap();

        assert_eq!(outcome, AcquireOutcome::OutOfDate);
        assert_eq!(log.into_inner(), vec![FenceOp::Wait(0)]);
        assert_eq!(slots.current(), 0);
        assert_eq!(slots.state(0), Some(SlotState::Idle));
        assert!(slots.guard_of(0).is_none() && slots.guard_of(1).is_none());
    }

    #[test]
    fn failed_queue_submit_does_not_mark_slot_submitted() {
        let mut slots = FrameSlots::new(2);
        let log = RefCell::new(Vec::new());
        slots.begin_acquire();

        let result = slots.submit(&mut FenceLog(&log), |_, _| anyhow::bail!("device lost"));

        assert!(result.is_err());
        assert_eq!(log.into_inner(), vec![FenceOp::Reset(0)]);
        assert_eq!(slots.state(0), Some(SlotState::Acquiring));
    }
}
