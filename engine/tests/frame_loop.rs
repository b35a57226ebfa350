use std::collections::VecDeque;

use anyhow::{bail, Result};
use engine::frame::{
    AcquireOutcome, FrameBackend, FrameLoop, FrameOutcome, FrameSignals, FrameSlots, FrameState,
    InFlightFences, RecreateTrigger, Recreation,
};
use engine::MAX_FRAMES_IN_FLIGHT;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Call {
    Acquire,
    UpdateUniforms(u32),
    Record(u32),
    Submit(u32),
    Present(u32),
    Advance,
    Recreate,
}

/// In-flight fences plus a GPU queue that retires submissions in order.
struct SimulatedGpu {
    signaled: [bool; MAX_FRAMES_IN_FLIGHT],
    queue: VecDeque<usize>,
}

impl SimulatedGpu {
    fn new() -> Self {
        Self {
            signaled: [true; MAX_FRAMES_IN_FLIGHT],
            queue: VecDeque::new(),
        }
    }

    fn outstanding(&self) -> usize {
        self.signaled.iter().filter(|s| !**s).count()
    }

    /// Lets the GPU finish its oldest submission.
    fn retire_one(&mut self) -> bool {
        match self.queue.pop_front() {
            Some(slot) => {
                self.signaled[slot] = true;
                true
            }
            None => false,
        }
    }
}

impl InFlightFences for SimulatedGpu {
    /// A fence that nothing will ever signal is a leaked guard.
    fn wait(&mut self, slot: usize) -> Result<()> {
        while !self.signaled[slot] {
            if !self.retire_one() {
                bail!("fence of slot {slot} can never signal");
            }
        }
        Ok(())
    }

    fn reset(&mut self, slot: usize) -> Result<()> {
        self.signaled[slot] = false;
        Ok(())
    }
}

/// Backend that hands out images round-robin and runs the real slot
/// protocol of [`FrameSlots`] against a [`SimulatedGpu`].
struct MockBackend {
    slots: FrameSlots,
    gpu: SimulatedGpu,
    image_count: usize,
    next_image: usize,
    calls: Vec<Call>,
    out_of_date_on_acquire: bool,
    stale_on_present: bool,
    surface_has_area: bool,
    max_outstanding: usize,
    generation: u64,
}

impl MockBackend {
    fn new(image_count: usize) -> Self {
        let _ = pretty_env_logger::try_init();
        Self {
            slots: FrameSlots::new(image_count),
            gpu: SimulatedGpu::new(),
            image_count,
            next_image: 0,
            calls: Vec::new(),
            out_of_date_on_acquire: false,
            stale_on_present: false,
            surface_has_area: true,
            max_outstanding: 0,
            generation: 0,
        }
    }

    fn count(&self, wanted: fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| wanted(c)).count()
    }
}

impl FrameBackend for MockBackend {
    fn acquire_frame(&mut self) -> Result<AcquireOutcome> {
        self.calls.push(Call::Acquire);
        let out_of_date = std::mem::take(&mut self.out_of_date_on_acquire);
        let image_count = self.image_count;
        let next_image = &mut self.next_image;

        self.slots.acquire(&mut self.gpu, |_| {
            if out_of_date {
                return Ok(AcquireOutcome::OutOfDate);
            }
            let image = *next_image;
            *next_image = (image + 1) % image_count;
            Ok(AcquireOutcome::Ready(image as u32))
        })
    }

    fn update_uniforms(&mut self, image_index: u32) -> Result<()> {
        self.calls.push(Call::UpdateUniforms(image_index));
        Ok(())
    }

    fn record_commands(&mut self, image_index: u32) -> Result<()> {
        self.calls.push(Call::Record(image_index));
        Ok(())
    }

    fn submit(&mut self, image_index: u32) -> Result<()> {
        self.calls.push(Call::Submit(image_index));
        self.slots.submit(&mut self.gpu, |gpu, slot| {
            gpu.queue.push_back(slot);
            Ok(())
        })?;
        self.max_outstanding = self.max_outstanding.max(self.gpu.outstanding());
        Ok(())
    }

    fn present(&mut self, image_index: u32, resize_requested: bool) -> Result<bool> {
        self.calls.push(Call::Present(image_index));
        self.slots.mark_presented();
        let stale = std::mem::take(&mut self.stale_on_present);
        Ok(stale || resize_requested)
    }

    fn advance(&mut self) {
        self.calls.push(Call::Advance);
        self.slots.advance();
    }

    fn recreate_swapchain(&mut self) -> Result<Recreation> {
        self.calls.push(Call::Recreate);
        // Device idle.
        while self.gpu.retire_one() {}
        if !self.surface_has_area {
            return Ok(Recreation::Deferred);
        }
        self.slots.reset_image_guards(self.image_count);
        self.next_image = 0;
        self.generation += 1;
        Ok(Recreation::Rebuilt)
    }
}

/// xorshift64; enough to vary interleavings reproducibly.
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    fn chance(&mut self, one_in: u64) -> bool {
        self.next() % one_in == 0
    }
}

fn run_frames(
    frames: &mut FrameLoop,
    backend: &mut MockBackend,
    mut signals: FrameSignals,
    count: usize,
) -> (Vec<FrameOutcome>, FrameSignals) {
    let mut outcomes = Vec::new();
    for _ in 0..count {
        let (outcome, next) = frames.draw_frame(backend, signals).unwrap();
        outcomes.push(outcome);
        signals = next;
    }
    (outcomes, signals)
}

#[test]
fn minimized_window_makes_no_backend_calls() {
    let mut backend = MockBackend::new(3);
    let mut frames = FrameLoop::new();
    let signals = FrameSignals {
        minimized: true,
        ..Default::default()
    };

    let (outcomes, signals) = run_frames(&mut frames, &mut backend, signals, 5);

    assert!(outcomes.iter().all(|o| *o == FrameOutcome::Skipped));
    assert!(backend.calls.is_empty());
    assert_eq!(frames.frames_presented(), 0);

    let restored = FrameSignals {
        minimized: false,
        ..signals
    };
    let (outcome, _) = frames.draw_frame(&mut backend, restored).unwrap();
    assert_eq!(outcome, FrameOutcome::Presented { image_index: 0 });
}

#[test]
fn frame_calls_happen_in_lifecycle_order() {
    let mut backend = MockBackend::new(3);
    let mut frames = FrameLoop::new();

    frames
        .draw_frame(&mut backend, FrameSignals::default())
        .unwrap();

    assert_eq!(
        backend.calls,
        vec![
            Call::Acquire,
            Call::UpdateUniforms(0),
            Call::Record(0),
            Call::Submit(0),
            Call::Present(0),
            Call::Advance,
        ]
    );
}

#[test]
fn resize_recreates_exactly_once() {
    let mut backend = MockBackend::new(3);
    let mut frames = FrameLoop::new();
    let (_, signals) = run_frames(&mut frames, &mut backend, FrameSignals::default(), 4);

    let resized = FrameSignals {
        framebuffer_resized: true,
        ..signals
    };
    let (outcome, signals) = frames.draw_frame(&mut backend, resized).unwrap();
    assert_eq!(
        outcome,
        FrameOutcome::Recreated {
            trigger: RecreateTrigger::Resized
        }
    );
    assert!(!signals.framebuffer_resized);

    let (outcomes, _) = run_frames(&mut frames, &mut backend, signals, 6);
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, FrameOutcome::Presented { .. })));
    assert_eq!(backend.count(|c| *c == Call::Recreate), 1);
    assert_eq!(frames.recreations(), 1);
}

#[test]
fn resize_seen_with_out_of_date_acquire_recreates_once() {
    let mut backend = MockBackend::new(3);
    let mut frames = FrameLoop::new();
    run_frames(&mut frames, &mut backend, FrameSignals::default(), 2);

    let slot_before = backend.slots.current();
    backend.out_of_date_on_acquire = true;
    let resized = FrameSignals {
        framebuffer_resized: true,
        minimized: false,
    };
    let (outcome, signals) = frames.draw_frame(&mut backend, resized).unwrap();

    assert_eq!(
        outcome,
        FrameOutcome::Recreated {
            trigger: RecreateTrigger::OutOfDateOnAcquire
        }
    );
    assert!(!signals.framebuffer_resized);
    // The slot was not consumed.
    assert_eq!(backend.slots.current(), slot_before);
    assert_eq!(backend.count(|c| matches!(c, Call::Submit(_))), 2);

    run_frames(&mut frames, &mut backend, signals, 3);
    assert_eq!(backend.count(|c| *c == Call::Recreate), 1);
}

#[test]
fn stale_present_recreates_and_still_advances() {
    let mut backend = MockBackend::new(2);
    let mut frames = FrameLoop::new();

    backend.stale_on_present = true;
    let (outcome, _) = frames
        .draw_frame(&mut backend, FrameSignals::default())
        .unwrap();

    assert_eq!(
        outcome,
        FrameOutcome::Recreated {
            trigger: RecreateTrigger::StaleOnPresent
        }
    );
    assert_eq!(backend.calls.last(), Some(&Call::Advance));
    assert_eq!(backend.slots.current(), 1);
}

#[test]
fn recreation_releases_every_image_guard() {
    let mut backend = MockBackend::new(3);
    let mut frames = FrameLoop::new();
    run_frames(&mut frames, &mut backend, FrameSignals::default(), 5);
    assert!((0..3).any(|i| backend.slots.guard_of(i).is_some()));

    backend.stale_on_present = true;
    frames
        .draw_frame(&mut backend, FrameSignals::default())
        .unwrap();

    assert!((0..3).all(|i| backend.slots.guard_of(i).is_none()));
    assert_eq!(backend.gpu.outstanding(), 0);
    // The next acquire does not wait forever.
    let (outcome, _) = frames
        .draw_frame(&mut backend, FrameSignals::default())
        .unwrap();
    assert!(matches!(outcome, FrameOutcome::Presented { .. }));
}

#[test]
fn frames_in_flight_stay_bounded_under_random_interleavings() {
    for seed in [0x9E37_79B9_7F4A_7C15u64, 42, 7, 0xDEAD_BEEF, 1234567] {
        let mut rng = Rng(seed);
        let image_count = 2 + (rng.next() % 3) as usize;
        let mut backend = MockBackend::new(image_count);
        let mut frames = FrameLoop::new();
        let mut signals = FrameSignals::default();
        let mut resize_events = 0;
        let mut ready_frames = 0;

        for _ in 0..500 {
            // The GPU makes progress at its own pace.
            while rng.chance(2) && backend.gpu.retire_one() {}

            if rng.chance(17) {
                signals.minimized = !signals.minimized;
            }
            if !signals.minimized && !signals.framebuffer_resized && rng.chance(23) {
                signals.framebuffer_resized = true;
                resize_events += 1;
            }
            backend.out_of_date_on_acquire = rng.chance(29);
            backend.stale_on_present = rng.chance(31);

            let recreations_before = backend.count(|c| *c == Call::Recreate);
            let (outcome, next) = frames
                .draw_frame(&mut backend, signals)
                .unwrap_or_else(|e| panic!("seed {seed}: {e:#}"));

            if matches!(outcome, FrameOutcome::Recreated { .. }) {
                assert_eq!(backend.count(|c| *c == Call::Recreate), recreations_before + 1);
                assert_eq!(backend.gpu.outstanding(), 0);
            }
            if matches!(
                outcome,
                FrameOutcome::Presented { .. }
                    | FrameOutcome::Recreated {
                        trigger: RecreateTrigger::Resized | RecreateTrigger::StaleOnPresent
                    }
            ) {
                ready_frames += 1;
            }
            if signals.framebuffer_resized && !signals.minimized {
                assert!(!next.framebuffer_resized);
            }
            signals = next;

            assert!(backend.gpu.outstanding() <= MAX_FRAMES_IN_FLIGHT);
        }

        assert!(backend.max_outstanding <= MAX_FRAMES_IN_FLIGHT);
        assert!(backend.count(|c| *c == Call::Recreate) >= resize_events);
        assert_eq!(backend.count(|c| *c == Call::Advance), ready_frames);
    }
}

#[test]
fn zero_area_surface_defers_rebuild_until_restored() {
    let mut backend = MockBackend::new(3);
    let mut frames = FrameLoop::new();
    run_frames(&mut frames, &mut backend, FrameSignals::default(), 3);

    // Minimized before any zero-size resize event arrived.
    backend.surface_has_area = false;
    backend.stale_on_present = true;
    let (outcome, signals) = frames
        .draw_frame(&mut backend, FrameSignals::default())
        .unwrap();

    assert_eq!(
        outcome,
        FrameOutcome::Deferred {
            trigger: RecreateTrigger::StaleOnPresent
        }
    );
    assert!(signals.minimized);
    assert!(signals.framebuffer_resized);
    assert_eq!(backend.generation, 0);
    assert_eq!(frames.recreations(), 0);
    assert_eq!(backend.calls.last(), Some(&Call::Advance));

    let calls_before = backend.calls.len();
    let (outcomes, signals) = run_frames(&mut frames, &mut backend, signals, 4);
    assert!(outcomes.iter().all(|o| *o == FrameOutcome::Skipped));
    assert_eq!(backend.calls.len(), calls_before);

    backend.surface_has_area = true;
    let restored = FrameSignals {
        minimized: false,
        ..signals
    };
    let (outcome, signals) = frames.draw_frame(&mut backend, restored).unwrap();
    assert_eq!(
        outcome,
        FrameOutcome::Recreated {
            trigger: RecreateTrigger::Resized
        }
    );
    assert!(!signals.framebuffer_resized);
    assert_eq!(backend.generation, 1);
    assert_eq!(frames.recreations(), 1);
}

#[test]
fn zero_area_on_out_of_date_acquire_submits_nothing() {
    let mut backend = MockBackend::new(2);
    let mut frames = FrameLoop::new();

    backend.surface_has_area = false;
    backend.out_of_date_on_acquire = true;
    let (outcome, signals) = frames
        .draw_frame(&mut backend, FrameSignals::default())
        .unwrap();

    assert_eq!(
        outcome,
        FrameOutcome::Deferred {
            trigger: RecreateTrigger::OutOfDateOnAcquire
        }
    );
    assert!(signals.minimized && signals.framebuffer_resized);
    assert_eq!(backend.calls, vec![Call::Acquire, Call::Recreate]);
    assert_eq!(backend.slots.current(), 0);
    assert_eq!(frames.state(), FrameState::Idle);
}

#[test]
fn every_frame_state_is_entered_in_order() {
    let mut backend = MockBackend::new(3);
    let mut frames = FrameLoop::new();

    frames
        .draw_frame(&mut backend, FrameSignals::default())
        .unwrap();
    assert_eq!(
        frames.transitions(),
        &[
            FrameState::Acquiring,
            FrameState::Recording,
            FrameState::Submitted,
            FrameState::Presenting,
            FrameState::Idle,
        ]
    );

    backend.stale_on_present = true;
    frames
        .draw_frame(&mut backend, FrameSignals::default())
        .unwrap();
    assert_eq!(
        frames.transitions(),
        &[
            FrameState::Acquiring,
            FrameState::Recording,
            FrameState::Submitted,
            FrameState::Presenting,
            FrameState::Recreating,
            FrameState::Idle,
        ]
    );

    let minimized = FrameSignals {
        minimized: true,
        ..Default::default()
    };
    frames.draw_frame(&mut backend, minimized).unwrap();
    assert!(frames.transitions().is_empty());
}

#[test]
fn cursor_returns_after_even_number_of_advances() {
    let mut slots = FrameSlots::new(3);
    for k in 0..16 {
        let start = slots.current();
        for _ in 0..k {
            slots.advance();
        }
        if k % MAX_FRAMES_IN_FLIGHT == 0 {
            assert_eq!(slots.current(), start);
        } else {
            assert_ne!(slots.current(), start);
        }
    }
}
