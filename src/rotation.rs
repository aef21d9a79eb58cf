use crate::capture::StopReason;
use crate::device::DeviceError;
use crate::segment_pool::{Segment, SegmentPool};

/// Lifecycle of one capture run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    /// Pool allocated, nothing bound yet.
    Idle,
    /// Active segment registered, continuous-run command not yet issued.
    Armed,
    /// Device is filling the active segment.
    Collecting,
    /// Active segment exhausted; its data must reach the sink.
    SegmentFull,
    /// No free slot; one last chance for the sink to drain before giving up.
    Draining,
    Stopped(StopReason),
}

/// Input to one transition of the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    /// Active segment buffers were bound to the device.
    Armed,
    /// Continuous-run command succeeded.
    Started,
    /// Poll returned no new data.
    Waiting,
    /// Poll returned fresh samples.
    Data { auto_stopped: bool },
    /// Poll reported the registered buffers are out of space.
    Exhausted { auto_stopped: bool },
    /// Delivery freed at least one pool slot.
    SlotFreed,
    /// Delivery could not free a slot.
    NoFreeSlot,
    /// External cancellation, checked once per loop iteration.
    Cancel,
    /// A device call failed.
    Fault(DeviceError),
}

/// What the orchestrator must do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    None,
    /// Fold the poll's data into the active segment and the run tracker.
    Absorb,
    /// Retire the active segment and attempt to drain completed slots.
    Deliver,
    /// Advance to a free slot and re-register its buffers.
    Rotate,
}

/// Pure mapping from (state, event) to (next state, effect). All run-control
/// decisions funnel through here; the controller and orchestrator only
/// execute the returned effect.
pub fn transition(state: &RunState, event: RunEvent) -> (RunState, Effect) {
    use RunState as S;

    if let S::Stopped(_) = state {
        return (state.clone(), Effect::None);
    }
    match event {
        RunEvent::Cancel => return (S::Stopped(StopReason::Cancelled), Effect::None),
        RunEvent::Fault(error) => return (S::Stopped(StopReason::Error(error)), Effect::None),
        _ => {}
    }
    match (state, event) {
        (S::Idle, RunEvent::Armed) => (S::Armed, Effect::None),
        (S::Armed, RunEvent::Started) => (S::Collecting, Effect::None),
        (S::Collecting, RunEvent::Waiting) => (S::Collecting, Effect::None),
        (S::Collecting, RunEvent::Data { auto_stopped: false }) => {
            (S::Collecting, Effect::Absorb)
        }
        // Autostop can arrive together with the final slice of data.
        (S::Collecting, RunEvent::Data { auto_stopped: true }) => {
            (S::Stopped(StopReason::AutoStop), Effect::Absorb)
        }
        (S::Collecting, RunEvent::Exhausted { auto_stopped: true }) => {
            (S::Stopped(StopReason::AutoStop), Effect::None)
        }
        (S::Collecting, RunEvent::Exhausted { auto_stopped: false }) => {
            (S::SegmentFull, Effect::Deliver)
        }
        (S::SegmentFull, RunEvent::SlotFreed) => (S::Collecting, Effect::Rotate),
        (S::SegmentFull, RunEvent::NoFreeSlot) => (S::Draining, Effect::None),
        (S::Draining, RunEvent::SlotFreed) => (S::Collecting, Effect::Rotate),
        (S::Draining, RunEvent::NoFreeSlot) => {
            (S::Stopped(StopReason::BufferExhausted), Effect::None)
        }
        (state, event) => {
            log::warn!("ignoring {event:?} in state {state:?}");
            (state.clone(), Effect::None)
        }
    }
}

/// Availability of one pool slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    /// Registered with the device; exactly one slot is active at any instant.
    Active,
    /// Filled, waiting to be drained by the sink.
    Completed,
}

/// Owns the pool and decides when the active segment is full, which slot
/// comes next and when the run must give up for lack of buffer space.
#[derive(Debug)]
pub struct RotationController {
    pool: SegmentPool,
    slots: Vec<SlotState>,
    active: usize,
    state: RunState,
}

impl RotationController {
    pub fn new(pool: SegmentPool) -> Self {
        let mut slots = vec![SlotState::Free; pool.len()];
        slots[0] = SlotState::Active;
        Self {
            pool,
            slots,
            active: 0,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self.state, RunState::Stopped(_))
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn active_segment(&self) -> &Segment {
        self.pool.segment(self.active)
    }

    pub fn active_segment_mut(&mut self) -> &mut Segment {
        self.pool.segment_mut(self.active)
    }

    /// Feed one event through the pure transition and adopt the next state.
    pub fn step(&mut self, event: RunEvent) -> Effect {
        let (next, effect) = transition(&self.state, event);
        if next != self.state {
            log::debug!("run state {:?} -> {next:?}", self.state);
        }
        self.state = next;
        if effect == Effect::Deliver {
            self.slots[self.active] = SlotState::Completed;
        }
        effect
    }

    /// Whether any non-active slot is free for rotation.
    pub fn has_free_slot(&self) -> bool {
        self.slots
            .iter()
            .enumerate()
            .any(|(index, &slot)| index != self.active && slot == SlotState::Free)
    }

    /// Completed slots in rotation order, oldest first.
    pub fn completed_slots(&self) -> Vec<usize> {
        let n = self.slots.len();
        (1..=n)
            .map(|offset| (self.active + offset) % n)
            .filter(|&index| self.slots[index] == SlotState::Completed)
            .collect()
    }

    pub fn segment(&self, index: usize) -> &Segment {
        self.pool.segment(index)
    }

    /// Recycle a drained slot for reuse.
    pub fn retire(&mut self, index: usize) {
        self.pool.segment_mut(index).recycle();
        self.slots[index] = SlotState::Free;
    }

    /// Advance the active index to the next free slot. The caller must
    /// re-register the returned segment's buffers with the device.
    pub fn rotate(&mut self) -> &Segment {
        let n = self.slots.len();
        let next = (1..n)
            .map(|offset| (self.active + offset) % n)
            .find(|&index| self.slots[index] == SlotState::Free)
            .unwrap_or(self.active);
        if next != self.active {
            if self.slots[self.active] == SlotState::Active {
                self.slots[self.active] = SlotState::Completed;
            }
            self.slots[next] = SlotState::Active;
            self.active = next;
            log::debug!("rotated to segment {next}");
        }
        self.pool.segment(next)
    }

    #[cfg(test)]
    fn active_slot_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|&&slot| slot == SlotState::Active)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ChannelId, DeviceCall};

    fn controller(segments: usize) -> RotationController {
        let channels = [ChannelId(0)];
        let pool = SegmentPool::allocate(&channels, 8, segments).unwrap();
        RotationController::new(pool)
    }

    fn collecting(segments: usize) -> RotationController {
        let mut c = controller(segments);
        c.step(RunEvent::Armed);
        c.step(RunEvent::Started);
        c
    }

    #[test]
    fn arm_start_reaches_collecting() {
        let c = collecting(2);
        assert_eq!(*c.state(), RunState::Collecting);
    }

    #[test]
    fn waiting_keeps_collecting() {
        let mut c = collecting(2);
        assert_eq!(c.step(RunEvent::Waiting), Effect::None);
        assert_eq!(*c.state(), RunState::Collecting);
    }

    #[test]
    fn exhausted_requests_delivery_then_rotation() {
        let mut c = collecting(3);
        assert_eq!(
            c.step(RunEvent::Exhausted { auto_stopped: false }),
            Effect::Deliver
        );
        assert_eq!(*c.state(), RunState::SegmentFull);
        assert_eq!(c.step(RunEvent::SlotFreed), Effect::Rotate);
        assert_eq!(*c.state(), RunState::Collecting);
        assert_eq!(c.rotate().id(), 1);
    }

    #[test]
    fn no_free_slot_drains_then_stops() {
        let mut c = collecting(2);
        c.step(RunEvent::Exhausted { auto_stopped: false });
        assert_eq!(c.step(RunEvent::NoFreeSlot), Effect::None);
        assert_eq!(*c.state(), RunState::Draining);
        c.step(RunEvent::NoFreeSlot);
        assert_eq!(
            *c.state(),
            RunState::Stopped(StopReason::BufferExhausted)
        );
    }

    #[test]
    fn draining_can_still_recover() {
        let mut c = collecting(2);
        c.step(RunEvent::Exhausted { auto_stopped: false });
        c.step(RunEvent::NoFreeSlot);
        assert_eq!(c.step(RunEvent::SlotFreed), Effect::Rotate);
        assert_eq!(*c.state(), RunState::Collecting);
    }

    #[test]
    fn autostop_stops_from_any_poll_shape() {
        let mut c = collecting(2);
        assert_eq!(
            c.step(RunEvent::Data { auto_stopped: true }),
            Effect::Absorb
        );
        assert_eq!(*c.state(), RunState::Stopped(StopReason::AutoStop));

        let mut c = collecting(2);
        c.step(RunEvent::Exhausted { auto_stopped: true });
        assert_eq!(*c.state(), RunState::Stopped(StopReason::AutoStop));
    }

    #[test]
    fn cancel_and_fault_stop_from_anywhere() {
        let mut c = collecting(2);
        c.step(RunEvent::Cancel);
        assert_eq!(*c.state(), RunState::Stopped(StopReason::Cancelled));

        let mut c = collecting(2);
        c.step(RunEvent::Exhausted { auto_stopped: false });
        let error = DeviceError::status(DeviceCall::GetLatestValues, 0x43);
        c.step(RunEvent::Fault(error.clone()));
        assert_eq!(*c.state(), RunState::Stopped(StopReason::Error(error)));
    }

    #[test]
    fn stopped_state_absorbs_everything() {
        let mut c = collecting(2);
        c.step(RunEvent::Cancel);
        assert_eq!(c.step(RunEvent::Data { auto_stopped: false }), Effect::None);
        assert_eq!(*c.state(), RunState::Stopped(StopReason::Cancelled));
    }

    #[test]
    fn at_most_one_slot_is_active_under_any_event_sequence() {
        let events = [
            RunEvent::Armed,
            RunEvent::Started,
            RunEvent::Waiting,
            RunEvent::Data { auto_stopped: false },
            RunEvent::Exhausted { auto_stopped: false },
            RunEvent::SlotFreed,
            RunEvent::NoFreeSlot,
        ];
        // Exercise every pair of consecutive events against a fresh rotation
        // in between; the active-slot count must never exceed one.
        for first in &events {
            for second in &events {
                let mut c = controller(3);
                c.step(first.clone());
                if c.step(second.clone()) == Effect::Rotate {
                    c.rotate();
                }
                assert!(c.active_slot_count() <= 1, "{first:?} then {second:?}");
            }
        }
    }

    #[test]
    fn completed_slots_come_back_oldest_first() {
        let mut c = collecting(3);
        c.step(RunEvent::Exhausted { auto_stopped: false });
        c.step(RunEvent::SlotFreed);
        c.rotate();
        c.step(RunEvent::Exhausted { auto_stopped: false });
        assert_eq!(c.completed_slots(), vec![0, 1]);
    }
}
