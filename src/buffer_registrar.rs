use crate::device::{BufferAction, BufferBinding, DeviceError, StreamingDevice};
use crate::segment_pool::Segment;

/// Position of a registration within a binding pass.
///
/// Buffer registration is an accumulation protocol: the first channel bound
/// for a segment clears every prior binding the driver holds, every later
/// channel appends to the pass. Rotation starts a fresh pass for the new
/// segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationPhase {
    FirstForRun,
    Additional,
}

impl RegistrationPhase {
    pub fn action(self) -> BufferAction {
        match self {
            Self::FirstForRun => BufferAction::Replace,
            Self::Additional => BufferAction::Add,
        }
    }
}

pub struct BufferRegistrar;

impl BufferRegistrar {
    /// Bind one channel buffer in the given phase.
    pub fn register_channel(
        device: &mut dyn StreamingDevice,
        binding: BufferBinding,
        phase: RegistrationPhase,
    ) -> Result<(), DeviceError> {
        log::debug!(
            "binding segment {} channel {} ({} samples, {:?})",
            binding.segment,
            binding.channel,
            binding.capacity,
            phase
        );
        device.set_data_buffer(binding, phase.action())
    }

    /// Bind every channel buffer of `segment`, replace-then-add.
    pub fn register_segment(
        device: &mut dyn StreamingDevice,
        segment: &Segment,
    ) -> Result<(), DeviceError> {
        let mut phase = RegistrationPhase::FirstForRun;
        for buffer in segment.channels() {
            let binding = BufferBinding {
                channel: buffer.channel(),
                segment: segment.id(),
                capacity: buffer.capacity(),
            };
            Self::register_channel(device, binding, phase)?;
            phase = RegistrationPhase::Additional;
        }
        Ok(())
    }
}
