use crate::device::{
    BufferAction, BufferBinding, DeviceCall, DeviceError, PollStatus, StreamingDevice,
    StreamingRequest,
};
use std::collections::VecDeque;

const STATUS_NOT_RUNNING: u32 = 0x0000_0133;

/// Software stand-in for a streaming-capable unit.
///
/// Poll outcomes are scripted ahead of time; once the script runs dry every
/// poll reports [`PollStatus::Waiting`]. The device enforces the run
/// protocol: polling before the continuous-run command fails, and a
/// replace-action binding clears all prior bindings, exactly like a driver
/// handle would. Useful for tests and demos without hardware.
#[derive(Debug, Default)]
pub struct SimulatedDevice {
    script: VecDeque<Result<PollStatus, DeviceError>>,
    bindings: Vec<BufferBinding>,
    binding_log: Vec<(BufferBinding, BufferAction)>,
    running: bool,
    granted_interval: Option<u32>,
    run_streaming_failure: Option<u32>,
}

impl SimulatedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one poll outcome to the script.
    pub fn push(&mut self, status: PollStatus) {
        self.script.push_back(Ok(status));
    }

    /// Append a failing poll to the script.
    pub fn push_error(&mut self, error: DeviceError) {
        self.script.push_back(Err(error));
    }

    /// Make the continuous-run command fail with `status`.
    pub fn fail_run_streaming(&mut self, status: u32) {
        self.run_streaming_failure = Some(status);
    }

    /// Grant a different sample interval than requested.
    pub fn grant_interval(&mut self, interval: u32) {
        self.granted_interval = Some(interval);
    }

    /// Buffer bindings the device currently holds.
    pub fn bindings(&self) -> &[BufferBinding] {
        &self.bindings
    }

    /// Every binding call in order, with the action it carried.
    pub fn binding_log(&self) -> &[(BufferBinding, BufferAction)] {
        &self.binding_log
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

impl StreamingDevice for SimulatedDevice {
    fn set_data_buffer(
        &mut self,
        binding: BufferBinding,
        action: BufferAction,
    ) -> Result<(), DeviceError> {
        if action == BufferAction::Replace {
            self.bindings.clear();
        }
        self.bindings.push(binding);
        self.binding_log.push((binding, action));
        Ok(())
    }

    fn run_streaming(&mut self, request: &StreamingRequest) -> Result<u32, DeviceError> {
        if let Some(status) = self.run_streaming_failure {
            return Err(DeviceError::status(DeviceCall::RunStreaming, status));
        }
        self.running = true;
        Ok(self.granted_interval.unwrap_or(request.sample_interval))
    }

    fn get_latest_values(&mut self) -> Result<PollStatus, DeviceError> {
        if !self.running {
            return Err(DeviceError::status(
                DeviceCall::GetLatestValues,
                STATUS_NOT_RUNNING,
            ));
        }
        self.script
            .pop_front()
            .unwrap_or(Ok(PollStatus::Waiting))
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.running = false;
        Ok(())
    }
}
