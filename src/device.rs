use crate::segment_pool::SegmentOverrun;
use std::fmt;

/// Zero-based analogue input channel index. Channel 0 prints as `A`,
/// channel 1 as `B`, matching the front-panel labelling of scope hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub usize);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 < 26 {
            let letter = (b'A' + self.0 as u8) as char;
            write!(f, "{letter}")
        } else {
            write!(f, "ch{}", self.0)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coupling {
    Ac,
    Dc,
}

/// Full-scale input voltage range of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoltageRange {
    Mv10,
    Mv20,
    Mv50,
    Mv100,
    Mv200,
    Mv500,
    V1,
    V2,
    V5,
    V10,
    V20,
    V50,
}

impl VoltageRange {
    /// Full-scale value in millivolts.
    pub fn full_scale_millivolts(self) -> u32 {
        match self {
            Self::Mv10 => 10,
            Self::Mv20 => 20,
            Self::Mv50 => 50,
            Self::Mv100 => 100,
            Self::Mv200 => 200,
            Self::Mv500 => 500,
            Self::V1 => 1_000,
            Self::V2 => 2_000,
            Self::V5 => 5_000,
            Self::V10 => 10_000,
            Self::V20 => 20_000,
            Self::V50 => 50_000,
        }
    }
}

/// Unit of the requested sample interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Femtoseconds,
    Picoseconds,
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
}

impl TimeUnit {
    /// Length of one unit in seconds.
    pub fn seconds(self) -> f64 {
        match self {
            Self::Femtoseconds => 1e-15,
            Self::Picoseconds => 1e-12,
            Self::Nanoseconds => 1e-9,
            Self::Microseconds => 1e-6,
            Self::Milliseconds => 1e-3,
            Self::Seconds => 1.0,
        }
    }
}

/// On-device downsampling applied before samples reach the host buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownsampleMode {
    Raw,
    Aggregate,
    Average,
    Decimate,
}

/// Per-channel settings as handed to the device by the caller. The range and
/// coupling are opaque to the capture engine; only `enabled` steers it.
#[derive(Debug, Clone, Copy)]
pub struct ChannelConfig {
    pub enabled: bool,
    pub range: VoltageRange,
    pub coupling: Coupling,
}

impl ChannelConfig {
    pub fn enabled(range: VoltageRange, coupling: Coupling) -> Self {
        Self {
            enabled: true,
            range,
            coupling,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            range: VoltageRange::V5,
            coupling: Coupling::Dc,
        }
    }
}

/// How a buffer binding combines with the bindings the driver already holds.
///
/// `Replace` clears every prior binding for the handle before adding the new
/// one; `Add` appends to the current binding pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferAction {
    Replace,
    Add,
}

/// Identifies one channel buffer to the device's transfer mechanism.
///
/// The engine never hands raw pointers across this seam; a driver
/// implementation maps (segment, channel) to whatever memory it manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferBinding {
    pub channel: ChannelId,
    pub segment: usize,
    pub capacity: usize,
}

/// Typed request for the continuous-capture command.
#[derive(Debug, Clone)]
pub struct StreamingRequest {
    pub sample_interval: u32,
    pub time_unit: TimeUnit,
    pub pre_trigger_samples: u64,
    pub post_trigger_samples: u64,
    pub auto_stop: bool,
    pub downsample_ratio: u32,
    pub downsample_mode: DownsampleMode,
}

/// Per-channel portion of one poll response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPoll {
    pub channel: ChannelId,
    pub sample_count: usize,
    pub overflow: bool,
}

/// Samples reported by one poll. The device has already written them into the
/// registered buffers at `start_index`; this struct carries the bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollData {
    pub start_index: usize,
    pub channels: Vec<ChannelPoll>,
    pub triggered: bool,
    /// Offset of the trigger within this poll's samples, valid when `triggered`.
    pub trigger_offset: u64,
    pub auto_stopped: bool,
}

impl PollData {
    /// A poll reporting `sample_count` fresh samples on every listed channel.
    pub fn new(channels: &[ChannelId], sample_count: usize, start_index: usize) -> Self {
        Self {
            start_index,
            channels: channels
                .iter()
                .map(|&channel| ChannelPoll {
                    channel,
                    sample_count,
                    overflow: false,
                })
                .collect(),
            triggered: false,
            trigger_offset: 0,
            auto_stopped: false,
        }
    }

    pub fn with_trigger(mut self, offset: u64) -> Self {
        self.triggered = true;
        self.trigger_offset = offset;
        self
    }

    pub fn with_overflow(mut self, channel: ChannelId) -> Self {
        for poll in &mut self.channels {
            if poll.channel == channel {
                poll.overflow = true;
            }
        }
        self
    }

    pub fn with_auto_stop(mut self) -> Self {
        self.auto_stopped = true;
        self
    }

    /// Largest per-channel count in this poll.
    pub fn sample_count(&self) -> usize {
        self.channels
            .iter()
            .map(|poll| poll.sample_count)
            .max()
            .unwrap_or(0)
    }
}

/// Outcome of a single non-blocking poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    /// No new samples yet; the registered buffers still have space.
    Waiting,
    /// Fresh samples landed in the registered buffers.
    Data(PollData),
    /// The driver has filled the registered buffers and is waiting for new
    /// ones. This is the steady-state rotation signal, not an error.
    BuffersExhausted { auto_stopped: bool },
}

/// The device call that produced an error status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCall {
    SetDataBuffer,
    RunStreaming,
    GetLatestValues,
    Stop,
}

impl DeviceCall {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SetDataBuffer => "SetDataBuffer",
            Self::RunStreaming => "RunStreaming",
            Self::GetLatestValues => "GetLatestValues",
            Self::Stop => "Stop",
        }
    }
}

impl fmt::Display for DeviceCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    #[error("device call {call} failed with status {status:#010x}")]
    Status { call: DeviceCall, status: u32 },

    #[error("device reported more samples than the registered buffer holds: {0}")]
    Overrun(#[from] SegmentOverrun),
}

impl DeviceError {
    pub fn status(call: DeviceCall, status: u32) -> Self {
        Self::Status { call, status }
    }
}

/// Control seam to a streaming-capable acquisition device.
///
/// Opening/closing the unit, channel range and coupling configuration and
/// ADC-limit queries stay with the caller; the capture engine only drives the
/// four calls of the streaming protocol. All calls take `&mut self`, so one
/// owner serializes buffer registration and polling for the run's duration.
pub trait StreamingDevice {
    /// Bind one channel buffer to the device's transfer mechanism.
    fn set_data_buffer(
        &mut self,
        binding: BufferBinding,
        action: BufferAction,
    ) -> Result<(), DeviceError>;

    /// Issue the continuous-capture command. Returns the sample interval the
    /// device actually granted, in the requested time unit.
    fn run_streaming(&mut self, request: &StreamingRequest) -> Result<u32, DeviceError>;

    /// Ask for the latest available samples. Non-blocking; the device reports
    /// readiness through the returned status, never by callback.
    fn get_latest_values(&mut self) -> Result<PollStatus, DeviceError>;

    /// End the capture on the device side.
    fn stop(&mut self) -> Result<(), DeviceError>;
}
