use crate::buffer_registrar::BufferRegistrar;
use crate::cancel::CancelToken;
use crate::device::{
    ChannelConfig, ChannelId, DeviceError, DownsampleMode, PollStatus, StreamingDevice,
    StreamingRequest, TimeUnit,
};
use crate::rotation::{Effect, RotationController, RunEvent, RunState};
use crate::run_tracker::RunTracker;
use crate::segment_pool::{AllocationError, SegmentPool};
use crate::sink::{CaptureMetadata, ChannelScale, CompletedSegment, SegmentSink, SinkError};
use crate::streaming_poller::{StreamingPoller, DEFAULT_FILL_FRACTION};
use std::fmt;
use std::time::Duration;

/// Why a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The device reached the configured total sample count.
    AutoStop,
    Cancelled,
    /// Every pool slot was full and the sink drained nothing.
    BufferExhausted,
    /// A device call failed mid-run.
    Error(DeviceError),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AutoStop => f.write_str("autostop"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::BufferExhausted => f.write_str("buffer-exhausted"),
            Self::Error(error) => write!(f, "error: {error}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one channel must be enabled")]
    NoEnabledChannels,

    #[error("segment count must be at least 2, got {0}")]
    SegmentCountTooSmall(usize),

    #[error("segment capacity must be nonzero")]
    ZeroSegmentCapacity,

    #[error("sample interval must be nonzero")]
    ZeroSampleInterval,

    #[error("downsample ratio must be nonzero")]
    ZeroDownsampleRatio,

    #[error("fill fraction must lie strictly between 0 and 1, got {0}")]
    FillFractionOutOfRange(f64),

    #[error("autostop requires a total sample count")]
    AutoStopWithoutTotal,

    #[error("pre-trigger samples ({pre}) must be below the total ({total})")]
    PreTriggerExceedsTotal { pre: u64, total: u64 },
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("invalid capture configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("could not allocate the segment pool: {0}")]
    Allocation(#[from] AllocationError),

    #[error("failed to set up the streaming run: {0}")]
    Setup(#[source] DeviceError),
}

/// Everything a run needs to know up front.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub channels: Vec<ChannelConfig>,
    /// Total requested samples, or `None` to stream until cancelled.
    pub total_samples: Option<u64>,
    pub pre_trigger_samples: u64,
    /// Ask the device to end the run once `total_samples` were captured.
    pub auto_stop: bool,
    pub sample_interval: u32,
    pub time_unit: TimeUnit,
    pub downsample_ratio: u32,
    pub downsample_mode: DownsampleMode,
    pub segment_count: usize,
    pub segment_capacity: usize,
    /// Fraction of a segment the device should fill between polls.
    pub fill_fraction: f64,
    /// Positive ADC limit of the unit, as reported by the device control
    /// layer. Used only to derive per-channel scale factors for the sink.
    pub max_adc_value: i16,
}

impl CaptureConfig {
    /// Continuous capture with the given channels and library defaults
    /// everywhere else.
    pub fn new(channels: Vec<ChannelConfig>) -> Self {
        Self {
            channels,
            total_samples: None,
            pre_trigger_samples: 0,
            auto_stop: false,
            sample_interval: 1,
            time_unit: TimeUnit::Microseconds,
            downsample_ratio: 1,
            downsample_mode: DownsampleMode::Raw,
            segment_count: 3,
            segment_capacity: 100_000,
            fill_fraction: DEFAULT_FILL_FRACTION,
            max_adc_value: i16::MAX,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.channels.iter().any(|channel| channel.enabled) {
            return Err(ConfigError::NoEnabledChannels);
        }
        if self.segment_count < 2 {
            return Err(ConfigError::SegmentCountTooSmall(self.segment_count));
        }
        if self.segment_capacity == 0 {
            return Err(ConfigError::ZeroSegmentCapacity);
        }
        if self.sample_interval == 0 {
            return Err(ConfigError::ZeroSampleInterval);
        }
        if self.downsample_ratio == 0 {
            return Err(ConfigError::ZeroDownsampleRatio);
        }
        if !(self.fill_fraction > 0.0 && self.fill_fraction < 1.0) {
            return Err(ConfigError::FillFractionOutOfRange(self.fill_fraction));
        }
        match self.total_samples {
            None if self.auto_stop => return Err(ConfigError::AutoStopWithoutTotal),
            Some(total) if self.pre_trigger_samples >= total => {
                return Err(ConfigError::PreTriggerExceedsTotal {
                    pre: self.pre_trigger_samples,
                    total,
                })
            }
            _ => {}
        }
        Ok(())
    }

    fn enabled_channel_ids(&self) -> Vec<ChannelId> {
        self.channels
            .iter()
            .enumerate()
            .filter_map(|(index, channel)| channel.enabled.then_some(ChannelId(index)))
            .collect()
    }

    fn streaming_request(&self) -> StreamingRequest {
        StreamingRequest {
            sample_interval: self.sample_interval,
            time_unit: self.time_unit,
            pre_trigger_samples: self.pre_trigger_samples,
            post_trigger_samples: self
                .total_samples
                .map_or(0, |total| total - self.pre_trigger_samples),
            auto_stop: self.auto_stop,
            downsample_ratio: self.downsample_ratio,
            downsample_mode: self.downsample_mode,
        }
    }

    fn channel_scales(&self) -> Vec<ChannelScale> {
        self.channels
            .iter()
            .enumerate()
            .filter(|(_, channel)| channel.enabled)
            .map(|(index, channel)| ChannelScale {
                channel: ChannelId(index),
                millivolts_per_count: f64::from(channel.range.full_scale_millivolts())
                    / f64::from(self.max_adc_value),
            })
            .collect()
    }
}

/// What a finished run looked like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSummary {
    pub samples_captured: Vec<(ChannelId, u64)>,
    pub trigger_index: Option<u64>,
    pub overflowed_channels: Vec<ChannelId>,
    pub segments_delivered: usize,
    pub stop_reason: StopReason,
}

impl CaptureSummary {
    /// Run-wide cumulative sample count (highest channel total).
    pub fn cumulative_samples(&self) -> u64 {
        self.samples_captured
            .iter()
            .map(|&(_, samples)| samples)
            .max()
            .unwrap_or(0)
    }
}

/// Arm the device, drive the poll loop until a stop reason is reached and
/// report what was captured.
///
/// A single thread owns the device for the whole run; registration and
/// polling are never issued concurrently. `sink` receives every completed
/// segment, including a partially filled one at stop time. Without a sink
/// the run ends with [`StopReason::BufferExhausted`] once all pool slots are
/// full.
pub fn run_streaming_capture<'a>(
    device: &'a mut dyn StreamingDevice,
    config: &CaptureConfig,
    sink: Option<&'a mut dyn SegmentSink>,
    cancel: &CancelToken,
) -> Result<CaptureSummary, CaptureError> {
    config.validate()?;
    let channels = config.enabled_channel_ids();
    let span = tracing::info_span!(
        "streaming_capture",
        channels = channels.len(),
        segments = config.segment_count,
        capacity = config.segment_capacity,
    );
    let _guard = span.enter();

    let pool = SegmentPool::allocate(&channels, config.segment_capacity, config.segment_count)?;
    let mut controller = RotationController::new(pool);

    BufferRegistrar::register_segment(device, controller.active_segment())
        .map_err(CaptureError::Setup)?;
    controller.step(RunEvent::Armed);

    let poller = StreamingPoller::start(
        device,
        &config.streaming_request(),
        config.segment_capacity,
        config.fill_fraction,
    )
    .map_err(CaptureError::Setup)?;
    controller.step(RunEvent::Started);

    let metadata = CaptureMetadata {
        sample_interval_seconds: poller.effective_sample_interval(),
        scales: config.channel_scales(),
    };

    let mut capture = CaptureLoop {
        device,
        controller,
        tracker: RunTracker::new(&channels),
        poller,
        metadata,
        sink,
        delivered: 0,
    };
    let reason = capture.run(cancel);

    if let Err(error) = capture.device.stop() {
        log::warn!("device did not stop cleanly: {error}");
    }
    capture.deliver_remaining();

    log::info!(
        "capture stopped ({reason}): {} samples, {} segments delivered",
        capture.tracker.cumulative_samples(),
        capture.delivered
    );
    Ok(CaptureSummary {
        samples_captured: capture.tracker.totals(),
        trigger_index: capture.tracker.trigger_index(),
        overflowed_channels: capture.tracker.overflowed_channels(),
        segments_delivered: capture.delivered,
        stop_reason: reason,
    })
}

struct CaptureLoop<'a> {
    device: &'a mut dyn StreamingDevice,
    controller: RotationController,
    tracker: RunTracker,
    poller: StreamingPoller,
    metadata: CaptureMetadata,
    sink: Option<&'a mut dyn SegmentSink>,
    delivered: usize,
}

impl CaptureLoop<'_> {
    fn run(&mut self, cancel: &CancelToken) -> StopReason {
        loop {
            if let RunState::Stopped(reason) = self.controller.state() {
                return reason.clone();
            }
            if cancel.is_cancelled() {
                self.controller.step(RunEvent::Cancel);
                continue;
            }

            match self.poller.poll(&mut *self.device) {
                Err(error) => {
                    self.controller.step(RunEvent::Fault(error));
                    continue;
                }
                Ok(PollStatus::Waiting) => {
                    self.controller.step(RunEvent::Waiting);
                }
                Ok(PollStatus::Data(data)) => {
                    let effect = self.controller.step(RunEvent::Data {
                        auto_stopped: data.auto_stopped,
                    });
                    if effect == Effect::Absorb {
                        self.tracker.record(&data);
                        if let Err(overrun) = self.controller.active_segment_mut().absorb(&data) {
                            self.controller
                                .step(RunEvent::Fault(DeviceError::Overrun(overrun)));
                        }
                    }
                }
                Ok(PollStatus::BuffersExhausted { auto_stopped }) => {
                    let effect = self.controller.step(RunEvent::Exhausted { auto_stopped });
                    if effect == Effect::Deliver {
                        self.drain_completed(None);
                        self.advance_or_drain();
                    }
                }
            }

            if !self.controller.is_stopped() && cancel.sleep(self.poller.poll_delay()) {
                self.controller.step(RunEvent::Cancel);
            }
        }
    }

    /// Rotate if a slot is free; otherwise give the sink one bounded chance
    /// to drain before the run stops for lack of buffer space.
    fn advance_or_drain(&mut self) {
        match self.controller.step(self.slot_event()) {
            Effect::Rotate => self.rotate_and_register(),
            _ => {
                if *self.controller.state() == RunState::Draining {
                    self.drain_completed(Some(self.poller.poll_delay()));
                    if self.controller.step(self.slot_event()) == Effect::Rotate {
                        self.rotate_and_register();
                    }
                }
            }
        }
    }

    fn slot_event(&self) -> RunEvent {
        if self.controller.has_free_slot() {
            RunEvent::SlotFreed
        } else {
            RunEvent::NoFreeSlot
        }
    }

    fn rotate_and_register(&mut self) {
        self.controller.rotate();
        if let Err(error) =
            BufferRegistrar::register_segment(&mut *self.device, self.controller.active_segment())
        {
            self.controller.step(RunEvent::Fault(error));
        }
    }

    /// Hand completed slots to the sink, oldest first. Returns whether any
    /// slot was freed.
    fn drain_completed(&mut self, timeout: Option<Duration>) -> bool {
        let mut freed = false;
        for index in self.controller.completed_slots() {
            let Some(sink) = self.sink.as_mut() else {
                break;
            };
            let segment = self.controller.segment(index);
            if segment.is_empty() {
                self.controller.retire(index);
                freed = true;
                continue;
            }
            let snapshot = CompletedSegment::snapshot(segment);
            let result = match timeout {
                Some(timeout) => sink.deliver_timeout(snapshot, &self.metadata, timeout),
                None => sink.deliver(snapshot, &self.metadata),
            };
            match result {
                Ok(()) => {
                    self.controller.retire(index);
                    self.delivered += 1;
                    freed = true;
                }
                Err(SinkError::Full) => {
                    log::debug!("sink full; segment {index} stays queued");
                    break;
                }
                Err(SinkError::Closed) => {
                    log::warn!("sink consumer is gone; continuing without a sink");
                    self.sink = None;
                    break;
                }
            }
        }
        freed
    }

    /// Best-effort delivery of whatever still holds valid samples at stop
    /// time, including the partially filled active segment. Each hand-off
    /// gets one bounded wait so a briefly full queue does not drop data.
    fn deliver_remaining(&mut self) {
        let grace = self.poller.poll_delay();
        self.drain_completed(Some(grace));
        if self.controller.active_segment().is_empty() {
            return;
        }
        let snapshot = CompletedSegment::snapshot(self.controller.active_segment());
        if let Some(sink) = self.sink.as_mut() {
            match sink.deliver_timeout(snapshot, &self.metadata, grace) {
                Ok(()) => self.delivered += 1,
                Err(error) => log::warn!("could not deliver the final partial segment: {error}"),
            }
        }
    }
}
