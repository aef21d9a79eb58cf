use crate::device::{DeviceError, PollStatus, StreamingDevice, StreamingRequest, TimeUnit};
use std::time::Duration;

/// Fraction of a segment the device should fill between polls. The driver
/// recommendation is 30-50%; lower wastes polls, higher risks late retrieval.
pub const DEFAULT_FILL_FRACTION: f64 = 0.3;

const MIN_FILL_FRACTION: f64 = 0.05;
const MAX_FILL_FRACTION: f64 = 0.95;

/// Drives the continuous-capture command and the polling cadence.
///
/// The device communicates readiness through return codes from repeated
/// calls, never by notification, so the owner re-enters [`Self::poll`] after
/// each [`Self::poll_delay`].
#[derive(Debug)]
pub struct StreamingPoller {
    granted_interval: u32,
    time_unit: TimeUnit,
    segment_capacity: usize,
    fill_fraction: f64,
    poll_delay: Duration,
}

impl StreamingPoller {
    /// Issue the continuous-capture command and compute the inter-poll delay
    /// from the sample interval the device actually granted.
    pub fn start(
        device: &mut dyn StreamingDevice,
        request: &StreamingRequest,
        segment_capacity: usize,
        fill_fraction: f64,
    ) -> Result<Self, DeviceError> {
        let granted_interval = device.run_streaming(request)?;
        let mut poller = Self {
            granted_interval,
            time_unit: request.time_unit,
            segment_capacity,
            fill_fraction: fill_fraction.clamp(MIN_FILL_FRACTION, MAX_FILL_FRACTION),
            poll_delay: Duration::ZERO,
        };
        poller.recompute_delay();
        log::debug!(
            "streaming started: granted interval {granted_interval} x {:?}, poll delay {:?}",
            request.time_unit,
            poller.poll_delay
        );
        Ok(poller)
    }

    /// Sample interval the device granted, in seconds.
    pub fn effective_sample_interval(&self) -> f64 {
        f64::from(self.granted_interval) * self.time_unit.seconds()
    }

    /// Delay to wait between polls.
    pub fn poll_delay(&self) -> Duration {
        self.poll_delay
    }

    /// Adjust for a new per-segment capacity, e.g. after re-registration with
    /// differently sized buffers.
    pub fn set_segment_capacity(&mut self, segment_capacity: usize) {
        self.segment_capacity = segment_capacity;
        self.recompute_delay();
    }

    fn recompute_delay(&mut self) {
        let seconds =
            self.effective_sample_interval() * self.segment_capacity as f64 * self.fill_fraction;
        self.poll_delay = Duration::from_secs_f64(seconds.max(0.0));
    }

    /// One non-blocking request for the latest available samples.
    pub fn poll(&self, device: &mut dyn StreamingDevice) -> Result<PollStatus, DeviceError> {
        let status = device.get_latest_values()?;
        log::trace!("poll -> {status:?}");
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{BufferAction, BufferBinding, DownsampleMode};

    struct FixedDevice {
        granted: u32,
    }

    impl StreamingDevice for FixedDevice {
        fn set_data_buffer(
            &mut self,
            _binding: BufferBinding,
            _action: BufferAction,
        ) -> Result<(), DeviceError> {
            Ok(())
        }

        fn run_streaming(&mut self, _request: &StreamingRequest) -> Result<u32, DeviceError> {
            Ok(self.granted)
        }

        fn get_latest_values(&mut self) -> Result<PollStatus, DeviceError> {
            Ok(PollStatus::Waiting)
        }

        fn stop(&mut self) -> Result<(), DeviceError> {
            Ok(())
        }
    }

    fn request(interval: u32, unit: TimeUnit) -> StreamingRequest {
        StreamingRequest {
            sample_interval: interval,
            time_unit: unit,
            pre_trigger_samples: 0,
            post_trigger_samples: 100_000,
            auto_stop: false,
            downsample_ratio: 1,
            downsample_mode: DownsampleMode::Raw,
        }
    }

    #[test]
    fn delay_is_interval_times_capacity_times_fraction() {
        // 1 us x 100000 samples x 0.3 = 30 ms
        let mut device = FixedDevice { granted: 1 };
        let poller = StreamingPoller::start(
            &mut device,
            &request(1, TimeUnit::Microseconds),
            100_000,
            0.3,
        )
        .unwrap();
        assert_eq!(poller.poll_delay(), Duration::from_millis(30));
    }

    #[test]
    fn delay_follows_the_granted_interval() {
        // Device grants 2 us although 1 us was asked for.
        let mut device = FixedDevice { granted: 2 };
        let poller = StreamingPoller::start(
            &mut device,
            &request(1, TimeUnit::Microseconds),
            100_000,
            0.3,
        )
        .unwrap();
        assert_eq!(poller.poll_delay(), Duration::from_millis(60));
        assert_eq!(poller.effective_sample_interval(), 2e-6);
    }

    #[test]
    fn delay_recomputes_on_capacity_change() {
        let mut device = FixedDevice { granted: 1 };
        let mut poller = StreamingPoller::start(
            &mut device,
            &request(1, TimeUnit::Microseconds),
            100_000,
            0.3,
        )
        .unwrap();
        poller.set_segment_capacity(50_000);
        assert_eq!(poller.poll_delay(), Duration::from_millis(15));
    }

    #[test]
    fn fill_fraction_is_clamped() {
        let mut device = FixedDevice { granted: 1 };
        let poller = StreamingPoller::start(
            &mut device,
            &request(1, TimeUnit::Milliseconds),
            1_000,
            5.0,
        )
        .unwrap();
        // Clamped to 0.95: 1 ms x 1000 x 0.95 = 950 ms.
        assert_eq!(poller.poll_delay(), Duration::from_millis(950));
    }
}
