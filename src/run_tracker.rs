use crate::device::{ChannelId, PollData};

/// Run-wide trigger and overflow bookkeeping, accumulated from every poll.
#[derive(Debug)]
pub struct RunTracker {
    channels: Vec<ChannelId>,
    totals: Vec<u64>,
    overflow: Vec<bool>,
    trigger_index: Option<u64>,
    cumulative: u64,
    auto_stopped: bool,
}

impl RunTracker {
    pub fn new(channels: &[ChannelId]) -> Self {
        Self {
            channels: channels.to_vec(),
            totals: vec![0; channels.len()],
            overflow: vec![false; channels.len()],
            trigger_index: None,
            cumulative: 0,
            auto_stopped: false,
        }
    }

    /// Fold one poll into the run totals. The first trigger observed fixes
    /// the absolute trigger index at the cumulative count before this poll
    /// plus the local offset; later triggers are ignored. Overflow flags are
    /// sticky for the run's lifetime.
    pub fn record(&mut self, data: &PollData) {
        if data.triggered && self.trigger_index.is_none() {
            let index = self.cumulative + data.trigger_offset;
            log::debug!("trigger fired at absolute sample index {index}");
            self.trigger_index = Some(index);
        }
        for poll in &data.channels {
            if let Some(slot) = self.channels.iter().position(|&c| c == poll.channel) {
                self.totals[slot] += poll.sample_count as u64;
                self.overflow[slot] |= poll.overflow;
            }
        }
        self.cumulative += data.sample_count() as u64;
        if data.auto_stopped {
            self.auto_stopped = true;
        }
    }

    /// Absolute sample offset where the trigger first fired, if it did.
    pub fn trigger_index(&self) -> Option<u64> {
        self.trigger_index
    }

    /// Channels whose input exceeded the representable range at any point.
    pub fn overflowed_channels(&self) -> Vec<ChannelId> {
        self.channels
            .iter()
            .zip(&self.overflow)
            .filter_map(|(&channel, &overflowed)| overflowed.then_some(channel))
            .collect()
    }

    /// Total samples captured per channel.
    pub fn totals(&self) -> Vec<(ChannelId, u64)> {
        self.channels.iter().copied().zip(self.totals.iter().copied()).collect()
    }

    /// Run-wide cumulative sample count (highest channel position).
    pub fn cumulative_samples(&self) -> u64 {
        self.cumulative
    }

    pub fn auto_stopped(&self) -> bool {
        self.auto_stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channels() -> Vec<ChannelId> {
        vec![ChannelId(0), ChannelId(1)]
    }

    #[test]
    fn first_trigger_wins() {
        let ids = channels();
        let mut tracker = RunTracker::new(&ids);

        // Trigger at local offset 500 while nothing has been captured yet.
        tracker.record(&PollData::new(&ids, 1_000, 0).with_trigger(500));
        assert_eq!(tracker.trigger_index(), Some(500));

        // A later trigger is ignored.
        tracker.record(&PollData::new(&ids, 1_000, 1_000).with_trigger(40));
        assert_eq!(tracker.trigger_index(), Some(500));
    }

    #[test]
    fn trigger_index_is_cumulative_plus_local_offset() {
        let ids = channels();
        let mut tracker = RunTracker::new(&ids);

        tracker.record(&PollData::new(&ids, 1_000, 0));
        tracker.record(&PollData::new(&ids, 500, 1_000).with_trigger(25));
        assert_eq!(tracker.trigger_index(), Some(1_025));
    }

    #[test]
    fn overflow_stays_set_for_the_run() {
        let ids = channels();
        let mut tracker = RunTracker::new(&ids);

        tracker.record(&PollData::new(&ids, 10, 0).with_overflow(ChannelId(1)));
        tracker.record(&PollData::new(&ids, 10, 10));

        assert_eq!(tracker.overflowed_channels(), vec![ChannelId(1)]);
    }

    #[test]
    fn totals_accumulate_per_channel() {
        let ids = channels();
        let mut tracker = RunTracker::new(&ids);

        tracker.record(&PollData::new(&ids, 100, 0));
        tracker.record(&PollData::new(&ids, 50, 100));

        assert_eq!(
            tracker.totals(),
            vec![(ChannelId(0), 150), (ChannelId(1), 150)]
        );
        assert_eq!(tracker.cumulative_samples(), 150);
    }

    #[test]
    fn autostop_observation_is_sticky() {
        let ids = channels();
        let mut tracker = RunTracker::new(&ids);

        tracker.record(&PollData::new(&ids, 10, 0).with_auto_stop());
        tracker.record(&PollData::new(&ids, 0, 0));
        assert!(tracker.auto_stopped());
    }
}
