use crate::gis::frame::DecodedSample;

use serde::Serialize;
use std::collections::VecDeque;

/// Headline metrics of one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Summary {
    pub total_count: u64,
    pub max_amplitude: f64,
}

impl Summary {
    pub fn of(sample: &DecodedSample) -> Self {
        Self {
            total_count: sample.counters.iter().map(|&c| c as u64).sum(),
            max_amplitude: sample.amplitudes.iter().copied().reduce(f64::max).unwrap_or(0.0),
        }
    }
}

/// Turns samples into summaries and, in accumulation mode, keeps the
/// (phase, amplitude) points of the last `capacity` polls for the PRPD view.
///
/// Eviction works on whole polls, not on single points.
#[derive(Debug, Clone)]
pub struct Aggregator {
    accumulate: bool,
    capacity: usize,
    batches: VecDeque<Vec<(f64, f64)>>,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(false, 5)
    }
}

impl Aggregator {
    pub fn new(accumulate: bool, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            accumulate,
            capacity,
            batches: VecDeque::with_capacity(capacity + 1),
        }
    }

    pub fn accumulate(&self) -> bool {
        self.accumulate
    }

    pub fn set_accumulate(&mut self, accumulate: bool) {
        self.accumulate = accumulate;
        if !accumulate {
            let excess = self.batches.len().saturating_sub(1);
            self.batches.drain(..excess);
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Polls without a single (phase, amplitude) pair leave the history as is.
    pub fn ingest(&mut self, sample: &DecodedSample) -> Summary {
        let points = sample.points();
        if points.is_empty() {
            return Summary::of(sample);
        }

        if !self.accumulate {
            self.batches.clear();
        }

        self.batches.push_back(points);
        while self.batches.len() > self.capacity {
            self.batches.pop_front();
        }

        Summary::of(sample)
    }

    /// Number of polls currently held.
    pub fn batches(&self) -> usize {
        self.batches.len()
    }

    /// All held points, oldest poll first.
    pub fn points(&self) -> Vec<(f64, f64)> {
        self.batches.iter().flatten().copied().collect()
    }

    pub fn clear(&mut self) {
        self.batches.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(phase: f64, amplitude: f64) -> DecodedSample {
        DecodedSample {
            counters: vec![1],
            amplitudes: vec![amplitude],
            phases: vec![phase],
        }
    }

    #[test]
    fn summary_of_sample() {
        let s = DecodedSample {
            counters: vec![3, 0, 5],
            amplitudes: vec![12.34, 0.0, 45.6],
            phases: vec![0.0, 90.0, 180.0],
        };

        assert_eq!(
            Aggregator::default().ingest(&s),
            Summary {
                total_count: 8,
                max_amplitude: 45.6
            }
        );
    }

    #[test]
    fn summary_of_empty_sample() {
        assert_eq!(Summary::of(&DecodedSample::default()), Summary::default());
    }

    #[test]
    fn max_amplitude_with_negative_values() {
        let s = DecodedSample {
            counters: vec![],
            amplitudes: vec![-3.5, -1.25],
            phases: vec![],
        };
        assert_eq!(Summary::of(&s).max_amplitude, -1.25);
    }

    #[test]
    fn counters_sum_without_overflow() {
        let s = DecodedSample {
            counters: vec![u16::MAX; 50],
            amplitudes: vec![],
            phases: vec![],
        };
        assert_eq!(Summary::of(&s).total_count, 50 * 65535);
    }

    #[test]
    fn fifo_keeps_five_latest_polls() {
        let mut aggregator = Aggregator::new(true, 5);

        for i in 0..6 {
            aggregator.ingest(&sample(i as f64, 10.0 + i as f64));
        }

        let points = aggregator.points();
        assert_eq!(aggregator.batches(), 5);
        assert!(!points.contains(&(0.0, 10.0)));
        assert_eq!(
            points,
            vec![(1.0, 11.0), (2.0, 12.0), (3.0, 13.0), (4.0, 14.0), (5.0, 15.0)]
        );
    }

    #[test]
    fn empty_poll_does_not_take_a_slot() {
        let mut aggregator = Aggregator::new(true, 5);
        for i in 0..5 {
            aggregator.ingest(&sample(i as f64, i as f64));
        }

        let counters_only = DecodedSample {
            counters: vec![4, 2],
            amplitudes: vec![],
            phases: vec![],
        };
        let summary = aggregator.ingest(&counters_only);

        assert_eq!(summary.total_count, 6);
        assert_eq!(aggregator.batches(), 5);
        assert_eq!(
            aggregator.points(),
            vec![(0.0, 0.0), (1.0, 1.0), (2.0, 2.0), (3.0, 3.0), (4.0, 4.0)]
        );
    }

    #[test]
    fn empty_poll_keeps_latest_view_without_accumulation() {
        let mut aggregator = Aggregator::new(false, 5);
        aggregator.ingest(&sample(7.0, 7.0));
        aggregator.ingest(&DecodedSample::default());

        assert_eq!(aggregator.points(), vec![(7.0, 7.0)]);
    }

    #[test]
    fn eviction_unit_is_a_whole_poll() {
        let mut aggregator = Aggregator::new(true, 2);
        let wide = DecodedSample {
            counters: vec![1, 1, 1],
            amplitudes: vec![1.0, 2.0, 3.0],
            phases: vec![10.0, 20.0, 30.0],
        };

        aggregator.ingest(&wide);
        aggregator.ingest(&sample(40.0, 4.0));
        assert_eq!(aggregator.points().len(), 4);

        aggregator.ingest(&sample(50.0, 5.0));
        assert_eq!(aggregator.points(), vec![(40.0, 4.0), (50.0, 5.0)]);
    }

    #[test]
    fn without_accumulation_only_latest_poll_is_shown() {
        let mut aggregator = Aggregator::new(false, 5);

        aggregator.ingest(&sample(1.0, 1.0));
        aggregator.ingest(&sample(2.0, 2.0));

        assert_eq!(aggregator.points(), vec![(2.0, 2.0)]);
    }

    #[test]
    fn switching_accumulation_off_drops_history() {
        let mut aggregator = Aggregator::new(true, 5);
        aggregator.ingest(&sample(1.0, 1.0));
        aggregator.ingest(&sample(2.0, 2.0));

        aggregator.set_accumulate(false);
        aggregator.ingest(&sample(3.0, 3.0));

        assert_eq!(aggregator.batches(), 1);
        assert_eq!(aggregator.points(), vec![(3.0, 3.0)]);
    }
}
