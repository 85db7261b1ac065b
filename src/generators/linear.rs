use crate::common::{Sample, Timestamp};

pub const DEFAULT_SAMPLE_STEP_MS: i64 = 30_000;
pub const DEFAULT_SAMPLE_DELTA: f64 = 5.0;

/// Number of samples a [`LinearGenerator`] yields over `[start, end]`.
pub fn linear_sample_count(start: Timestamp, end: Timestamp, step: i64) -> u64 {
    if step <= 0 || end < start {
        return 0;
    }
    let span = (end as i128 - start as i128) / step as i128;
    u64::try_from(span + 1).unwrap_or(u64::MAX)
}

/// Generates samples every `step` ms over `[start, end]`, with values
/// `0, delta, 2 * delta, ...`.
///
/// A linear signal gives `rate()` a closed form answer of `delta / step`.
#[derive(Debug, Clone)]
pub struct LinearGenerator {
    next_ts: Timestamp,
    end: Timestamp,
    step: i64,
    index: u64,
    delta: f64,
}

impl LinearGenerator {
    pub fn new(start: Timestamp, end: Timestamp, step: i64, delta: f64) -> Self {
        Self {
            next_ts: start,
            end,
            step,
            index: 0,
            delta,
        }
    }
}

impl Iterator for LinearGenerator {
    type Item = Sample;

    fn next(&mut self) -> Option<Self::Item> {
        if self.step <= 0 || self.next_ts > self.end {
            return None;
        }
        let sample = Sample::new(self.next_ts, self.index as f64 * self.delta);
        self.index += 1;
        match self.next_ts.checked_add(self.step) {
            Some(ts) => self.next_ts = ts,
            // park past the end
            None => self.step = 0,
        }
        Some(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn end_is_inclusive() {
        let samples: Vec<_> = LinearGenerator::new(0, 90_000, 30_000, 5.0).collect();
        assert_eq!(
            samples,
            vec![
                Sample::new(0, 0.0),
                Sample::new(30_000, 5.0),
                Sample::new(60_000, 10.0),
                Sample::new(90_000, 15.0),
            ]
        );
    }

    #[test]
    fn empty_when_start_after_end() {
        assert_eq!(LinearGenerator::new(10, 0, 30_000, 5.0).count(), 0);
    }

    #[test]
    fn non_positive_step_yields_nothing() {
        assert_eq!(LinearGenerator::new(0, 100, 0, 5.0).count(), 0);
        assert_eq!(LinearGenerator::new(0, 100, -5, 5.0).count(), 0);
    }

    #[test]
    fn stops_at_timestamp_overflow() {
        let samples: Vec<_> = LinearGenerator::new(i64::MAX - 10, i64::MAX, 30, 1.0).collect();
        assert_eq!(samples.len(), 1);
    }

    #[test]
    fn generation_is_monotonic_and_linear() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..200 {
            let start: i64 = rng.gen_range(-1_000_000_000..1_000_000_000);
            let end = start + rng.gen_range(-10_000..5_000_000);
            let step: i64 = rng.gen_range(1..120_000);
            let delta: f64 = rng.gen_range(0.5..10.0);

            let samples: Vec<_> = LinearGenerator::new(start, end, step, delta).collect();
            let expected_len = if end < start { 0 } else { ((end - start) / step + 1) as usize };
            assert_eq!(samples.len(), expected_len);

            for (i, sample) in samples.iter().enumerate() {
                assert_eq!(sample.timestamp, start + i as i64 * step);
                assert!(sample.timestamp <= end);
                assert_eq!(sample.value, i as f64 * delta);
            }
            assert!(samples.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        }
    }
}
