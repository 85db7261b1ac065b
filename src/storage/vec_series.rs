use std::sync::Arc;
use crate::common::{Labels, Sample};
use crate::error::StorageError;
use crate::iter::VecSampleIterator;
use crate::storage::{SampleIterator, Series, SeriesSet, Warnings};

/// An in-memory series. Samples are kept in a shared buffer so every iterator
/// reads the same immutable data.
#[derive(Debug, Clone)]
pub struct VecSeries {
    labels: Labels,
    samples: Arc<[Sample]>,
}

impl VecSeries {
    /// `samples` must be ordered by timestamp.
    pub fn new(labels: Labels, samples: Vec<Sample>) -> Self {
        debug_assert!(samples.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        Self {
            labels,
            samples: samples.into(),
        }
    }
}

impl Series for VecSeries {
    fn labels(&self) -> &Labels {
        &self.labels
    }

    fn iterator(&self) -> Box<dyn SampleIterator> {
        Box::new(VecSampleIterator::new(Arc::clone(&self.samples)))
    }
}

/// A single-pass cursor over an owned list of series.
pub struct VecSeriesSet {
    series: Vec<Box<dyn Series>>,
    // 0 is before the first element, len + 1 is exhausted
    pos: usize,
    err: Option<StorageError>,
    warnings: Warnings,
}

impl VecSeriesSet {
    pub fn new(series: Vec<Box<dyn Series>>) -> Self {
        Self {
            series,
            pos: 0,
            err: None,
            warnings: Warnings::new(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// An empty set that reports `err` once drained.
    pub fn with_error(err: StorageError) -> Self {
        let mut set = Self::empty();
        set.err = Some(err);
        set
    }

    pub fn with_warnings(mut self, warnings: Warnings) -> Self {
        self.warnings = warnings;
        self
    }

    /// Sorts the series not yet yielded by label set. The current series keeps its place.
    pub fn sort(&mut self) {
        let from = self.pos.min(self.series.len());
        self.series[from..].sort_by(|a, b| a.labels().cmp(b.labels()));
    }
}

impl SeriesSet for VecSeriesSet {
    fn next(&mut self) -> bool {
        if self.pos <= self.series.len() {
            self.pos += 1;
        }
        self.pos <= self.series.len()
    }

    fn at(&self) -> Option<&dyn Series> {
        if self.pos == 0 {
            return None;
        }
        self.series.get(self.pos - 1).map(|s| &**s)
    }

    fn err(&self) -> Option<&StorageError> {
        self.err.as_ref()
    }

    fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::collect_samples;

    fn series(name: &str, n: usize) -> Box<dyn Series> {
        let samples = (0..n).map(|i| Sample::new(i as i64 * 1000, i as f64)).collect();
        Box::new(VecSeries::new(Labels::from_metric_name(name), samples))
    }

    #[test]
    fn yields_every_series_once_in_order() {
        let mut set = VecSeriesSet::new(vec![series("c", 1), series("a", 2), series("b", 3)]);
        assert!(set.at().is_none());

        let mut names = Vec::new();
        while set.next() {
            let current = set.at().expect("positioned");
            names.push(current.labels().metric_name().unwrap_or_default().to_string());
        }
        assert_eq!(names, vec!["c", "a", "b"]);

        for _ in 0..5 {
            assert!(!set.next());
            assert!(set.at().is_none());
        }
        assert!(set.err().is_none());
        assert!(set.warnings().is_empty());
    }

    #[test]
    fn sort_orders_by_labels() {
        let mut set = VecSeriesSet::new(vec![series("c", 1), series("a", 1), series("b", 1)]);
        set.sort();
        let mut names = Vec::new();
        while set.next() {
            names.push(set.at().unwrap().labels().to_string());
        }
        assert_eq!(
            names,
            vec![r#"{__name__="a"}"#, r#"{__name__="b"}"#, r#"{__name__="c"}"#]
        );
    }

    #[test]
    fn sort_leaves_yielded_series_in_place() {
        let mut set = VecSeriesSet::new(vec![series("d", 1), series("c", 1), series("a", 1), series("b", 1)]);
        assert!(set.next());
        set.sort();
        assert_eq!(set.at().unwrap().labels().metric_name(), Some("d"));

        let mut names = Vec::new();
        while set.next() {
            names.push(set.at().unwrap().labels().metric_name().unwrap().to_string());
        }
        assert_eq!(names, vec!["a", "b", "c"]);

        // sorting a drained set is a no-op
        set.sort();
        assert!(!set.next());
    }

    #[test]
    fn warnings_are_carried_by_the_set() {
        let mut set = VecSeriesSet::new(vec![series("bar", 1)])
            .with_warnings(vec!["partial data".to_string()]);
        while set.next() {}
        assert_eq!(set.warnings(), ["partial data".to_string()]);
    }

    #[test]
    fn series_iterators_are_fresh_and_independent() {
        let s = series("bar", 3);
        let mut first = s.iterator();
        assert!(first.next());
        assert!(first.next());

        let mut second = s.iterator();
        assert!(second.next());
        assert_eq!(second.at().map(|x| x.timestamp), Some(0));
        assert_eq!(first.at().map(|x| x.timestamp), Some(1000));

        let all = collect_samples(second.as_mut()).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn error_set_is_empty_and_reports_error() {
        let mut set = VecSeriesSet::with_error(StorageError::Closed);
        assert!(!set.next());
        assert_eq!(set.err(), Some(&StorageError::Closed));
    }
}
