use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use crate::common::{format_timestamp, matches_labels, Context, Labels, Matcher, Timestamp};
use crate::error::{StorageError, StorageResult};
use crate::generators::{
    linear_sample_count, LinearGenerator, DEFAULT_SAMPLE_DELTA, DEFAULT_SAMPLE_STEP_MS,
};
use crate::storage::{
    LabelQuerier, Querier, Queryable, SelectHints, Series, SeriesSet, VecSeries, VecSeriesSet,
    Warnings,
};

pub const DEFAULT_MAX_GENERATED_SAMPLES: usize = 1_000_000;

/// Shape of the synthetic series served by [`SyntheticQueryable`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticSeriesConfig {
    pub metric_name: String,
    pub step_ms: i64,
    pub delta: f64,
    /// Selections that would generate more samples than this fail without generating any.
    pub max_samples: usize,
}

impl Default for SyntheticSeriesConfig {
    fn default() -> Self {
        Self {
            metric_name: "bar".to_string(),
            step_ms: DEFAULT_SAMPLE_STEP_MS,
            delta: DEFAULT_SAMPLE_DELTA,
            max_samples: DEFAULT_MAX_GENERATED_SAMPLES,
        }
    }
}

/// A stateless factory of [`SyntheticQuerier`]s.
#[derive(Debug, Clone, Default)]
pub struct SyntheticQueryable {
    config: SyntheticSeriesConfig,
}

impl SyntheticQueryable {
    pub fn new(config: SyntheticSeriesConfig) -> Self {
        Self { config }
    }
}

impl Queryable for SyntheticQueryable {
    fn querier(&self, ctx: &Context, mint: Timestamp, maxt: Timestamp) -> StorageResult<Box<dyn Querier>> {
        debug!(mint, maxt, "opening synthetic querier");
        Ok(Box::new(SyntheticQuerier::new(ctx.clone(), self.config.clone())))
    }
}

/// Serves one generated series per select, covering exactly the hinted window.
pub struct SyntheticQuerier {
    ctx: Context,
    config: SyntheticSeriesConfig,
    closed: bool,
}

impl SyntheticQuerier {
    pub fn new(ctx: Context, config: SyntheticSeriesConfig) -> Self {
        Self {
            ctx,
            config,
            closed: false,
        }
    }

    fn generate(&self, hints: &SelectHints) -> VecSeries {
        let samples: Vec<_> =
            LinearGenerator::new(hints.start, hints.end, self.config.step_ms, self.config.delta).collect();

        info!("---Input:");
        for sample in samples.iter() {
            info!("{} => {}", format_timestamp(sample.timestamp), sample.value);
        }

        VecSeries::new(Labels::from_metric_name(&self.config.metric_name), samples)
    }
}

impl LabelQuerier for SyntheticQuerier {
    fn label_values(&self, _name: &str, _matchers: &[Matcher]) -> StorageResult<(Vec<String>, Warnings)> {
        Err(StorageError::Unsupported("label_values"))
    }

    fn label_names(&self, _matchers: &[Matcher]) -> StorageResult<(Vec<String>, Warnings)> {
        Err(StorageError::Unsupported("label_names"))
    }

    fn close(&mut self) -> StorageResult<()> {
        if !self.closed {
            debug!("closing synthetic querier");
            self.closed = true;
        }
        Ok(())
    }
}

impl Querier for SyntheticQuerier {
    fn select(&self, sort_series: bool, hints: &SelectHints, matchers: &[Matcher]) -> Box<dyn SeriesSet> {
        if self.closed {
            return Box::new(VecSeriesSet::with_error(StorageError::Closed));
        }
        if let Some(err) = self.ctx.err() {
            return Box::new(VecSeriesSet::with_error(err.into()));
        }
        debug!(start = hints.start, end = hints.end, func = ?hints.func, "select");

        let requested = linear_sample_count(hints.start, hints.end, self.config.step_ms);
        if requested > self.config.max_samples as u64 {
            return Box::new(VecSeriesSet::with_error(StorageError::TooManySamples {
                requested,
                limit: self.config.max_samples,
            }));
        }

        let series = self.generate(hints);
        let mut warnings = Warnings::new();
        if hints.range > 0 && hints.range < self.config.step_ms {
            let msg = format!(
                "range {}ms is shorter than the sample interval {}ms of {}",
                hints.range, self.config.step_ms, self.config.metric_name
            );
            warn!("{msg}");
            warnings.push(msg);
        }

        let selected: Vec<Box<dyn Series>> = if matches_labels(series.labels(), matchers) {
            vec![Box::new(series)]
        } else {
            Vec::new()
        };
        let mut set = VecSeriesSet::new(selected).with_warnings(warnings);
        if sort_series {
            set.sort();
        }
        Box::new(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{MatchOp, Sample, METRIC_NAME_LABEL};
    use crate::storage::collect_samples;

    fn hints(start: Timestamp, end: Timestamp) -> SelectHints {
        SelectHints {
            start,
            end,
            ..Default::default()
        }
    }

    fn open() -> Box<dyn Querier> {
        SyntheticQueryable::default()
            .querier(&Context::background(), 0, 0)
            .unwrap()
    }

    #[test]
    fn select_generates_linear_series_over_hinted_window() {
        let querier = open();
        let matchers = [Matcher::equal(METRIC_NAME_LABEL, "bar")];
        let mut set = querier.select(false, &hints(60_000, 150_000), &matchers);

        assert!(set.next());
        let series = set.at().unwrap();
        assert_eq!(series.labels(), &Labels::from_metric_name("bar"));
        let samples = collect_samples(series.iterator().as_mut()).unwrap();
        assert_eq!(
            samples,
            vec![
                Sample::new(60_000, 0.0),
                Sample::new(90_000, 5.0),
                Sample::new(120_000, 10.0),
                Sample::new(150_000, 15.0),
            ]
        );
        assert!(!set.next());
        assert!(set.err().is_none());
    }

    #[test]
    fn non_matching_selector_selects_nothing() {
        let querier = open();
        let matchers = [Matcher::equal(METRIC_NAME_LABEL, "foo")];
        let mut set = querier.select(true, &hints(0, 60_000), &matchers);
        assert!(!set.next());
        assert!(set.err().is_none());

        let regex = [Matcher::new(MatchOp::RegexEqual, METRIC_NAME_LABEL, "b.*").unwrap()];
        let mut set = querier.select(true, &hints(0, 60_000), &regex);
        assert!(set.next());
    }

    #[test]
    fn label_queries_are_unsupported() {
        let querier = open();
        assert_eq!(
            querier.label_names(&[]),
            Err(StorageError::Unsupported("label_names"))
        );
        assert_eq!(
            querier.label_values("job", &[]),
            Err(StorageError::Unsupported("label_values"))
        );
    }

    #[test]
    fn close_is_idempotent() {
        let mut querier = open();
        assert!(querier.close().is_ok());
        assert!(querier.close().is_ok());

        let mut set = querier.select(false, &hints(0, 60_000), &[]);
        assert!(!set.next());
        assert_eq!(set.err(), Some(&StorageError::Closed));
    }

    #[test]
    fn canceled_context_surfaces_through_err() {
        let ctx = Context::background();
        let querier = SyntheticQueryable::default().querier(&ctx, 0, 0).unwrap();
        ctx.cancel();
        let mut set = querier.select(false, &hints(0, 60_000), &[]);
        assert!(!set.next());
        assert!(matches!(set.err(), Some(StorageError::Context(_))));
    }

    #[test]
    fn oversized_window_is_refused_without_generating() {
        let querier = SyntheticQueryable::new(SyntheticSeriesConfig {
            max_samples: 4,
            ..Default::default()
        })
        .querier(&Context::background(), 0, 0)
        .unwrap();

        let mut set = querier.select(false, &hints(0, 90_000), &[]);
        assert!(set.next());

        let mut set = querier.select(false, &hints(0, 120_000), &[]);
        assert!(!set.next());
        assert_eq!(
            set.err(),
            Some(&StorageError::TooManySamples {
                requested: 5,
                limit: 4
            })
        );
    }

    #[test]
    fn range_shorter_than_sample_interval_warns() {
        let querier = open();
        let short = SelectHints {
            range: 10_000,
            ..hints(0, 60_000)
        };
        let set = querier.select(false, &short, &[]);
        assert_eq!(set.warnings().len(), 1);
        assert!(set.warnings()[0].contains("10000ms"), "{:?}", set.warnings());

        let covering = SelectHints {
            range: 60_000,
            ..hints(0, 60_000)
        };
        assert!(querier.select(false, &covering, &[]).warnings().is_empty());
    }

    #[test]
    fn select_does_not_mutate_inputs() {
        let querier = open();
        let h = hints(0, 90_000);
        let before = h.clone();
        let matchers = vec![Matcher::equal(METRIC_NAME_LABEL, "bar")];
        let _ = querier.select(true, &h, &matchers);
        assert_eq!(h, before);
        assert_eq!(matchers, vec![Matcher::equal(METRIC_NAME_LABEL, "bar")]);
    }
}
