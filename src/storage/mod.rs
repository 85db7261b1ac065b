//! Data access contract between the query engine and a series source.
//!
//! The engine asks a [`Queryable`] for a [`Querier`] bound to a request context,
//! calls [`Querier::select`] once per selector, drains the returned [`SeriesSet`]
//! and the [`SampleIterator`] of every [`Series`] in it, then closes the querier.
//! Queriers, series sets and iterators are scoped to a single query and are not
//! shared between concurrent queries.

mod vec_series;

use crate::common::{Context, Labels, Matcher, Sample, Timestamp};
use crate::error::{StorageError, StorageResult};

pub use vec_series::*;

/// Non-fatal notes attached to a selection.
pub type Warnings = Vec<String>;

/// SelectHints specifies hints passed for data selections.
/// This is used only as an option for implementation to use.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SelectHints {
    /// start time in milliseconds for this select.
    pub start: Timestamp,
    /// end time in milliseconds for this select.
    pub end: Timestamp,
    /// Query step size in milliseconds.
    pub step: i64,
    /// Name of the surrounding function, if any.
    pub func: Option<String>,
    /// List of label names used in aggregation.
    pub grouping: Vec<String>,
    /// Indicate whether it is without or by.
    pub by: bool,
    /// Range vector selector range in milliseconds.
    pub range: i64,
}

/// A Queryable handles queries against a storage.
pub trait Queryable: Send + Sync {
    /// Returns a new Querier on the storage. `mint`/`maxt` are advisory; exact
    /// bounds arrive per call through [`SelectHints`].
    fn querier(&self, ctx: &Context, mint: Timestamp, maxt: Timestamp) -> StorageResult<Box<dyn Querier>>;
}

/// LabelQuerier provides querying access over labels.
pub trait LabelQuerier {
    /// Returns all potential values for a label name, reduced to series matching `matchers`.
    fn label_values(&self, name: &str, matchers: &[Matcher]) -> StorageResult<(Vec<String>, Warnings)>;

    /// Returns all the unique label names in sorted order, reduced to series matching `matchers`.
    fn label_names(&self, matchers: &[Matcher]) -> StorageResult<(Vec<String>, Warnings)>;

    /// Releases the resources of the Querier. Calling it more than once is a no-op.
    fn close(&mut self) -> StorageResult<()>;
}

/// Querier provides querying access over time series data of a fixed time range.
pub trait Querier: LabelQuerier {
    /// Returns a set of series that matches the given label matchers. When `sort_series`
    /// is set the set is returned in label order.
    fn select(&self, sort_series: bool, hints: &SelectHints, matchers: &[Matcher]) -> Box<dyn SeriesSet>;
}

/// A labeled sequence of samples.
pub trait Series {
    fn labels(&self) -> &Labels;

    /// Returns a new iterator positioned before the first sample. Iterators
    /// obtained from the same series do not interfere with one another.
    fn iterator(&self) -> Box<dyn SampleIterator>;
}

/// A single-pass cursor over a fixed collection of series.
pub trait SeriesSet {
    /// Advances to the next series, returning false once the set is exhausted.
    fn next(&mut self) -> bool;

    /// The current series. `None` before the first `next()` and after exhaustion.
    fn at(&self) -> Option<&dyn Series>;

    /// The error that stopped iteration, if any.
    fn err(&self) -> Option<&StorageError>;

    fn warnings(&self) -> &[String];
}

/// A forward-only cursor over the samples of a series.
pub trait SampleIterator {
    /// Advances by one sample, returning true if a sample is available.
    fn next(&mut self) -> bool;

    /// Advances to the first sample with a timestamp `>= t`. Never moves backwards:
    /// if the current sample already satisfies the bound the cursor stays put.
    fn seek(&mut self, t: Timestamp) -> bool;

    /// The current sample. `None` unless the last `next()`/`seek()` returned true.
    fn at(&self) -> Option<Sample>;

    fn err(&self) -> Option<&StorageError>;
}

/// Drains an iterator into a vector, surfacing a deferred iterator error.
pub fn collect_samples(iter: &mut dyn SampleIterator) -> StorageResult<Vec<Sample>> {
    let mut samples = Vec::new();
    while iter.next() {
        if let Some(sample) = iter.at() {
            samples.push(sample);
        }
    }
    match iter.err() {
        Some(err) => Err(err.clone()),
        None => Ok(samples),
    }
}
