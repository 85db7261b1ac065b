use std::cell::Cell;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use crate::common::{duration_to_millis, Context, Labels, Sample, Timestamp, METRIC_NAME_LABEL};
use crate::engine::ast::{AtModifier, Expr, VectorSelector};
use crate::engine::functions::{global_registry, FunctionRegistry, ValueType};
use crate::engine::parser::{parse_expr, ParseOptions};
use crate::engine::rollup::eval_range_function;
use crate::error::{QueryError, QueryResult};
use crate::storage::{collect_samples, Queryable, SelectHints, Warnings};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineOpts {
    /// Upper bound on samples loaded by a query, and on samples touched by a single step.
    pub max_samples: usize,
    pub timeout: Duration,
    /// How far back an instant selector looks for the latest sample.
    pub lookback_delta: Duration,
    pub enable_at_modifier: bool,
    pub enable_negative_offset: bool,
}

impl Default for EngineOpts {
    fn default() -> Self {
        Self {
            max_samples: 1_000_000,
            timeout: Duration::from_secs(5 * 60),
            lookback_delta: Duration::from_secs(5 * 60),
            enable_at_modifier: true,
            enable_negative_offset: true,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub t: Timestamp,
    pub v: f64,
}

impl Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} @{}", self.v, self.t)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeSeries {
    pub metric: Labels,
    pub points: Vec<Point>,
}

/// Result of a range query, one entry per output series sorted by labels.
pub type Matrix = Vec<RangeSeries>;

#[derive(Debug)]
pub struct QueryOutcome {
    pub value: QueryResult<Matrix>,
    pub warnings: Warnings,
}

impl QueryOutcome {
    pub fn matrix(self) -> QueryResult<Matrix> {
        self.value
    }
}

pub struct Engine {
    opts: EngineOpts,
    registry: Arc<FunctionRegistry>,
}

impl Engine {
    /// Creates an engine resolving functions through [`global_registry`].
    pub fn new(opts: EngineOpts) -> Self {
        Self::with_registry(opts, global_registry())
    }

    pub fn with_registry(opts: EngineOpts, registry: Arc<FunctionRegistry>) -> Self {
        Self { opts, registry }
    }

    /// Parses `qs` and prepares it for evaluation at every `step` in `[start, end]`.
    pub fn new_range_query(
        &self,
        queryable: Arc<dyn Queryable>,
        qs: &str,
        start: Timestamp,
        end: Timestamp,
        step: Duration,
    ) -> QueryResult<RangeQuery> {
        let step_ms = duration_to_millis(step);
        if step_ms <= 0 {
            return Err(QueryError::InvalidQuery(
                "zero or negative query resolution step widths are not accepted".to_string(),
            ));
        }
        if end < start {
            return Err(QueryError::InvalidQuery(
                "end timestamp must not be before start time".to_string(),
            ));
        }

        let parse_opts = ParseOptions {
            enable_at_modifier: self.opts.enable_at_modifier,
            enable_negative_offset: self.opts.enable_negative_offset,
        };
        let expr = parse_expr(qs, &self.registry, parse_opts)?;
        match expr.value_type() {
            ValueType::Scalar | ValueType::Vector => {}
            other => {
                return Err(QueryError::InvalidQuery(format!(
                    "invalid expression type {other:?} for range query, must be Scalar or instant Vector"
                )));
            }
        }
        debug!(query = %expr, start, end, step_ms, "prepared range query");

        Ok(RangeQuery {
            queryable,
            expr,
            start,
            end,
            step: step_ms,
            opts: self.opts.clone(),
        })
    }
}

pub struct RangeQuery {
    queryable: Arc<dyn Queryable>,
    expr: Expr,
    start: Timestamp,
    end: Timestamp,
    step: i64,
    opts: EngineOpts,
}

impl RangeQuery {
    pub fn exec(&self, ctx: &Context) -> QueryOutcome {
        let ctx = ctx.with_timeout(self.opts.timeout);
        let mut warnings = Warnings::new();
        let value = self.exec_inner(&ctx, &mut warnings);
        QueryOutcome { value, warnings }
    }

    fn exec_inner(&self, ctx: &Context, warnings: &mut Warnings) -> QueryResult<Matrix> {
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }

        let mut selectors = Vec::new();
        let plan = self.plan(&self.expr, None, &mut selectors);
        let loaded = self.load(ctx, &selectors, warnings)?;

        let evaluator = Evaluator {
            selectors: &selectors,
            loaded: &loaded,
            start: self.start,
            end: self.end,
            lookback: duration_to_millis(self.opts.lookback_delta),
            max_samples: self.opts.max_samples,
            step_samples: Cell::new(0),
        };

        let mut output: AHashMap<u64, RangeSeries> = AHashMap::new();
        let mut t = self.start;
        while t <= self.end {
            if let Some(err) = ctx.err() {
                return Err(err.into());
            }
            evaluator.step_samples.set(0);

            let samples = match evaluator.eval(&plan, t)? {
                StepValue::Scalar(v) => vec![InstantSample {
                    labels: Labels::default(),
                    value: v,
                }],
                StepValue::Vector(samples) => samples,
                other => {
                    return Err(QueryError::UnexpectedValueType(other.type_name().to_string()));
                }
            };
            for sample in samples {
                let series = output
                    .entry(sample.labels.signature())
                    .or_insert_with(|| RangeSeries {
                        metric: sample.labels,
                        points: Vec::new(),
                    });
                if series.points.last().is_some_and(|p| p.t == t) {
                    return Err(QueryError::InvalidQuery(
                        "vector cannot contain metrics with the same labelset".to_string(),
                    ));
                }
                series.points.push(Point { t, v: sample.value });
            }

            t = match t.checked_add(self.step) {
                Some(next) => next,
                None => break,
            };
        }

        let mut matrix: Matrix = output.into_values().collect();
        matrix.sort_by(|a, b| a.metric.cmp(&b.metric));
        Ok(matrix)
    }

    /// Collects the selectors of `expr` with the time range each one needs.
    fn plan(&self, expr: &Expr, func: Option<&str>, selectors: &mut Vec<SelectorPlan>) -> Plan {
        match expr {
            Expr::Number(v) => Plan::Scalar(*v),
            Expr::String(_) => Plan::String,
            Expr::Paren(inner) => self.plan(inner, func, selectors),
            Expr::Neg(inner) => Plan::Neg(Box::new(self.plan(inner, func, selectors))),
            Expr::VectorSelector(sel) => {
                let lookback = duration_to_millis(self.opts.lookback_delta);
                selectors.push(self.selector_plan(sel, None, lookback, func));
                Plan::Selector(selectors.len() - 1)
            }
            Expr::MatrixSelector(m) => {
                selectors.push(self.selector_plan(&m.selector, Some(m.range), m.range, func));
                Plan::Selector(selectors.len() - 1)
            }
            Expr::Call(call) => {
                let name = call.func.name.as_str();
                let args = call
                    .args
                    .iter()
                    .map(|arg| self.plan(arg, Some(name), selectors))
                    .collect();
                Plan::Call {
                    name: name.to_string(),
                    args,
                }
            }
        }
    }

    fn selector_plan(
        &self,
        selector: &VectorSelector,
        range: Option<i64>,
        window: i64,
        func: Option<&str>,
    ) -> SelectorPlan {
        let (start, end) = match selector.at {
            Some(at) => {
                let ts = resolve_at(at, self.start, self.end);
                (ts, ts)
            }
            None => (self.start, self.end),
        };
        let hints = SelectHints {
            start: start.saturating_sub(selector.offset).saturating_sub(window),
            end: end.saturating_sub(selector.offset),
            step: self.step,
            func: func.map(str::to_string),
            range: range.unwrap_or_default(),
            ..Default::default()
        };
        SelectorPlan {
            selector: selector.clone(),
            range,
            hints,
        }
    }

    /// Opens a single querier over the union of all selector windows and drains every selection.
    fn load(
        &self,
        ctx: &Context,
        selectors: &[SelectorPlan],
        warnings: &mut Warnings,
    ) -> QueryResult<Vec<Vec<LoadedSeries>>> {
        if selectors.is_empty() {
            return Ok(Vec::new());
        }
        let mint = selectors.iter().map(|s| s.hints.start).min().unwrap_or(self.start);
        let maxt = selectors.iter().map(|s| s.hints.end).max().unwrap_or(self.end);

        let querier = self.queryable.querier(ctx, mint, maxt)?;
        let querier = scopeguard::guard(querier, |mut querier| {
            if let Err(err) = querier.close() {
                warn!("error closing querier: {err}");
            }
        });

        let mut total = 0usize;
        let mut loaded = Vec::with_capacity(selectors.len());
        for plan in selectors {
            let mut set = querier.select(true, &plan.hints, &plan.selector.matchers);
            let mut series_list = Vec::new();
            while set.next() {
                let Some(series) = set.at() else {
                    break;
                };
                let mut iter = series.iterator();
                let samples = collect_samples(iter.as_mut())?;
                total += samples.len();
                if total > self.opts.max_samples {
                    return Err(QueryError::TooManySamples(self.opts.max_samples));
                }
                series_list.push(LoadedSeries {
                    labels: series.labels().clone(),
                    samples,
                });
            }
            if let Some(err) = set.err() {
                return Err(err.clone().into());
            }
            warnings.extend(set.warnings().iter().cloned());
            debug!(selector = %plan.selector, series = series_list.len(), "loaded selector");
            loaded.push(series_list);
        }
        Ok(loaded)
    }
}

fn resolve_at(at: AtModifier, start: Timestamp, end: Timestamp) -> Timestamp {
    match at {
        AtModifier::Timestamp(ts) => ts,
        AtModifier::Start => start,
        AtModifier::End => end,
    }
}

struct SelectorPlan {
    selector: VectorSelector,
    range: Option<i64>,
    hints: SelectHints,
}

struct LoadedSeries {
    labels: Labels,
    samples: Vec<Sample>,
}

enum Plan {
    Scalar(f64),
    String,
    Neg(Box<Plan>),
    Selector(usize),
    Call { name: String, args: Vec<Plan> },
}

struct InstantSample {
    labels: Labels,
    value: f64,
}

struct RangeWindow<'a> {
    labels: &'a Labels,
    samples: &'a [Sample],
    start: Timestamp,
    end: Timestamp,
}

enum StepValue<'a> {
    Scalar(f64),
    String,
    Vector(Vec<InstantSample>),
    Range(Vec<RangeWindow<'a>>),
}

impl StepValue<'_> {
    fn type_name(&self) -> &'static str {
        match self {
            StepValue::Scalar(_) => "scalar",
            StepValue::String => "string",
            StepValue::Vector(_) => "instant vector",
            StepValue::Range(_) => "range vector",
        }
    }
}

struct Evaluator<'a> {
    selectors: &'a [SelectorPlan],
    loaded: &'a [Vec<LoadedSeries>],
    start: Timestamp,
    end: Timestamp,
    lookback: i64,
    max_samples: usize,
    step_samples: Cell<usize>,
}

impl<'a> Evaluator<'a> {
    fn eval(&self, plan: &Plan, t: Timestamp) -> QueryResult<StepValue<'a>> {
        match plan {
            Plan::Scalar(v) => Ok(StepValue::Scalar(*v)),
            Plan::String => Ok(StepValue::String),
            Plan::Neg(inner) => match self.eval(inner, t)? {
                StepValue::Scalar(v) => Ok(StepValue::Scalar(-v)),
                StepValue::Vector(samples) => Ok(StepValue::Vector(
                    samples
                        .into_iter()
                        .map(|s| InstantSample {
                            labels: s.labels.without(METRIC_NAME_LABEL),
                            value: -s.value,
                        })
                        .collect(),
                )),
                other => Err(QueryError::UnexpectedValueType(other.type_name().to_string())),
            },
            Plan::Selector(idx) => self.eval_selector(*idx, t),
            Plan::Call { name, args } => self.eval_call(name, args, t),
        }
    }

    fn count_samples(&self, n: usize) -> QueryResult<()> {
        let total = self.step_samples.get() + n;
        self.step_samples.set(total);
        if total > self.max_samples {
            return Err(QueryError::TooManySamples(self.max_samples));
        }
        Ok(())
    }

    fn eval_selector(&self, idx: usize, t: Timestamp) -> QueryResult<StepValue<'a>> {
        let plan = &self.selectors[idx];
        let loaded: &'a [Vec<LoadedSeries>] = self.loaded;
        let series_list = &loaded[idx];
        let base = plan
            .selector
            .at
            .map_or(t, |at| resolve_at(at, self.start, self.end));
        let ts = base.saturating_sub(plan.selector.offset);

        match plan.range {
            Some(range) => {
                let start = ts.saturating_sub(range);
                let mut windows = Vec::with_capacity(series_list.len());
                for series in series_list {
                    let samples = &series.samples;
                    let lo = samples.partition_point(|s| s.timestamp < start);
                    let hi = samples.partition_point(|s| s.timestamp <= ts);
                    let window = &samples[lo..hi.max(lo)];
                    self.count_samples(window.len())?;
                    windows.push(RangeWindow {
                        labels: &series.labels,
                        samples: window,
                        start,
                        end: ts,
                    });
                }
                Ok(StepValue::Range(windows))
            }
            None => {
                let start = ts.saturating_sub(self.lookback);
                let mut result = Vec::new();
                for series in series_list {
                    let samples = &series.samples;
                    let hi = samples.partition_point(|s| s.timestamp <= ts);
                    let Some(latest) = hi.checked_sub(1).map(|i| samples[i]) else {
                        continue;
                    };
                    if latest.timestamp < start {
                        continue;
                    }
                    self.count_samples(1)?;
                    result.push(InstantSample {
                        labels: series.labels.clone(),
                        value: latest.value,
                    });
                }
                Ok(StepValue::Vector(result))
            }
        }
    }

    fn eval_call(&self, name: &str, args: &[Plan], t: Timestamp) -> QueryResult<StepValue<'a>> {
        match name {
            "time" => Ok(StepValue::Scalar(t as f64 / 1000.0)),
            "abs" => {
                let Some(arg) = args.first() else {
                    return Err(QueryError::InvalidArgs("abs expects 1 argument".to_string()));
                };
                match self.eval(arg, t)? {
                    StepValue::Vector(samples) => Ok(StepValue::Vector(
                        samples
                            .into_iter()
                            .map(|s| InstantSample {
                                labels: s.labels.without(METRIC_NAME_LABEL),
                                value: s.value.abs(),
                            })
                            .collect(),
                    )),
                    other => Err(QueryError::UnexpectedValueType(other.type_name().to_string())),
                }
            }
            _ => self.eval_range_call(name, args, t),
        }
    }

    fn eval_range_call(&self, name: &str, args: &[Plan], t: Timestamp) -> QueryResult<StepValue<'a>> {
        let mut windows = None;
        let mut params = Vec::new();
        for arg in args {
            match self.eval(arg, t)? {
                StepValue::Scalar(v) => params.push(v),
                StepValue::Range(w) => windows = Some(w),
                // trailing string arguments carry no meaning for evaluation
                StepValue::String => {}
                other => {
                    return Err(QueryError::UnexpectedValueType(format!(
                        "{} in call to function {name:?}",
                        other.type_name()
                    )));
                }
            }
        }
        let Some(windows) = windows else {
            return Err(QueryError::InvalidArgs(format!(
                "function {name:?} expects a range vector argument"
            )));
        };

        let mut result = Vec::with_capacity(windows.len());
        for window in windows {
            let value = eval_range_function(name, window.samples, window.start, window.end, t, &params)?;
            if let Some(value) = value {
                result.push(InstantSample {
                    labels: window.labels.without(METRIC_NAME_LABEL),
                    value,
                });
            }
        }
        Ok(StepValue::Vector(result))
    }
}
