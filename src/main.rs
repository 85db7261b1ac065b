use std::sync::Arc;
use anyhow::{anyhow, Context as _};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use promql_synth::common::{current_time_millis, duration_to_millis, format_timestamp, truncate_millis, Context};
use promql_synth::config::Settings;
use promql_synth::engine::{global_registry, Engine};
use promql_synth::provider::SyntheticQueryable;

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // must run before the engine sees any query
    global_registry().extend_range_function_signatures();

    let settings = Settings::from_env();
    let engine = Engine::new(settings.engine.clone());
    let queryable = Arc::new(SyntheticQueryable::new(settings.series.clone()));

    let end = truncate_millis(current_time_millis(), duration_to_millis(settings.alignment));
    let start = end - duration_to_millis(settings.window);

    let query = engine
        .new_range_query(queryable, &settings.query, start, end, settings.step)
        .with_context(|| format!("invalid query {:?}", settings.query))?;
    let outcome = query.exec(&Context::background());
    for warning in outcome.warnings.iter() {
        warn!("{warning}");
    }
    let matrix = outcome.matrix().context("query execution failed")?;

    let series = matrix
        .first()
        .ok_or_else(|| anyhow!("query {:?} returned no series", settings.query))?;

    info!("---Output");
    info!("{}", series.metric);
    for point in series.points.iter() {
        info!("{} => {}", format_timestamp(point.t), point.v);
    }
    Ok(())
}
