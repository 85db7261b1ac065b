mod registry;

use std::sync::Arc;
use std::time::Duration;
use ::rand::prelude::*;
use crate::common::{truncate_millis, Context, Timestamp};
use crate::engine::{Engine, EngineOpts, FunctionRegistry, Matrix};
use crate::error::QueryResult;
use crate::storage::Queryable;

pub const MINUTE: i64 = 60_000;

/// An arbitrary "now" already aligned to the 30s sample grid.
pub fn aligned_now() -> Timestamp {
    truncate_millis(1_700_000_123_456, 30_000)
}

pub fn create_rng(seed: Option<u64>) -> Result<StdRng, String> {
    if let Some(seed) = seed {
        Ok(StdRng::seed_from_u64(seed))
    } else {
        match StdRng::from_rng(thread_rng()) {
            Err(e) => Err(format!("Error constructing rng {:?}", e)),
            Ok(rng) => Ok(rng),
        }
    }
}

pub fn extended_registry() -> Arc<FunctionRegistry> {
    let registry = FunctionRegistry::with_builtins();
    registry.extend_range_function_signatures();
    Arc::new(registry)
}

pub fn run_range_query(
    queryable: Arc<dyn Queryable>,
    registry: Arc<FunctionRegistry>,
    qs: &str,
    start: Timestamp,
    end: Timestamp,
    step: Duration,
) -> QueryResult<Matrix> {
    Engine::with_registry(EngineOpts::default(), registry)
        .new_range_query(queryable, qs, start, end, step)?
        .exec(&Context::background())
        .matrix()
}
