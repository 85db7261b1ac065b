use std::str::FromStr;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tracing::warn;
use crate::engine::EngineOpts;
use crate::provider::SyntheticSeriesConfig;

pub const DEFAULT_QUERY: &str = "rate(bar[1m])";

/// Length of the evaluated window, ending at the aligned current time.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Default step used if not set.
pub const DEFAULT_STEP: Duration = Duration::from_secs(15);

/// The end of the window is truncated to a multiple of this.
pub const DEFAULT_ALIGNMENT: Duration = Duration::from_secs(30);

pub const ENV_QUERY: &str = "PROMQL_SYNTH_QUERY";
pub const ENV_WINDOW_SECS: &str = "PROMQL_SYNTH_WINDOW_SECS";
pub const ENV_STEP_SECS: &str = "PROMQL_SYNTH_STEP_SECS";
pub const ENV_MAX_SAMPLES: &str = "PROMQL_SYNTH_MAX_SAMPLES";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub engine: EngineOpts,
    pub query: String,
    pub window: Duration,
    pub step: Duration,
    pub alignment: Duration,
    pub series: SyntheticSeriesConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            engine: EngineOpts::default(),
            query: DEFAULT_QUERY.to_string(),
            window: DEFAULT_WINDOW,
            step: DEFAULT_STEP,
            alignment: DEFAULT_ALIGNMENT,
            series: SyntheticSeriesConfig::default(),
        }
    }
}

impl Settings {
    /// Defaults overridden by any `PROMQL_SYNTH_*` variables set in the environment.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    pub fn with_overrides<F>(mut self, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(query) = get_setting_from_env::<String, _>(&env, ENV_QUERY) {
            self.query = query;
        }
        if let Some(secs) = get_setting_from_env::<u64, _>(&env, ENV_WINDOW_SECS) {
            self.window = Duration::from_secs(secs);
        }
        if let Some(secs) = get_setting_from_env::<u64, _>(&env, ENV_STEP_SECS) {
            self.step = Duration::from_secs(secs);
        }
        if let Some(max_samples) = get_setting_from_env::<usize, _>(&env, ENV_MAX_SAMPLES) {
            self.engine.max_samples = max_samples;
            self.series.max_samples = max_samples;
        }
        self
    }
}

fn get_setting_from_env<T, F>(env: &F, name: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = env(name)?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("ignoring invalid value {raw:?} for {name}");
            None
        }
    }
}
