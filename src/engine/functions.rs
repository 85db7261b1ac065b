use std::fmt::Display;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};
use ahash::AHashMap;
use tracing::{debug, info};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ValueType {
    None,
    Scalar,
    Vector,
    Matrix,
    String,
}

impl Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ValueType::None => "none",
            ValueType::Scalar => "scalar",
            ValueType::Vector => "instant vector",
            ValueType::Matrix => "range vector",
            ValueType::String => "string",
        };
        f.write_str(name)
    }
}

/// Signature of a query function.
///
/// `variadic` follows the Prometheus convention: `0` means exactly `arg_types.len()`
/// arguments, `n > 0` makes the last declared argument optional and allows up to `n`
/// trailing arguments, `-1` allows any number of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSpec {
    pub name: String,
    pub arg_types: Vec<ValueType>,
    pub variadic: i32,
    pub return_type: ValueType,
}

impl FunctionSpec {
    pub fn new(name: &str, arg_types: &[ValueType], return_type: ValueType) -> Self {
        Self {
            name: name.to_string(),
            arg_types: arg_types.to_vec(),
            variadic: 0,
            return_type,
        }
    }

    pub fn min_args(&self) -> usize {
        if self.variadic == 0 {
            self.arg_types.len()
        } else {
            self.arg_types.len().saturating_sub(1)
        }
    }

    /// `None` when the function accepts an unbounded number of arguments.
    pub fn max_args(&self) -> Option<usize> {
        match self.variadic {
            0 => Some(self.arg_types.len()),
            n if n > 0 => Some(self.min_args() + n as usize),
            _ => None,
        }
    }

    /// Declared type of the argument at `idx`. Arguments past the declared list
    /// take the type of the last one.
    pub fn arg_type(&self, idx: usize) -> Option<ValueType> {
        self.arg_types
            .get(idx)
            .or_else(|| self.arg_types.last())
            .copied()
    }
}

/// Range functions that accept one extra trailing string argument once
/// [`FunctionRegistry::extend_range_function_signatures`] has run.
pub const EXTENDED_RANGE_FUNCTIONS: [&str; 18] = [
    "avg_over_time",
    "changes",
    "count_over_time",
    "delta",
    "deriv",
    "holt_winters",
    "idelta",
    "increase",
    "irate",
    "max_over_time",
    "min_over_time",
    "predict_linear",
    "quantile_over_time",
    "rate",
    "resets",
    "stddev_over_time",
    "stdvar_over_time",
    "sum_over_time",
];

fn builtin_functions() -> Vec<FunctionSpec> {
    use ValueType::*;

    let mut specs = vec![
        FunctionSpec::new("abs", &[Vector], Vector),
        FunctionSpec::new("time", &[], Scalar),
        FunctionSpec::new("holt_winters", &[Matrix, Scalar, Scalar], Vector),
        FunctionSpec::new("predict_linear", &[Matrix, Scalar], Vector),
        FunctionSpec::new("quantile_over_time", &[Scalar, Matrix], Vector),
    ];
    let matrix_only = [
        "avg_over_time",
        "changes",
        "count_over_time",
        "delta",
        "deriv",
        "idelta",
        "increase",
        "irate",
        "max_over_time",
        "min_over_time",
        "rate",
        "resets",
        "stddev_over_time",
        "stdvar_over_time",
        "sum_over_time",
    ];
    specs.extend(
        matrix_only
            .iter()
            .map(|name| FunctionSpec::new(name, &[Matrix], Vector)),
    );
    specs
}

struct RegistryState {
    functions: AHashMap<String, FunctionSpec>,
    extended: bool,
}

/// Function signatures consulted by the parser when type checking calls.
pub struct FunctionRegistry {
    state: RwLock<RegistryState>,
}

impl FunctionRegistry {
    pub fn new(specs: impl IntoIterator<Item = FunctionSpec>) -> Self {
        let functions = specs
            .into_iter()
            .map(|spec| (spec.name.clone(), spec))
            .collect();
        Self {
            state: RwLock::new(RegistryState {
                functions,
                extended: false,
            }),
        }
    }

    pub fn with_builtins() -> Self {
        Self::new(builtin_functions())
    }

    pub fn get(&self, name: &str) -> Option<FunctionSpec> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.functions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.functions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_extended(&self) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.extended
    }

    /// Lets every function in [`EXTENDED_RANGE_FUNCTIONS`] accept one extra trailing
    /// string argument. Names missing from the registry are skipped.
    ///
    /// Applied at most once per registry: returns `true` if this call changed the
    /// registry and `false` if it had already been extended.
    pub fn extend_range_function_signatures(&self) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.extended {
            debug!("function signatures already extended");
            return false;
        }

        let mut updated = 0;
        for name in EXTENDED_RANGE_FUNCTIONS {
            let Some(spec) = state.functions.get_mut(name) else {
                debug!("function {name} not registered, skipping");
                continue;
            };
            spec.variadic = 1;
            spec.arg_types.push(ValueType::String);
            updated += 1;
        }
        state.extended = true;
        info!("extended {updated} function signatures with a trailing string argument");
        true
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

static GLOBAL_REGISTRY: LazyLock<Arc<FunctionRegistry>> =
    LazyLock::new(|| Arc::new(FunctionRegistry::with_builtins()));

/// The process wide registry used by [`crate::engine::Engine::new`].
pub fn global_registry() -> Arc<FunctionRegistry> {
    Arc::clone(&GLOBAL_REGISTRY)
}
