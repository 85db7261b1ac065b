use std::sync::Arc;
use std::time::Duration;
use test_case::test_case;
use crate::engine::{
    parse_expr, Expr, FunctionRegistry, ParseOptions, ValueType, EXTENDED_RANGE_FUNCTIONS,
};
use crate::error::QueryError;
use crate::provider::SyntheticQueryable;
use crate::tests::{aligned_now, extended_registry, run_range_query, MINUTE};

#[test_case("rate(bar[1m], \"tenant\")" ; "rate")]
#[test_case("increase(bar[5m], 'tenant')" ; "increase")]
#[test_case("holt_winters(bar[5m], 0.5, 0.5, `tenant`)" ; "holt winters")]
#[test_case("quantile_over_time(0.9, bar[5m], \"tenant\")" ; "quantile")]
#[test_case("predict_linear(bar[5m], 60, \"tenant\")" ; "predict linear")]
fn trailing_string_accepted_after_extension(qs: &str) {
    let plain = FunctionRegistry::with_builtins();
    let err = parse_expr(qs, &plain, ParseOptions::default()).unwrap_err();
    assert!(matches!(err, QueryError::InvalidArgs(_)), "{err}");

    let extended = extended_registry();
    let expr = parse_expr(qs, &extended, ParseOptions::default()).unwrap();
    let Expr::Call(call) = &expr else {
        panic!("expected a call, got {expr}");
    };
    assert_eq!(call.args.last().map(Expr::value_type), Some(ValueType::String));
}

#[test]
fn extension_keeps_declared_arity_valid() {
    let registry = extended_registry();
    for name in EXTENDED_RANGE_FUNCTIONS {
        let spec = registry.get(name).unwrap();
        assert_eq!(spec.variadic, 1, "{name}");
        assert_eq!(spec.arg_types.last(), Some(&ValueType::String), "{name}");
    }
    assert!(parse_expr("rate(bar[1m])", &registry, ParseOptions::default()).is_ok());
    assert!(parse_expr("rate(bar[1m], \"a\", \"b\")", &registry, ParseOptions::default()).is_err());
    assert!(parse_expr("rate(bar[1m], 1)", &registry, ParseOptions::default()).is_err());
    assert!(parse_expr("abs(bar, \"a\")", &registry, ParseOptions::default()).is_err());
}

#[test]
fn trailing_string_does_not_change_results() {
    let end = aligned_now();
    let start = end - 10 * MINUTE;
    let queryable = Arc::new(SyntheticQueryable::default());
    let step = Duration::from_secs(15);

    let plain = run_range_query(
        queryable.clone(),
        extended_registry(),
        "rate(bar[1m])",
        start,
        end,
        step,
    )
    .unwrap();
    let tagged = run_range_query(
        queryable,
        extended_registry(),
        "rate(bar[1m], \"tenant\")",
        start,
        end,
        step,
    )
    .unwrap();
    assert_eq!(plain, tagged);
}
