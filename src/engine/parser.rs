use nom::branch::alt;
use nom::bytes::complete::{tag, tag_no_case, take_while};
use nom::character::complete::{char, digit1, multispace0, satisfy};
use nom::combinator::{all_consuming, map, map_res, not, opt, recognize, value};
use nom::error::{Error as NomError, ErrorKind};
use nom::multi::{many1, separated_list0};
use nom::number::complete::recognize_float;
use nom::sequence::{delimited, pair, preceded, terminated, tuple};
use nom::{Err as NomErr, IResult};
use crate::common::{MatchOp, Matcher, METRIC_NAME_LABEL};
use crate::engine::ast::{AtModifier, Call, Expr, MatrixSelector, VectorSelector};
use crate::engine::functions::{FunctionRegistry, FunctionSpec, ValueType};
use crate::error::{QueryError, QueryResult};

/// Feature switches that affect what the parser accepts.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ParseOptions {
    pub enable_at_modifier: bool,
    pub enable_negative_offset: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            enable_at_modifier: true,
            enable_negative_offset: true,
        }
    }
}

type ParseResult<'a, T> = IResult<&'a str, T>;

type RawMatcher = (String, MatchOp, String);

/// Untyped syntax tree. `rem` is the length of the input remaining at the start
/// of the node, which gives its position once the total length is known.
#[derive(Debug, Clone, PartialEq)]
struct Node {
    kind: NodeKind,
    rem: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum NodeKind {
    Number(f64),
    Str(String),
    Paren(Box<Node>),
    Neg(Box<Node>),
    Selector {
        name: Option<String>,
        matchers: Vec<RawMatcher>,
    },
    Call {
        name: String,
        args: Vec<Node>,
    },
    Range(Box<Node>, i64),
    Offset(Box<Node>, i64),
    At(Box<Node>, AtModifier),
}

fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> ParseResult<'a, O>
where
    F: FnMut(&'a str) -> ParseResult<'a, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn metric_identifier(input: &str) -> ParseResult<'_, &str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_alphabetic() || c == '_' || c == ':'),
        take_while(|c: char| is_ident_char(c) || c == ':'),
    ))(input)
}

fn label_name(input: &str) -> ParseResult<'_, &str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
        take_while(is_ident_char),
    ))(input)
}

fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> ParseResult<'a, &'a str> {
    terminated(tag_no_case(kw), not(satisfy(is_ident_char)))
}

/// Recognizes a quoted string including its quotes. Backslash escapes are
/// skipped over except inside backticks.
fn quoted(input: &str) -> ParseResult<'_, &str> {
    let mut chars = input.char_indices();
    let quote = match chars.next() {
        Some((_, c)) if c == '"' || c == '\'' || c == '`' => c,
        _ => return Err(NomErr::Error(NomError::new(input, ErrorKind::Char))),
    };
    let mut escaped = false;
    for (i, c) in chars {
        if escaped {
            escaped = false;
        } else if c == '\\' && quote != '`' {
            escaped = true;
        } else if c == quote {
            let end = i + c.len_utf8();
            return Ok((&input[end..], &input[..end]));
        }
    }
    Err(NomErr::Failure(NomError::new(input, ErrorKind::Escaped)))
}

fn unquote(raw: &str) -> Result<String, enquote::Error> {
    if let Some(inner) = raw.strip_prefix('`').and_then(|s| s.strip_suffix('`')) {
        return Ok(inner.to_string());
    }
    enquote::unquote(raw)
}

fn string_literal(input: &str) -> ParseResult<'_, String> {
    map_res(quoted, unquote)(input)
}

fn duration_unit(input: &str) -> ParseResult<'_, i64> {
    alt((
        value(1, tag("ms")),
        value(1000, tag("s")),
        value(60_000, tag("m")),
        value(3_600_000, tag("h")),
        value(86_400_000, tag("d")),
        value(604_800_000, tag("w")),
        value(31_536_000_000, tag("y")),
    ))(input)
}

/// A duration such as `5m` or `1h30m`, in milliseconds.
pub(crate) fn duration(input: &str) -> ParseResult<'_, i64> {
    map_res(many1(pair(digit1, duration_unit)), |parts: Vec<(&str, i64)>| {
        parts.into_iter().try_fold(0i64, |acc, (digits, unit)| {
            let n: i64 = digits.parse().map_err(|_| "invalid duration")?;
            n.checked_mul(unit)
                .and_then(|v| acc.checked_add(v))
                .ok_or("duration out of range")
        })
    })(input)
}

fn match_op(input: &str) -> ParseResult<'_, MatchOp> {
    alt((
        value(MatchOp::RegexEqual, tag("=~")),
        value(MatchOp::RegexNotEqual, tag("!~")),
        value(MatchOp::NotEqual, tag("!=")),
        value(MatchOp::Equal, tag("=")),
    ))(input)
}

fn label_matcher(input: &str) -> ParseResult<'_, RawMatcher> {
    map(
        tuple((ws(label_name), ws(match_op), ws(string_literal))),
        |(name, op, value)| (name.to_string(), op, value),
    )(input)
}

fn label_matchers(input: &str) -> ParseResult<'_, Vec<RawMatcher>> {
    delimited(
        ws(char('{')),
        separated_list0(char(','), label_matcher),
        preceded(opt(ws(char(','))), ws(char('}'))),
    )(input)
}

fn number_literal(input: &str) -> ParseResult<'_, NodeKind> {
    map_res(recognize_float, |s: &str| s.parse::<f64>().map(NodeKind::Number))(input)
}

fn call_or_selector(input: &str) -> ParseResult<'_, NodeKind> {
    if let Ok((rest, name)) = metric_identifier(input) {
        let (after_ws, _) = multispace0(rest)?;
        if after_ws.starts_with('(') {
            let (rest, args) = delimited(
                char('('),
                separated_list0(char(','), expr),
                ws(char(')')),
            )(after_ws)?;
            let kind = NodeKind::Call {
                name: name.to_string(),
                args,
            };
            return Ok((rest, kind));
        }
        if name.eq_ignore_ascii_case("inf") {
            return Ok((rest, NodeKind::Number(f64::INFINITY)));
        }
        if name.eq_ignore_ascii_case("nan") {
            return Ok((rest, NodeKind::Number(f64::NAN)));
        }
        let (rest, matchers) = opt(preceded(multispace0, label_matchers))(rest)?;
        let kind = NodeKind::Selector {
            name: Some(name.to_string()),
            matchers: matchers.unwrap_or_default(),
        };
        return Ok((rest, kind));
    }
    let (rest, matchers) = label_matchers(input)?;
    Ok((rest, NodeKind::Selector { name: None, matchers }))
}

fn primary(input: &str) -> ParseResult<'_, Node> {
    let (input, _) = multispace0(input)?;
    let rem = input.len();
    let (rest, kind) = alt((
        map(delimited(char('('), expr, ws(char(')'))), |n| NodeKind::Paren(Box::new(n))),
        map(string_literal, NodeKind::Str),
        number_literal,
        call_or_selector,
    ))(input)?;
    Ok((rest, Node { kind, rem }))
}

fn range_suffix(input: &str) -> ParseResult<'_, i64> {
    delimited(ws(char('[')), ws(duration), char(']'))(input)
}

fn offset_suffix(input: &str) -> ParseResult<'_, i64> {
    map(
        preceded(ws(keyword("offset")), pair(opt(ws(char('-'))), duration)),
        |(neg, d)| if neg.is_some() { -d } else { d },
    )(input)
}

fn empty_parens(input: &str) -> ParseResult<'_, (char, char)> {
    pair(ws(char('(')), char(')'))(input)
}

fn at_suffix(input: &str) -> ParseResult<'_, AtModifier> {
    preceded(
        ws(char('@')),
        alt((
            value(AtModifier::Start, terminated(keyword("start"), empty_parens)),
            value(AtModifier::End, terminated(keyword("end"), empty_parens)),
            map_res(recognize_float, |s: &str| {
                s.parse::<f64>()
                    .map(|secs| AtModifier::Timestamp((secs * 1000.0).round() as i64))
            }),
        )),
    )(input)
}

fn postfix(input: &str) -> ParseResult<'_, Node> {
    let (mut rest, mut node) = primary(input)?;
    loop {
        let rem = rest.len();
        if let Ok((r, range)) = range_suffix(rest) {
            node = Node { kind: NodeKind::Range(Box::new(node), range), rem };
            rest = r;
        } else if let Ok((r, offset)) = offset_suffix(rest) {
            node = Node { kind: NodeKind::Offset(Box::new(node), offset), rem };
            rest = r;
        } else if let Ok((r, at)) = at_suffix(rest) {
            node = Node { kind: NodeKind::At(Box::new(node), at), rem };
            rest = r;
        } else {
            break;
        }
    }
    Ok((rest, node))
}

fn unary(input: &str) -> ParseResult<'_, Node> {
    let (input, _) = multispace0(input)?;
    let rem = input.len();
    if let Some(rest) = input.strip_prefix('-') {
        let (rest, inner) = unary(rest)?;
        return Ok((rest, Node { kind: NodeKind::Neg(Box::new(inner)), rem }));
    }
    if let Some(rest) = input.strip_prefix('+') {
        return unary(rest);
    }
    postfix(input)
}

fn expr(input: &str) -> ParseResult<'_, Node> {
    ws(unary)(input)
}

/// Parses and type checks a query expression.
pub fn parse_expr(input: &str, registry: &FunctionRegistry, opts: ParseOptions) -> QueryResult<Expr> {
    let node = match all_consuming(expr)(input) {
        Ok((_, node)) => node,
        Err(NomErr::Error(e)) | Err(NomErr::Failure(e)) => return Err(syntax_error(input, e.input)),
        Err(NomErr::Incomplete(_)) => {
            return Err(QueryError::Parse {
                pos: input.len(),
                msg: "unexpected end of input".to_string(),
            })
        }
    };
    let checker = Checker {
        input_len: input.len(),
        registry,
        opts,
    };
    checker.check(node)
}

fn syntax_error(input: &str, remaining: &str) -> QueryError {
    let pos = input.len() - remaining.len();
    let msg = match remaining.chars().next() {
        Some(c) => format!("unexpected character {c:?}"),
        None => "unexpected end of input".to_string(),
    };
    QueryError::Parse { pos, msg }
}

struct Checker<'a> {
    input_len: usize,
    registry: &'a FunctionRegistry,
    opts: ParseOptions,
}

impl Checker<'_> {
    fn error(&self, rem: usize, msg: impl Into<String>) -> QueryError {
        QueryError::Parse {
            pos: self.input_len.saturating_sub(rem),
            msg: msg.into(),
        }
    }

    fn check(&self, node: Node) -> QueryResult<Expr> {
        let rem = node.rem;
        match node.kind {
            NodeKind::Number(v) => Ok(Expr::Number(v)),
            NodeKind::Str(s) => Ok(Expr::String(s)),
            NodeKind::Paren(inner) => Ok(Expr::Paren(Box::new(self.check(*inner)?))),
            NodeKind::Neg(inner) => {
                let inner = self.check(*inner)?;
                match inner.value_type() {
                    ValueType::Scalar | ValueType::Vector => Ok(Expr::Neg(Box::new(inner))),
                    other => Err(self.error(
                        rem,
                        format!("unary expression only allowed on expressions of type scalar or instant vector, got {other}"),
                    )),
                }
            }
            NodeKind::Selector { name, matchers } => {
                self.selector(rem, name, matchers).map(Expr::VectorSelector)
            }
            NodeKind::Range(inner, range) => {
                let Node { kind, rem: inner_rem } = *inner;
                match kind {
                    NodeKind::Selector { name, matchers } => {
                        if range <= 0 {
                            return Err(self.error(rem, "range must be positive"));
                        }
                        let selector = self.selector(inner_rem, name, matchers)?;
                        Ok(Expr::MatrixSelector(MatrixSelector { selector, range }))
                    }
                    _ => Err(self.error(rem, "ranges only allowed for vector selectors")),
                }
            }
            NodeKind::Offset(inner, offset) => {
                if offset < 0 && !self.opts.enable_negative_offset {
                    return Err(self.error(rem, "negative offset is disabled"));
                }
                let mut expr = self.check(*inner)?;
                let Some(selector) = selector_mut(&mut expr) else {
                    return Err(self.error(rem, "offset modifier must be preceded by a vector or range selector"));
                };
                if selector.offset != 0 {
                    return Err(self.error(rem, "offset may not be set multiple times"));
                }
                selector.offset = offset;
                Ok(expr)
            }
            NodeKind::At(inner, at) => {
                if !self.opts.enable_at_modifier {
                    return Err(self.error(rem, "@ modifier is disabled"));
                }
                let mut expr = self.check(*inner)?;
                let Some(selector) = selector_mut(&mut expr) else {
                    return Err(self.error(rem, "@ modifier must be preceded by a vector or range selector"));
                };
                if selector.at.is_some() {
                    return Err(self.error(rem, "@ <timestamp> may not be set multiple times"));
                }
                selector.at = Some(at);
                Ok(expr)
            }
            NodeKind::Call { name, args } => {
                let func = self
                    .registry
                    .get(&name)
                    .ok_or(QueryError::UnknownFunction(name))?;
                let args = args
                    .into_iter()
                    .map(|arg| self.check(arg))
                    .collect::<QueryResult<Vec<_>>>()?;
                check_call_args(&func, &args)?;
                Ok(Expr::Call(Call { func, args }))
            }
        }
    }

    fn selector(&self, rem: usize, name: Option<String>, raw: Vec<RawMatcher>) -> QueryResult<VectorSelector> {
        let mut matchers = Vec::with_capacity(raw.len() + 1);
        if let Some(name) = &name {
            matchers.push(Matcher::equal(METRIC_NAME_LABEL, name));
        }
        for (label, op, value) in raw {
            if let (Some(name), true) = (&name, label == METRIC_NAME_LABEL) {
                return Err(self.error(rem, format!("metric name must not be set twice: {name:?} or {value:?}")));
            }
            let matcher = Matcher::new(op, &label, &value)
                .map_err(|e| self.error(rem, format!("invalid regular expression in label matcher: {e}")))?;
            matchers.push(matcher);
        }
        if matchers.iter().all(|m| m.matches_empty()) {
            return Err(self.error(rem, "vector selector must contain at least one non-empty matcher"));
        }
        Ok(VectorSelector {
            name,
            matchers,
            offset: 0,
            at: None,
        })
    }
}

fn selector_mut(expr: &mut Expr) -> Option<&mut VectorSelector> {
    match expr {
        Expr::VectorSelector(sel) => Some(sel),
        Expr::MatrixSelector(m) => Some(&mut m.selector),
        _ => None,
    }
}

fn check_call_args(func: &FunctionSpec, args: &[Expr]) -> QueryResult<()> {
    let name = &func.name;
    if func.variadic == 0 {
        if args.len() != func.arg_types.len() {
            return Err(QueryError::InvalidArgs(format!(
                "expected {} argument(s) in call to {name:?}, got {}",
                func.arg_types.len(),
                args.len()
            )));
        }
    } else {
        let min = func.min_args();
        if args.len() < min {
            return Err(QueryError::InvalidArgs(format!(
                "expected at least {min} argument(s) in call to {name:?}, got {}",
                args.len()
            )));
        }
        if let Some(max) = func.max_args() {
            if args.len() > max {
                return Err(QueryError::InvalidArgs(format!(
                    "expected at most {max} argument(s) in call to {name:?}, got {}",
                    args.len()
                )));
            }
        }
    }

    for (i, arg) in args.iter().enumerate() {
        let Some(expected) = func.arg_type(i) else {
            continue;
        };
        let actual = arg.value_type();
        if actual != expected {
            return Err(QueryError::InvalidArgs(format!(
                "expected type {expected} in call to function {name:?}, got {actual}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn parse(input: &str) -> QueryResult<Expr> {
        parse_expr(input, &FunctionRegistry::with_builtins(), ParseOptions::default())
    }

    fn extended_registry() -> FunctionRegistry {
        let registry = FunctionRegistry::with_builtins();
        registry.extend_range_function_signatures();
        registry
    }

    #[test]
    fn parses_rate_over_range_selector() {
        let expr = parse("rate(bar[1m])").unwrap();
        let Expr::Call(call) = &expr else {
            panic!("expected call, got {expr:?}");
        };
        assert_eq!(call.func.name, "rate");
        let Expr::MatrixSelector(m) = &call.args[0] else {
            panic!("expected matrix selector");
        };
        assert_eq!(m.range, 60_000);
        assert_eq!(m.selector.name.as_deref(), Some("bar"));
        assert_eq!(m.selector.matchers, vec![Matcher::equal(METRIC_NAME_LABEL, "bar")]);
        assert_eq!(expr.value_type(), ValueType::Vector);
        assert_eq!(expr.to_string(), "rate(bar[1m])");
    }

    #[test]
    fn parses_label_matchers() {
        let expr = parse(r#"bar{job="api", env!~"dev|test", }"#).unwrap();
        let Expr::VectorSelector(sel) = expr else {
            panic!("expected selector");
        };
        assert_eq!(sel.matchers.len(), 3);
        assert_eq!(sel.matchers[1], Matcher::new(MatchOp::Equal, "job", "api").unwrap());
        assert_eq!(sel.matchers[2].op, MatchOp::RegexNotEqual);
        assert!(!sel.matchers[2].matches("dev"));
    }

    #[test]
    fn parses_modifiers() {
        let expr = parse("rate(bar[5m] offset -1h30m @ 1600000000)").unwrap();
        let Expr::Call(call) = expr else {
            panic!("expected call");
        };
        let Expr::MatrixSelector(m) = &call.args[0] else {
            panic!("expected matrix selector");
        };
        assert_eq!(m.range, 300_000);
        assert_eq!(m.selector.offset, -5_400_000);
        assert_eq!(m.selector.at, Some(AtModifier::Timestamp(1_600_000_000_000)));

        let expr = parse("bar @ end()").unwrap();
        let Expr::VectorSelector(sel) = expr else {
            panic!("expected selector");
        };
        assert_eq!(sel.at, Some(AtModifier::End));
    }

    #[test_case("1", 1.0 ; "integer")]
    #[test_case("2.5", 2.5 ; "float")]
    #[test_case("-3", -3.0 ; "negative")]
    #[test_case("1e3", 1000.0 ; "exponent")]
    #[test_case("Inf", f64::INFINITY ; "infinity")]
    fn parses_numbers(input: &str, expected: f64) {
        let value = match parse(input).unwrap() {
            Expr::Number(v) => v,
            Expr::Neg(inner) => match *inner {
                Expr::Number(v) => -v,
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(value, expected);
    }

    #[test]
    fn parses_string_literals() {
        assert_eq!(parse(r#""a\"b""#).unwrap(), Expr::String("a\"b".to_string()));
        assert_eq!(parse("'single'").unwrap(), Expr::String("single".to_string()));
        assert_eq!(parse(r"`raw\n`").unwrap(), Expr::String(r"raw\n".to_string()));
    }

    #[test_case("rate(bar)", "expected type range vector" ; "instant vector for range")]
    #[test_case("rate(bar[1m], bar[1m])", "expected 1 argument(s)" ; "too many args")]
    #[test_case("holt_winters(bar[1m], 0.5)", "expected 3 argument(s)" ; "too few args")]
    #[test_case("quantile_over_time(bar[1m], 0.5)", "expected type scalar" ; "swapped args")]
    fn rejects_bad_calls(input: &str, fragment: &str) {
        let err = parse(input).unwrap_err();
        assert!(matches!(err, QueryError::InvalidArgs(_)), "{err:?}");
        assert!(err.to_string().contains(fragment), "{err}");
    }

    #[test]
    fn rejects_unknown_function() {
        assert_eq!(
            parse("nope(bar)").unwrap_err(),
            QueryError::UnknownFunction("nope".to_string())
        );
    }

    #[test_case("rate(bar[1m]" ; "unclosed call")]
    #[test_case("bar[1x]" ; "bad duration")]
    #[test_case("(bar)[1m]" ; "range on parens")]
    #[test_case("{job=\"\"}" ; "only empty matchers")]
    #[test_case("bar{__name__=\"foo\"}" ; "name set twice")]
    #[test_case("bar offset 1m offset 2m" ; "double offset")]
    #[test_case("bar{job=~\"(\"}" ; "invalid regex")]
    #[test_case("" ; "empty")]
    fn rejects_bad_syntax(input: &str) {
        let err = parse(input).unwrap_err();
        assert!(matches!(err, QueryError::Parse { .. }), "{input}: {err:?}");
    }

    #[test]
    fn parse_errors_report_position() {
        let err = parse("rate(bar[1m]) )").unwrap_err();
        assert_eq!(
            err,
            QueryError::Parse {
                pos: 14,
                msg: "unexpected character ')'".to_string()
            }
        );
    }

    #[test]
    fn feature_switches_are_honoured() {
        let registry = FunctionRegistry::with_builtins();
        let opts = ParseOptions {
            enable_at_modifier: false,
            enable_negative_offset: false,
        };
        assert!(parse_expr("bar @ 100", &registry, opts).is_err());
        assert!(parse_expr("bar offset -5m", &registry, opts).is_err());
        assert!(parse_expr("bar offset 5m", &registry, opts).is_ok());
    }

    #[test]
    fn trailing_string_argument_requires_extension() {
        let query = r#"rate(bar[1m], "extra")"#;
        let err = parse(query).unwrap_err();
        assert!(matches!(err, QueryError::InvalidArgs(_)));

        let registry = extended_registry();
        let expr = parse_expr(query, &registry, ParseOptions::default()).unwrap();
        let Expr::Call(call) = expr else {
            panic!("expected call");
        };
        assert_eq!(call.args.len(), 2);
        assert_eq!(call.args[1], Expr::String("extra".to_string()));

        // still optional, and only a string is accepted
        assert!(parse_expr("rate(bar[1m])", &registry, ParseOptions::default()).is_ok());
        assert!(parse_expr("rate(bar[1m], 1)", &registry, ParseOptions::default()).is_err());
        assert!(parse_expr(r#"rate(bar[1m], "a", "b")"#, &registry, ParseOptions::default()).is_err());
        assert!(parse_expr(
            r#"quantile_over_time(0.9, bar[1m], "extra")"#,
            &registry,
            ParseOptions::default()
        )
        .is_ok());
        assert!(parse_expr(r#"abs(bar, "extra")"#, &registry, ParseOptions::default()).is_err());
    }
}
