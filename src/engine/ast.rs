use std::fmt::Display;
use crate::common::{Matcher, Timestamp, METRIC_NAME_LABEL};
use crate::engine::functions::{FunctionSpec, ValueType};

/// Pins evaluation of a selector to a fixed time.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AtModifier {
    Timestamp(Timestamp),
    Start,
    End,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorSelector {
    pub name: Option<String>,
    /// Includes the `__name__` matcher derived from `name`.
    pub matchers: Vec<Matcher>,
    /// Offset in milliseconds. Negative values look into the future.
    pub offset: i64,
    pub at: Option<AtModifier>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatrixSelector {
    pub selector: VectorSelector,
    /// Range in milliseconds.
    pub range: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub func: FunctionSpec,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    String(String),
    Paren(Box<Expr>),
    Neg(Box<Expr>),
    VectorSelector(VectorSelector),
    MatrixSelector(MatrixSelector),
    Call(Call),
}

impl Expr {
    pub fn value_type(&self) -> ValueType {
        match self {
            Expr::Number(_) => ValueType::Scalar,
            Expr::String(_) => ValueType::String,
            Expr::Paren(inner) | Expr::Neg(inner) => inner.value_type(),
            Expr::VectorSelector(_) => ValueType::Vector,
            Expr::MatrixSelector(_) => ValueType::Matrix,
            Expr::Call(call) => call.func.return_type,
        }
    }
}

/// Renders a millisecond duration using the largest unit that divides it.
pub fn format_duration(ms: i64) -> String {
    const UNITS: [(u64, &str); 7] = [
        (31_536_000_000, "y"),
        (604_800_000, "w"),
        (86_400_000, "d"),
        (3_600_000, "h"),
        (60_000, "m"),
        (1000, "s"),
        (1, "ms"),
    ];
    if ms == 0 {
        return "0s".to_string();
    }
    let sign = if ms < 0 { "-" } else { "" };
    let abs = ms.unsigned_abs();
    for (size, unit) in UNITS {
        if abs % size == 0 {
            return format!("{sign}{}{unit}", abs / size);
        }
    }
    format!("{sign}{abs}ms")
}

impl Display for VectorSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rest: Vec<_> = self
            .matchers
            .iter()
            .filter(|m| self.name.is_none() || m.name != METRIC_NAME_LABEL)
            .map(|m| m.to_string())
            .collect();
        if let Some(name) = &self.name {
            write!(f, "{name}")?;
        }
        if !rest.is_empty() || self.name.is_none() {
            write!(f, "{{{}}}", rest.join(", "))?;
        }
        Ok(())
    }
}

fn write_modifiers(f: &mut std::fmt::Formatter<'_>, sel: &VectorSelector) -> std::fmt::Result {
    match sel.at {
        Some(AtModifier::Timestamp(ts)) => write!(f, " @ {:.3}", ts as f64 / 1000.0)?,
        Some(AtModifier::Start) => write!(f, " @ start()")?,
        Some(AtModifier::End) => write!(f, " @ end()")?,
        None => {}
    }
    if sel.offset != 0 {
        write!(f, " offset {}", format_duration(sel.offset))?;
    }
    Ok(())
}

impl Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Number(v) => write!(f, "{v}"),
            Expr::String(s) => write!(f, "{s:?}"),
            Expr::Paren(inner) => write!(f, "({inner})"),
            Expr::Neg(inner) => write!(f, "-{inner}"),
            Expr::VectorSelector(sel) => {
                write!(f, "{sel}")?;
                write_modifiers(f, sel)
            }
            Expr::MatrixSelector(m) => {
                write!(f, "{}[{}]", m.selector, format_duration(m.range))?;
                write_modifiers(f, &m.selector)
            }
            Expr::Call(call) => {
                let args: Vec<_> = call.args.iter().map(|a| a.to_string()).collect();
                write!(f, "{}({})", call.func.name, args.join(", "))
            }
        }
    }
}
