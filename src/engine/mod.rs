//! A small PromQL range query engine.
//!
//! Queries are parsed and type checked against a [`FunctionRegistry`], then
//! evaluated step by step over series pulled through the [`crate::storage`] traits.

mod ast;
mod functions;
mod parser;
mod query;
mod rollup;

pub use ast::*;
pub use functions::*;
pub use parser::{parse_expr, ParseOptions};
pub use query::*;
