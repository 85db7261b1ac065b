mod context;
mod labels;
mod matchers;
mod time;
pub mod types;

pub use context::*;
pub use labels::*;
pub use matchers::*;
pub use time::*;
pub use types::{Sample, Timestamp};
