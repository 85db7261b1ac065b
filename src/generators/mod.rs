mod linear;

pub use linear::*;
