pub mod common;
pub mod config;
pub mod engine;
pub mod error;
pub mod generators;
pub mod iter;
pub mod provider;
pub mod storage;

#[cfg(test)]
mod tests;
