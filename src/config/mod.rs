//! Configuration models for the pool and its health sweep.

pub mod pool;

pub use pool::TokenPoolConfig;
