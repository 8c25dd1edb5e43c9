//! Reference strategies built on the public strategy API.

pub mod simple;

pub use simple::{Phase, SimpleConfig, SimpleStrategy};
