//! Application services driven by the binary.

pub mod error;
pub mod simulate;
