//! MSU study math utilities.

pub mod math;

pub use math::rounding::*;
pub use math::running::*;
