//! Shared types for the market-data collector.

pub mod fixed;
pub mod platform;

pub use fixed::{Price, Size, SCALE};
pub use platform::Platform;
