//! Utility modules

pub mod logger;
pub mod metrics;

pub use self::logger::*;
pub use self::metrics::*;
