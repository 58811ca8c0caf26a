//! Opportunity detection: fee schedule and the snapshot-driven detector

pub mod detector;
pub mod fees;

pub use detector::{Opportunity, OpportunityDetector};
pub use fees::{gross_spread_fraction, net_profit_fraction, FeeSchedule};
