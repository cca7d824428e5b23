pub mod packages;
pub mod payments;
pub mod stats;
