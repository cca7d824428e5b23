pub mod package_split;
pub mod payment_bridge;
