pub mod bridge_processor;
pub mod timeout_monitor;
