pub mod client;

pub use client::BscClient;
