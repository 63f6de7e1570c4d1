pub mod address;
pub mod client;
pub mod decoder;
pub mod monitor;
pub mod params;
pub mod processor;
pub mod types;
