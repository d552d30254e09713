pub mod comms;
pub mod host;
pub mod monitoring;
pub mod probe;
pub mod settings;
pub mod utils;

// Crate version exposed for runtime queries
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
