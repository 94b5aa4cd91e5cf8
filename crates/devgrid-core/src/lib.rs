pub mod config;
pub mod duration;
pub mod types;

pub use config::DevgridConfig;
pub use duration::parse_duration;
pub use types::*;
