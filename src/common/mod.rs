//! Common utilities and types shared across coordkv

pub mod config;
pub mod error;
pub mod utils;

pub use self::config::{ClientConfig, Config, TourConfig, TourRecord};
pub use error::{Error, Result};
pub use utils::{display_bytes, format_duration, parse_duration, prefix_range_end, validate_key};
