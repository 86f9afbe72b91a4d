//! Configuration module root – re-exports public API surface.

pub mod ini;
pub mod parser;

pub use parser::{MonitorConfig, MonitorSettings, DEFAULT_DATETIME_FORMAT, ETC_LOCATIONS};
