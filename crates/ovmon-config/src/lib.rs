//! # ovmon-config
//!
//! Loads the monitor's INI configuration into [`config::MonitorSettings`]
//! and the list of management endpoints to poll.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | **ini** | Minimal INI reader – ordered sections, case-insensitive keys |
//! | **parser** | `[Monitor]` settings, one `VpnEndpoint` per other section, `/etc` lookup, defaults |

pub mod config;
