//! # ovmon-mgmt
//!
//! Client for the OpenVPN management interface, used to monitor running
//! OpenVPN instances.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | **types** | Endpoint descriptor, records, client options, errors |
//! | **transport** | TCP / UNIX socket transport with `>INFO` handshake |
//! | **channel** | Command framing and `END`-terminated reply accumulation |
//! | **parse** | Parsers for `version`, `state`, `load-stats`, `status` replies |
//! | **client** | `VpnClient` facade – connect, cached release, queries, kills |

pub mod management;
