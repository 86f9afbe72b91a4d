//! Monitor configuration: a required `[Monitor]` section plus one section per
//! VPN to poll.

use crate::config::ini::{parse_ini, IniSection};
use log::{debug, info};
use ovmon_mgmt::management::{MonitorError, MonitorResult, VpnEndpoint};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_DATETIME_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Searched in order by [`MonitorConfig::parse_etc_file`].
pub const ETC_LOCATIONS: [&str; 3] = [
    "/etc/openvpn-monitor.conf",
    "/etc/openvpn/openvpn-monitor.conf",
    "/etc/openvpn/monitor.conf",
];

const MONITOR_SECTION: &str = "Monitor";

/// Contents of the `[Monitor]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorSettings {
    pub name: Option<String>,
    /// Opaque path, passed through to the presentation layer.
    pub geoip_data: Option<String>,
    pub datetime_format: String,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            name: None,
            geoip_data: None,
            datetime_format: DEFAULT_DATETIME_FORMAT.to_string(),
        }
    }
}

/// Parsed configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub settings: MonitorSettings,
    /// In section order.
    pub vpns: Vec<VpnEndpoint>,
}

impl MonitorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in configuration: one `Default VPN` on `localhost:5555`.
    pub fn defaults() -> Self {
        let mut cfg = Self::new();
        cfg.load_defaults();
        cfg
    }

    pub fn from_file(path: impl AsRef<Path>) -> MonitorResult<Self> {
        let mut cfg = Self::new();
        cfg.parse_file(path)?;
        Ok(cfg)
    }

    pub fn parse_str(content: &str) -> MonitorResult<Self> {
        let mut cfg = Self::new();
        cfg.apply(content)?;
        Ok(cfg)
    }

    /// Replace the current contents with those of `path`.
    pub fn parse_file(&mut self, path: impl AsRef<Path>) -> MonitorResult<()> {
        let path = path.as_ref();
        info!("Parsing config file: {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| {
            MonitorError::invalid_config(format!("Unable to read config file: {}", path.display()))
                .with_detail(e.to_string())
        })?;
        self.apply(&content)
    }

    /// Parse the first file in `/etc` that exists. `Ok(false)` when none does.
    pub fn parse_etc_file(&mut self) -> MonitorResult<bool> {
        self.parse_first_existing(&ETC_LOCATIONS)
    }

    pub fn parse_first_existing<P: AsRef<Path>>(&mut self, paths: &[P]) -> MonitorResult<bool> {
        match paths.iter().map(|p| p.as_ref()).find(|p| p.is_file()) {
            Some(path) => {
                self.parse_file(path)?;
                Ok(true)
            }
            None => {
                debug!("No config file found in {} locations", paths.len());
                Ok(false)
            }
        }
    }

    pub fn load_defaults(&mut self) {
        self.settings = MonitorSettings::default();
        self.vpns = vec![VpnEndpoint::ip("Default VPN", "localhost", 5555).with_allow_disconnect(true)];
    }

    fn apply(&mut self, content: &str) -> MonitorResult<()> {
        let doc = parse_ini(content)?;
        let monitor = doc.section(MONITOR_SECTION).ok_or_else(|| {
            MonitorError::invalid_config("'Monitor' section required, but not found in config")
        })?;

        let settings = MonitorSettings {
            name: monitor.get("name").map(str::to_string),
            geoip_data: monitor.get("geoip_data").map(str::to_string),
            datetime_format: monitor
                .get("datetime_format")
                .unwrap_or(DEFAULT_DATETIME_FORMAT)
                .to_string(),
        };

        let vpns = doc
            .sections()
            .iter()
            .filter(|s| s.name != MONITOR_SECTION)
            .map(parse_vpn_section)
            .collect::<MonitorResult<Vec<_>>>()?;

        debug!("Config lists {} VPN(s)", vpns.len());
        self.settings = settings;
        self.vpns = vpns;
        Ok(())
    }
}

fn parse_vpn_section(section: &IniSection) -> MonitorResult<VpnEndpoint> {
    let port = section
        .get_non_empty("port")
        .and_then(|p| p.parse::<u16>().ok());
    let endpoint = VpnEndpoint::from_parts(
        section.name.as_str(),
        section.get_non_empty("host"),
        port,
        section.get_non_empty("socket"),
    )?;
    let allow = match section.get("allow_disconnect") {
        Some(v) => parse_bool(v).ok_or_else(|| {
            MonitorError::invalid_config(format!(
                "Not a boolean for allow_disconnect in '{}': {}",
                section.name, v
            ))
        })?,
        None => true,
    };
    Ok(endpoint.with_allow_disconnect(allow))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Some(true),
        "0" | "no" | "false" | "off" => Some(false),
        _ => None,
    }
}
