//! Parsers for management-interface replies.
//!
//! All functions are pure over the reply text. Version parsing is strict;
//! state and stats tolerate missing fields as long as the overall shape is
//! recognisable; session listings skip rows they cannot read.

use crate::management::types::*;
use chrono::{DateTime, NaiveDateTime, Utc};
use log::warn;
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Version
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Extract the release banner from a `version` reply.
pub fn parse_release(reply: &str) -> MonitorResult<String> {
    reply
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with("OpenVPN Version"))
        .find_map(|l| l.split_once(": ").map(|(_, rest)| rest.to_string()))
        .ok_or_else(|| {
            MonitorError::parse(
                "Unable to get OpenVPN version, no matches found in socket response.",
            )
        })
}

/// `"OpenVPN 2.6.8 x86_64…"` → `"2.6.8"`. An absent release stays absent.
pub fn parse_semver(release: Option<&str>) -> MonitorResult<Option<String>> {
    let release = match release {
        Some(r) => r,
        None => return Ok(None),
    };
    let re = regex::Regex::new(r"OpenVPN\s+(\d+\.\d+\.\d+)")
        .map_err(|e| MonitorError::parse("Invalid version pattern").with_detail(e.to_string()))?;
    re.captures(release)
        .map(|c| Some(c[1].to_string()))
        .ok_or_else(|| MonitorError::parse("Unable to parse version from release string."))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  State
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse a `state` reply:
/// `time,STATE,description,local_ip,remote_ip[,remote_port,local_addr,local_port,local_ipv6]`.
pub fn parse_state(reply: &str) -> MonitorResult<ServerState> {
    let fields = reply
        .lines()
        .map(str::trim)
        .filter(|l| is_payload_line(l))
        .map(|l| l.split(',').collect::<Vec<_>>())
        .find(|f| f.len() >= 2)
        .ok_or_else(|| {
            MonitorError::parse("Unable to parse server state, no state line found in socket response.")
        })?;

    let remote_ip = non_empty(fields.get(4).copied());
    Ok(ServerState {
        up_since: fields[0].trim().parse::<i64>().ok().and_then(from_unix),
        connected: non_empty(fields.get(1).copied()),
        local_ip: non_empty(fields.get(3).copied()),
        mode: if remote_ip.is_some() {
            InstanceMode::Client
        } else {
            InstanceMode::Server
        },
        remote_ip,
        success: fields.get(2).map(|s| s.trim()) == Some("SUCCESS"),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Load stats
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse `SUCCESS: nclients=N,bytesin=N,bytesout=N`.
pub fn parse_load_stats(reply: &str) -> MonitorResult<ServerStats> {
    let line = reply
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with("SUCCESS:"))
        .ok_or_else(|| {
            MonitorError::parse("Unable to parse load-stats, no SUCCESS line found in socket response.")
                .with_detail(reply.lines().next().unwrap_or_default().trim().to_string())
        })?;

    let values: HashMap<&str, &str> = line["SUCCESS:".len()..]
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim()))
        .collect();

    let counter = |name: &str| -> MonitorResult<u64> {
        values
            .get(name)
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| MonitorError::parse(format!("Missing or invalid '{}' in load-stats response", name)))
    };

    Ok(ServerStats {
        client_count: counter("nclients")?,
        bytes_in: counter("bytesin")?,
        bytes_out: counter("bytesout")?,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse a `status` reply into one record per peer.
///
/// Understands `status 2`/`status 3` (comma or tab), the legacy `status 1`
/// layout, and the `OpenVPN STATISTICS` block a client-mode instance returns.
pub fn parse_sessions(reply: &str) -> MonitorResult<Vec<SessionStats>> {
    let lines: Vec<&str> = reply
        .lines()
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| is_payload_line(l.trim()))
        .collect();

    if lines.iter().any(|l| l.starts_with("OpenVPN STATISTICS")) {
        return Ok(vec![SessionStats::Local(parse_local_stats(&lines))]);
    }
    if lines
        .iter()
        .any(|l| l.starts_with("CLIENT_LIST") || l.starts_with("HEADER"))
    {
        return Ok(parse_client_list(&lines));
    }
    if lines.iter().any(|l| l.starts_with("OpenVPN CLIENT LIST")) {
        return Ok(parse_legacy_client_list(&lines));
    }
    Err(MonitorError::parse("Unrecognised status response from management interface.")
        .with_detail(lines.first().copied().unwrap_or_default().to_string()))
}

fn parse_local_stats(lines: &[&str]) -> LocalClientStats {
    let mut stats = LocalClientStats::default();
    for line in lines {
        let Some((key, value)) = line.split_once(',') else {
            continue;
        };
        let Ok(value) = value.trim().parse::<u64>() else {
            continue;
        };
        match key.trim() {
            "TUN/TAP read bytes" => stats.tun_tap_read = value,
            "TUN/TAP write bytes" => stats.tun_tap_write = value,
            "TCP/UDP read bytes" => stats.tcp_udp_read = value,
            "TCP/UDP write bytes" => stats.tcp_udp_write = value,
            "Auth read bytes" => stats.auth_read = value,
            _ => {}
        }
    }
    stats
}

/// Column positions inside a `CLIENT_LIST` row.
#[derive(Debug, Clone, PartialEq)]
struct ClientListLayout {
    common_name: Option<usize>,
    real_address: Option<usize>,
    virtual_address: Option<usize>,
    virtual_ipv6_address: Option<usize>,
    bytes_received: usize,
    bytes_sent: usize,
    connected_since: Option<usize>,
    connected_since_unix: Option<usize>,
    username: Option<usize>,
    client_id: Option<usize>,
    peer_id: Option<usize>,
    cipher: Option<usize>,
}

impl Default for ClientListLayout {
    /// 2.4+ column order.
    fn default() -> Self {
        Self {
            common_name: Some(1),
            real_address: Some(2),
            virtual_address: Some(3),
            virtual_ipv6_address: Some(4),
            bytes_received: 5,
            bytes_sent: 6,
            connected_since: Some(7),
            connected_since_unix: Some(8),
            username: Some(9),
            client_id: Some(10),
            peer_id: Some(11),
            cipher: Some(12),
        }
    }
}

impl ClientListLayout {
    /// Build from `HEADER,CLIENT_LIST,<names…>`. Names sit one position to
    /// the right of their row columns because of the leading `HEADER`.
    fn from_header(fields: &[&str]) -> Option<Self> {
        let column = |name: &str| {
            fields
                .iter()
                .skip(2)
                .position(|f| f.trim() == name)
                .map(|i| i + 1)
        };
        Some(Self {
            common_name: column("Common Name"),
            real_address: column("Real Address"),
            virtual_address: column("Virtual Address"),
            virtual_ipv6_address: column("Virtual IPv6 Address"),
            bytes_received: column("Bytes Received")?,
            bytes_sent: column("Bytes Sent")?,
            connected_since: column("Connected Since"),
            connected_since_unix: column("Connected Since (time_t)"),
            username: column("Username"),
            client_id: column("Client ID"),
            peer_id: column("Peer ID"),
            cipher: column("Data Channel Cipher"),
        })
    }

    fn parse_row(&self, fields: &[&str]) -> Option<RemoteSession> {
        let text = |idx: Option<usize>| non_empty(idx.and_then(|i| fields.get(i).copied()));
        let number = |idx: Option<usize>| {
            idx.and_then(|i| fields.get(i))
                .and_then(|v| v.trim().parse::<u64>().ok())
        };
        let connected_since = number(self.connected_since_unix)
            .and_then(|t| from_unix(t as i64))
            .or_else(|| text(self.connected_since).as_deref().and_then(parse_ctime));

        Some(RemoteSession {
            client_id: number(self.client_id),
            common_name: text(self.common_name),
            real_address: text(self.real_address),
            virtual_address: text(self.virtual_address),
            virtual_ipv6_address: text(self.virtual_ipv6_address),
            bytes_received: number(Some(self.bytes_received))?,
            bytes_sent: number(Some(self.bytes_sent))?,
            connected_since,
            username: text(self.username).filter(|u| u != "UNDEF"),
            peer_id: number(self.peer_id),
            cipher: text(self.cipher),
        })
    }
}

fn split_record(line: &str) -> Vec<&str> {
    if line.contains('\t') {
        line.split('\t').collect()
    } else {
        line.split(',').collect()
    }
}

fn parse_client_list(lines: &[&str]) -> Vec<SessionStats> {
    let mut layout = ClientListLayout::default();
    let mut sessions = Vec::new();

    for line in lines {
        let fields = split_record(line);
        match (fields.first().copied(), fields.get(1).copied()) {
            (Some("HEADER"), Some("CLIENT_LIST")) => match ClientListLayout::from_header(&fields) {
                Some(l) => layout = l,
                None => warn!("CLIENT_LIST header without byte counters, keeping default layout: {}", line),
            },
            (Some("CLIENT_LIST"), _) => match layout.parse_row(&fields) {
                Some(s) => sessions.push(SessionStats::Remote(s)),
                None => warn!("Skipping unreadable CLIENT_LIST row: {}", line),
            },
            _ => {}
        }
    }
    sessions
}

/// `status 1`: a `Common Name,Real Address,Bytes Received,Bytes Sent,Connected Since`
/// table, then a routing table whose virtual addresses are attached by real address.
fn parse_legacy_client_list(lines: &[&str]) -> Vec<SessionStats> {
    #[derive(PartialEq)]
    enum Section {
        Preamble,
        Clients,
        Routes,
        Done,
    }

    let mut section = Section::Preamble;
    let mut sessions: Vec<RemoteSession> = Vec::new();
    let mut routes: HashMap<String, String> = HashMap::new();

    for line in lines {
        if line.starts_with("Common Name,") {
            section = Section::Clients;
            continue;
        }
        if line.starts_with("ROUTING TABLE") {
            section = Section::Routes;
            continue;
        }
        if line.starts_with("GLOBAL STATS") {
            section = Section::Done;
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        match section {
            Section::Clients => {
                let parsed = if fields.len() >= 5 {
                    match (fields[2].trim().parse(), fields[3].trim().parse()) {
                        (Ok(rx), Ok(tx)) => Some(RemoteSession {
                            common_name: non_empty(Some(fields[0])),
                            real_address: non_empty(Some(fields[1])),
                            bytes_received: rx,
                            bytes_sent: tx,
                            connected_since: parse_ctime(fields[4]),
                            ..Default::default()
                        }),
                        _ => None,
                    }
                } else {
                    None
                };
                match parsed {
                    Some(s) => sessions.push(s),
                    None => warn!("Skipping unreadable client row: {}", line),
                }
            }
            Section::Routes => {
                if fields.len() >= 3 && fields[0] != "Virtual Address" {
                    routes
                        .entry(fields[2].trim().to_string())
                        .or_insert_with(|| fields[0].trim().to_string());
                }
            }
            Section::Preamble | Section::Done => {}
        }
    }

    sessions
        .into_iter()
        .map(|mut s| {
            if let Some(real) = &s.real_address {
                s.virtual_address = routes.get(real).cloned();
            }
            SessionStats::Remote(s)
        })
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lines that belong to a reply body: not blank, not `END`, not a `>` notification.
fn is_payload_line(line: &str) -> bool {
    !line.is_empty() && line != "END" && !line.starts_with('>')
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

/// `Thu Jun 18 04:23:03 2009` (server local time, taken as UTC).
fn parse_ctime(s: &str) -> Option<DateTime<Utc>> {
    let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
    NaiveDateTime::parse_from_str(&normalized, "%a %b %d %H:%M:%S %Y")
        .ok()
        .map(|n| n.and_utc())
}
