#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Config parser / matcher (spec §4.B).
//!
//! Interprets raw workspace and instance port declarations — single ports
//! and inclusive ranges like `"4000-5000"` — into the two lookup
//! structures the manager reconciles against: a single-port map and an
//! ordered list of range configs. The parsing itself mirrors
//! `ports::parse_portset` from the policy controller's port-set parser
//! (split on `-`, reject non-increasing ranges, drop anything that doesn't
//! parse), generalized to carry an `OpenAction`/`Visibility` pair instead of
//! membership alone.

use port_manager_core::ports::PortMap;
use port_manager_core::{ConfigEntry, Error, OpenAction, RangeConfig, Visibility};

/// A single raw entry as read by a (separately, out-of-scope) config
/// provider, before parsing. `port_spec` is either a bare integer
/// (`"8080"`) or an inclusive range (`"4000-5000"`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawConfigEntry {
    pub port_spec: String,
    pub on_open: Option<OpenAction>,
    pub visibility: Option<Visibility>,
}

impl RawConfigEntry {
    pub fn new(port_spec: impl Into<String>) -> Self {
        Self {
            port_spec: port_spec.into(),
            on_open: None,
            visibility: None,
        }
    }

    pub fn with_on_open(mut self, action: OpenAction) -> Self {
        self.on_open = Some(action);
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = Some(visibility);
        self
    }

    fn entry(&self) -> ConfigEntry {
        ConfigEntry {
            on_open: self.on_open.unwrap_or_default().or_default(),
            visibility: self.visibility.unwrap_or_default(),
        }
    }
}

/// The result of parsing a single `port_spec` string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PortSpec {
    Single(u16),
    Range(u16, u16),
}

/// Parses `"4000-5000"` as an inclusive range or `"8080"` as a single port.
/// Malformed specs (non-numeric, zero, decreasing range) are rejected; the
/// caller drops the whole entry and continues with the rest, per spec §7
/// "Unparseable config entry".
fn parse_port_spec(s: &str) -> Result<PortSpec, String> {
    let s = s.trim();
    match s.split_once('-') {
        None => {
            let port: u16 = s.parse().map_err(|_| format!("not a port number: {s:?}"))?;
            if port == 0 {
                return Err("port 0 is not valid".to_string());
            }
            Ok(PortSpec::Single(port))
        }
        Some((floor, ceil)) => {
            let floor: u16 = floor
                .trim()
                .parse()
                .map_err(|_| format!("not a port number: {floor:?}"))?;
            let ceil: u16 = ceil
                .trim()
                .parse()
                .map_err(|_| format!("not a port number: {ceil:?}"))?;
            if floor == 0 || ceil == 0 {
                return Err("port 0 is not valid".to_string());
            }
            if floor > ceil {
                return Err(format!("range must be increasing: {floor}-{ceil}"));
            }
            Ok(PortSpec::Range(floor, ceil))
        }
    }
}

/// Parses workspace (repository-checked-in) configuration into `map<u16,
/// ConfigEntry>`. Workspace configuration only ever names single ports
/// (spec §3 `PortConfig`); an entry whose spec parses as a range is dropped
/// as unparseable in this context.
pub fn parse_workspace(entries: &[RawConfigEntry]) -> PortMap<ConfigEntry> {
    let mut out = PortMap::default();
    for raw in entries {
        match parse_port_spec(&raw.port_spec) {
            Ok(PortSpec::Single(port)) => {
                out.insert(port, raw.entry());
            }
            Ok(PortSpec::Range(..)) => {
                let error = Error::ConfigParse {
                    raw: raw.port_spec.clone(),
                    reason: "workspace port configuration does not support ranges".to_string(),
                };
                tracing::warn!(%error, "dropping entry");
            }
            Err(reason) => {
                let error = Error::ConfigParse {
                    raw: raw.port_spec.clone(),
                    reason,
                };
                tracing::warn!(%error, "dropping entry");
            }
        }
    }
    out
}

/// Parses instance (ad-hoc) configuration into `(singlePortConfigs,
/// rangeConfigs)`, preserving declaration order in the range list (spec
/// §4.B: "first containing range wins").
pub fn parse_instance(entries: &[RawConfigEntry]) -> (PortMap<ConfigEntry>, Vec<RangeConfig>) {
    let mut singles = PortMap::default();
    let mut ranges = Vec::new();
    for raw in entries {
        match parse_port_spec(&raw.port_spec) {
            Ok(PortSpec::Single(port)) => {
                singles.insert(port, raw.entry());
            }
            Ok(PortSpec::Range(start, end)) => {
                let entry = raw.entry();
                ranges.push(RangeConfig {
                    start,
                    end,
                    on_open: entry.on_open,
                    visibility: entry.visibility,
                });
            }
            Err(reason) => {
                let error = Error::ConfigParse {
                    raw: raw.port_spec.clone(),
                    reason,
                };
                tracing::warn!(%error, "dropping entry");
            }
        }
    }
    (singles, ranges)
}
