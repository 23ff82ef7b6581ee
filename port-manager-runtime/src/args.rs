use anyhow::{Context, Result};
use clap::Parser;
use port_manager::{OpenAction, Visibility};
use port_manager_config::RawConfigEntry;
use std::str::FromStr;

/// CLI entry point for the port manager daemon.
///
/// Mirrors the teacher's `runtime::Args` shape one-for-one: a log
/// level/format pair plus the flags a particular deployment needs, parsed
/// with `clap`'s derive API (`policy-controller/runtime/src/args.rs`).
#[derive(Debug, Parser)]
#[clap(name = "port-managerd", about = "Workspace port reconciliation daemon")]
pub struct Args {
    #[clap(long, default_value = "info", env = "PORT_MANAGER_LOG")]
    pub log_level: String,

    #[clap(long, default_value = "plain")]
    pub log_format: LogFormat,

    /// Ports the supervisor itself occupies; never surfaced to
    /// subscribers (spec §3 `InternalPorts`).
    #[clap(long, value_delimiter = ',')]
    pub internal_port: Vec<u16>,

    /// Repository-checked-in workspace port configuration, as
    /// `port[:onOpen[:visibility]]` (e.g. `8080:open-browser`,
    /// `9229:ignore:private`). May be repeated.
    #[clap(long = "workspace-port")]
    pub workspace_ports: Vec<PortSpecArg>,

    /// Ad-hoc instance port or range configuration, same grammar as
    /// `--workspace-port` but the port field may also be a `start-end`
    /// range (e.g. `4000-5000:open-browser:public`).
    #[clap(long = "instance-port")]
    pub instance_ports: Vec<PortSpecArg>,

    #[clap(long, default_value_t = 60000)]
    pub allocator_range_high: u16,

    #[clap(long, default_value_t = 50000)]
    pub allocator_range_low: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    Plain,
    Json,
}

/// A single `--workspace-port`/`--instance-port` value: `spec[:onOpen[:
/// visibility]]`. Parsing the `spec` half (single port or inclusive range)
/// is deferred to `port_manager_config`; this type only splits the
/// colon-delimited suffix, the same division of labor the teacher's
/// `IpNets` newtype uses for its own comma-delimited CLI values
/// (`runtime/src/args.rs`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortSpecArg(pub RawConfigEntry);

impl FromStr for PortSpecArg {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, ':');
        let port_spec = parts
            .next()
            .context("empty port specification")?
            .to_string();
        let mut entry = RawConfigEntry::new(port_spec);

        if let Some(on_open) = parts.next() {
            entry = entry.with_on_open(parse_open_action(on_open)?);
        }
        if let Some(visibility) = parts.next() {
            entry = entry.with_visibility(parse_visibility(visibility)?);
        }
        Ok(PortSpecArg(entry))
    }
}

fn parse_open_action(s: &str) -> Result<OpenAction> {
    match s {
        "open-browser" => Ok(OpenAction::OpenBrowser),
        "notify" => Ok(OpenAction::Notify),
        "notify-private" => Ok(OpenAction::NotifyPrivate),
        "ignore" => Ok(OpenAction::Ignore),
        other => anyhow::bail!("unknown onOpen action: {other:?}"),
    }
}

fn parse_visibility(s: &str) -> Result<Visibility> {
    match s {
        "public" => Ok(Visibility::Public),
        "private" => Ok(Visibility::Private),
        other => anyhow::bail!("unknown visibility: {other:?}"),
    }
}
