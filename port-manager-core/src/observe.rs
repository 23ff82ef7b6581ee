//! The observer/provider contracts described in spec §6.
//!
//! The source's `Observe(ctx) -> (chan T, chan error)` shape is folded into a
//! single channel of `Result<T, anyhow::Error>` per source: the manager's
//! `tokio::select!` loop wants exactly one receiver per source to multiplex
//! over, and `Result` already carries the "this emission is an error, keep
//! consuming" case spec §7 asks for. Cancellation is by `Drop`, the usual
//! idiom, rather than by an explicit context argument.

use crate::ports::PortMap;
use crate::{ConfigEntry, Error, ExposedPort, RangeConfig, ServedPort};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// The parsed configuration bundle the config provider emits on every
/// change (spec §4.B, §6).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Configs {
    /// Workspace (repository-checked-in) single-port configuration.
    pub workspace: PortMap<ConfigEntry>,
    /// Instance (ad-hoc) single-port configuration.
    pub single: PortMap<ConfigEntry>,
    /// Instance range configuration, in declaration order; first containing
    /// range wins on lookup.
    pub ranges: Vec<RangeConfig>,
}

impl Configs {
    /// Looks up the effective configuration for a port: workspace map, then
    /// single-port instance map, then the first containing range (spec
    /// §4.B "Lookup for a port P").
    pub fn lookup(&self, port: u16) -> Option<ConfigEntry> {
        self.workspace
            .get(&port)
            .or_else(|| self.single.get(&port))
            .copied()
            .or_else(|| {
                self.ranges
                    .iter()
                    .find(|range| range.contains(port))
                    .map(RangeConfig::entry)
            })
    }

    /// True if any workspace or instance configuration names this port,
    /// directly or via a range (used by the manager to decide whether a
    /// served-then-unserved port's entry should be retained — spec §4.A
    /// "Tie-breaking and edge cases").
    pub fn configures(&self, port: u16) -> bool {
        self.lookup(port).is_some()
    }

    /// All single ports named directly by workspace or instance
    /// configuration (not including range membership), used by the manager
    /// to build its candidate port set (spec §4.A step 2).
    pub fn configured_single_ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.workspace.keys().chain(self.single.keys()).copied()
    }
}

/// Streams the full current set of bound local TCP sockets on every change.
pub trait ServedPortsObserver: Send + Sync {
    fn observe(&self) -> mpsc::Receiver<anyhow::Result<Vec<ServedPort>>>;
}

/// Streams the full current set of control-plane exposure records on every
/// change.
pub trait ExposedPortsObserver: Send + Sync {
    fn observe(&self) -> mpsc::Receiver<anyhow::Result<Vec<ExposedPort>>>;
}

/// The one-shot command capability of the exposed-ports provider: an
/// idempotent request to expose a port. Success is visible only through a
/// subsequent `ExposedPortsObserver` emission, never through this call's
/// return value directly (spec §6).
#[async_trait]
pub trait ExposedPortsClient: Send + Sync {
    async fn expose(&self, local: u16, global: u16, public: bool) -> Result<(), Error>;
}

/// Streams the parsed configuration bundle on every change.
pub trait ConfigObserver: Send + Sync {
    fn observe(&self) -> mpsc::Receiver<anyhow::Result<Configs>>;
}

/// The full exposed-ports provider contract (spec §6): both capabilities —
/// `Observe` (stream in) and `Expose` (one-shot command out) — live on the
/// same collaborator, since the real control-plane client is a single
/// object that happens to implement both.
pub trait ExposedPortsProvider: ExposedPortsObserver + ExposedPortsClient {}
impl<T: ExposedPortsObserver + ExposedPortsClient> ExposedPortsProvider for T {}

/// A handle to a running local-to-global TCP proxy. Closing must be safe to
/// call exactly once; dropping without calling `close` is also safe (the
/// proxy is closed on drop) to match "closer invocation must be safe to call
/// exactly once" (spec §4.D) without forcing callers to track whether they
/// already closed it.
pub trait ProxyHandle: Send + Sync {
    fn close(self: Box<Self>);
}

/// Opens a TCP forwarder from a global port (all interfaces) to a
/// loopback-bound local port. The manager never communicates with the proxy
/// once started except via its handle (spec §6).
#[async_trait]
pub trait ProxyStarter: Send + Sync {
    async fn start(&self, local: u16, global: u16) -> Result<Box<dyn ProxyHandle>, Error>;
}
