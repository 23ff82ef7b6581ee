//! The port manager's data model (spec §3).

/// A local TCP port a user process is currently listening on.
///
/// Emitted as a *complete set* by the served-ports provider on every change;
/// the manager treats each emission as the authoritative current set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ServedPort {
    pub port: u16,
    pub bound_to_localhost_only: bool,
}

/// A port for which the control-plane currently has an exposure record.
///
/// Also emitted as a complete set on every change.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ExposedPort {
    pub local_port: u16,
    pub global_port: u16,
    pub public: bool,
    pub url: String,
}

/// What should happen in the client when a port is first detected as open.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum OpenAction {
    OpenBrowser,
    Notify,
    NotifyPrivate,
    Ignore,
    #[default]
    Unspecified,
}

impl OpenAction {
    /// Resolves an unspecified action to the spec's default (`notify-private`).
    pub fn or_default(self) -> Self {
        match self {
            OpenAction::Unspecified => OpenAction::NotifyPrivate,
            other => other,
        }
    }
}

/// Whether a port's exposure should be reachable without authentication.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Visibility {
    #[default]
    Private,
    Public,
}

/// A single resolved configuration entry (from a workspace port, an instance
/// single port, or a matched instance range).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConfigEntry {
    pub on_open: OpenAction,
    pub visibility: Visibility,
}

impl Default for ConfigEntry {
    fn default() -> Self {
        Self {
            on_open: OpenAction::NotifyPrivate,
            visibility: Visibility::Private,
        }
    }
}

/// A port declared in repository-checked-in workspace configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PortConfig {
    pub port: u16,
    pub on_open: OpenAction,
    pub visibility: Visibility,
}

/// A single port or inclusive range declared in ad-hoc instance
/// configuration.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RangeConfig {
    pub start: u16,
    pub end: u16,
    pub on_open: OpenAction,
    pub visibility: Visibility,
}

impl RangeConfig {
    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }

    pub fn entry(&self) -> ConfigEntry {
        ConfigEntry {
            on_open: self.on_open,
            visibility: self.visibility,
        }
    }
}

/// The exposure-derived fields folded onto a `PortStatus`, once an exposure
/// and the manager's expected global port agree (spec §4.A step 2, §9 open
/// question).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExposedStatus {
    pub url: String,
    pub visibility: Visibility,
    /// `on_open`, remapped per invariant 4: `notify` + `private` visibility
    /// is reported as `notify-private`.
    pub on_exposed: OpenAction,
}

/// The derived, subscriber-visible state of a single local port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortStatus {
    pub local_port: u16,
    pub global_port: u16,
    pub served: bool,
    pub exposed: Option<ExposedStatus>,
}

impl PortStatus {
    pub fn new(local_port: u16, global_port: u16) -> Self {
        Self {
            local_port,
            global_port,
            served: false,
            exposed: None,
        }
    }
}

/// A diff between two consecutive port-status snapshots, exactly one
/// snapshot apart.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Diff {
    pub added: Vec<PortStatus>,
    pub updated: Vec<PortStatus>,
    pub removed: Vec<u16>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// Merges `next` onto `self` for subscription-hub coalescing (spec
    /// §4.C): a later `removed` cancels an earlier `added`/`updated` for the
    /// same port and vice versa; a later `added`/`updated` supersedes an
    /// earlier one for the same port.
    pub fn coalesce(mut self, next: Diff) -> Diff {
        use std::collections::BTreeMap;

        #[derive(Clone)]
        enum Slot {
            Added(PortStatus),
            Updated(PortStatus),
            Removed,
        }

        let mut by_port: BTreeMap<u16, Slot> = BTreeMap::new();

        for status in self.added.drain(..) {
            by_port.insert(status.local_port, Slot::Added(status));
        }
        for status in self.updated.drain(..) {
            by_port.insert(status.local_port, Slot::Updated(status));
        }
        for port in self.removed.drain(..) {
            by_port.insert(port, Slot::Removed);
        }

        for status in next.added {
            let port = status.local_port;
            let merged = match by_port.remove(&port) {
                // A port added then (in the next diff) added/updated again
                // is still, overall, newly added to the subscriber.
                Some(Slot::Added(_)) | None => Slot::Added(status),
                Some(Slot::Updated(_)) => Slot::Updated(status),
                Some(Slot::Removed) => Slot::Added(status),
            };
            by_port.insert(port, merged);
        }
        for status in next.updated {
            let port = status.local_port;
            let merged = match by_port.remove(&port) {
                Some(Slot::Added(_)) => Slot::Added(status),
                Some(Slot::Updated(_)) | None => Slot::Updated(status),
                Some(Slot::Removed) => Slot::Updated(status),
            };
            by_port.insert(port, merged);
        }
        for port in next.removed {
            match by_port.remove(&port) {
                // Added-then-removed within the coalesced window cancels out
                // entirely: the subscriber never saw the port exist.
                Some(Slot::Added(_)) => {}
                Some(Slot::Updated(_)) | Some(Slot::Removed) | None => {
                    by_port.insert(port, Slot::Removed);
                }
            };
        }

        let mut out = Diff::default();
        for (port, slot) in by_port {
            match slot {
                Slot::Added(status) => out.added.push(status),
                Slot::Updated(status) => out.updated.push(status),
                Slot::Removed => out.removed.push(port),
            }
        }
        out
    }
}
