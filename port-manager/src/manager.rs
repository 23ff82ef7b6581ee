//! The reconciliation loop (spec §4.A): the single-writer consumer of the
//! served, exposed, and config streams. Owns the derived state table, the
//! proxy registry, the global-port allocator, and the subscription hub, and
//! is the only entity that mutates any of them (spec §5, §9).

use crate::allocator::GlobalPortAllocator;
use crate::diff;
use crate::proxy_registry::ProxyRegistry;
use crate::subscription::{Subscription, SubscriptionHub, DEFAULT_SUBSCRIBER_CAPACITY};
use port_manager_core::ports::{PortMap, PortSet};
use port_manager_core::{
    ConfigObserver, Configs, Diff, ExposedPort, ExposedPortsProvider, ExposedStatus, OpenAction,
    PortStatus, ProxyStarter, ServedPort, ServedPortsObserver, Visibility,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

/// A cheap, cloneable handle for interacting with a running `Manager` from
/// other tasks, without touching its internal state directly (spec §9:
/// "Subscription register/unregister flow through the same multiplex").
#[derive(Clone)]
pub struct ManagerHandle {
    subscribe_tx: mpsc::Sender<oneshot::Sender<Subscription>>,
    status_rx: watch::Receiver<Vec<PortStatus>>,
}

impl ManagerHandle {
    /// Registers a new subscription. Idempotent in the sense that calling
    /// it repeatedly always yields a fresh, independent subscription (spec
    /// §4.A "Subscribe() -> Subscription — idempotent").
    pub async fn subscribe(&self) -> Option<Subscription> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.subscribe_tx.send(reply_tx).await.ok()?;
        reply_rx.await.ok()
    }

    /// A snapshot of the current state, sorted by local port ascending
    /// (spec §4.A `Status()`).
    pub fn status(&self) -> Vec<PortStatus> {
        self.status_rx.borrow().clone()
    }
}

pub struct Manager {
    served_rx: mpsc::Receiver<anyhow::Result<Vec<ServedPort>>>,
    exposed_rx: mpsc::Receiver<anyhow::Result<Vec<ExposedPort>>>,
    config_rx: mpsc::Receiver<anyhow::Result<Configs>>,
    subscribe_rx: mpsc::Receiver<oneshot::Sender<Subscription>>,

    hub: SubscriptionHub,
    status_tx: watch::Sender<Vec<PortStatus>>,

    exposed_client: Arc<dyn ExposedPortsProvider>,
    proxy_starter: Arc<dyn ProxyStarter>,

    internal_ports: PortSet,
    served: Vec<ServedPort>,
    exposed: Vec<ExposedPort>,
    configs: Configs,

    table: PortMap<PortStatus>,
    allocator: GlobalPortAllocator,
    proxies: ProxyRegistry,
}

impl Manager {
    /// Construction inputs: exposed-observer (and its `Expose` client
    /// capability, on the same object), served-observer, config-observer,
    /// an internal-ports set, and a proxy-starter factory (spec §4.A).
    pub fn new(
        exposed: Arc<dyn ExposedPortsProvider>,
        served: Arc<dyn ServedPortsObserver>,
        config: Arc<dyn ConfigObserver>,
        internal_ports: PortSet,
        proxy_starter: Arc<dyn ProxyStarter>,
    ) -> (Manager, ManagerHandle) {
        Self::with_allocator(
            exposed,
            served,
            config,
            internal_ports,
            proxy_starter,
            GlobalPortAllocator::default(),
        )
    }

    /// As [`Manager::new`], but with an explicit global-port allocator
    /// range instead of the default 60000…50000 (spec §4.E).
    pub fn with_allocator(
        exposed: Arc<dyn ExposedPortsProvider>,
        served: Arc<dyn ServedPortsObserver>,
        config: Arc<dyn ConfigObserver>,
        internal_ports: PortSet,
        proxy_starter: Arc<dyn ProxyStarter>,
        allocator: GlobalPortAllocator,
    ) -> (Manager, ManagerHandle) {
        let served_rx = served.observe();
        let exposed_rx = exposed.observe();
        let config_rx = config.observe();
        let (subscribe_tx, subscribe_rx) = mpsc::channel(8);
        let (status_tx, status_rx) = watch::channel(Vec::new());

        let manager = Manager {
            served_rx,
            exposed_rx,
            config_rx,
            subscribe_rx,
            hub: SubscriptionHub::new(DEFAULT_SUBSCRIBER_CAPACITY),
            status_tx,
            exposed_client: exposed,
            proxy_starter,
            internal_ports,
            served: Vec::new(),
            exposed: Vec::new(),
            configs: Configs::default(),
            table: PortMap::default(),
            allocator,
            proxies: ProxyRegistry::new(),
        };
        let handle = ManagerHandle {
            subscribe_tx,
            status_rx,
        };
        (manager, handle)
    }

    /// Blocks until all three source channels are drained, multiplexing
    /// over them plus subscriber lifecycle events (spec §4.A, §5). At
    /// shutdown every proxy is closed and every subscriber is released.
    pub async fn run(mut self) {
        let mut served_open = true;
        let mut exposed_open = true;
        let mut config_open = true;
        let mut subscribe_open = true;

        while served_open || exposed_open || config_open {
            tokio::select! {
                msg = self.served_rx.recv(), if served_open => {
                    match msg {
                        Some(Ok(set)) => {
                            self.served = set
                                .into_iter()
                                .filter(|p| !self.internal_ports.contains(&p.port))
                                .collect();
                            self.reconcile().await;
                        }
                        Some(Err(source)) => {
                            let error = port_manager_core::Error::ServedObserve(source);
                            tracing::warn!(%error, "continuing with the previous served set");
                        }
                        None => served_open = false,
                    }
                }
                msg = self.exposed_rx.recv(), if exposed_open => {
                    match msg {
                        Some(Ok(set)) => {
                            self.exposed = set
                                .into_iter()
                                .filter(|p| !self.internal_ports.contains(&p.local_port))
                                .collect();
                            self.reconcile().await;
                        }
                        Some(Err(source)) => {
                            let error = port_manager_core::Error::ExposedObserve(source);
                            tracing::warn!(%error, "continuing with the previous exposed set");
                        }
                        None => exposed_open = false,
                    }
                }
                msg = self.config_rx.recv(), if config_open => {
                    match msg {
                        Some(Ok(configs)) => {
                            self.configs = configs;
                            self.reconcile().await;
                        }
                        Some(Err(source)) => {
                            let error = port_manager_core::Error::ConfigObserve(source);
                            tracing::warn!(%error, "continuing with the previous configuration");
                        }
                        None => config_open = false,
                    }
                }
                msg = self.subscribe_rx.recv(), if subscribe_open => {
                    match msg {
                        Some(reply) => {
                            let mut initial = Diff {
                                added: self.table.values().cloned().collect(),
                                ..Default::default()
                            };
                            initial.added.sort_by_key(|s| s.local_port);
                            let sub = self.hub.register(initial);
                            let _ = reply.send(sub);
                        }
                        None => subscribe_open = false,
                    }
                }
                Some(id) = self.hub.unregister_rx.recv() => {
                    self.hub.unregister(id);
                }
            }
        }

        tracing::info!("all port sources closed; shutting down");
        self.proxies.close_all();
        self.hub.close_all();
    }

    /// The reconciliation algorithm (spec §4.A steps 2–4): recompute the
    /// derived state table, apply proxy/expose side effects, diff against
    /// the previous table, and publish.
    async fn reconcile(&mut self) {
        let span = tracing::info_span!("reconcile");
        let _enter = span.enter();

        let served_by_port: PortMap<bool> = self
            .served
            .iter()
            .filter(|sp| !self.allocator.is_allocated(sp.port))
            .map(|sp| (sp.port, sp.bound_to_localhost_only))
            .collect();

        let mut candidates: BTreeSet<u16> = BTreeSet::new();
        candidates.extend(served_by_port.keys().copied());
        candidates.extend(self.exposed.iter().map(|e| e.local_port));
        candidates.extend(self.configs.configured_single_ports());
        candidates.retain(|port| !self.internal_ports.contains(port));

        let needs_proxy: BTreeSet<u16> = candidates
            .iter()
            .copied()
            .filter(|port| *served_by_port.get(port).unwrap_or(&false))
            .collect();

        // Release proxies for ports that no longer need one, returning
        // their global ports to the allocator.
        let stale: Vec<u16> = self
            .table
            .keys()
            .copied()
            .filter(|port| !needs_proxy.contains(port) && self.proxies.contains(*port))
            .collect();
        for port in stale {
            if let Some(global) = self.proxies.global_port_for(port) {
                self.proxies.release(port);
                self.allocator.release(global);
            }
        }

        // Ports a proxy global port must never collide with: ports a user
        // process is currently bound to (raw, unfiltered) and internal
        // ports (spec §4.E).
        let excluded: PortSet = self
            .served
            .iter()
            .map(|p| p.port)
            .chain(self.internal_ports.iter().copied())
            .collect();

        // Assign proxies in ascending local-port order for deterministic
        // allocation (spec §4.A "Tie-breaking and edge cases").
        for &port in &needs_proxy {
            if self.proxies.global_port_for(port).is_some() {
                continue;
            }
            let global = match self.allocator.allocate(&excluded) {
                Ok(global) => global,
                Err(error) => {
                    tracing::warn!(local = port, %error, "no global port available for proxy");
                    continue;
                }
            };
            if let Err(error) = self.proxies.ensure(self.proxy_starter.as_ref(), port, global).await {
                tracing::warn!(local = port, global, %error, "failed to start local proxy");
                self.allocator.release(global);
            }
        }

        let mut new_table: PortMap<PortStatus> = PortMap::default();
        for &port in &candidates {
            let served = served_by_port.contains_key(&port);
            let bound_loopback_only = *served_by_port.get(&port).unwrap_or(&false);

            let (global, effective_served) = if served && bound_loopback_only {
                match self.proxies.global_port_for(port) {
                    Some(global) => (global, true),
                    None => (port, false),
                }
            } else if served {
                (port, true)
            } else if let Some(exposure) = self.exposed.iter().find(|e| e.local_port == port) {
                (exposure.global_port, false)
            } else {
                (port, false)
            };

            let exposed_status = self
                .exposed
                .iter()
                .find(|e| e.local_port == port && e.global_port == global)
                .map(|exposure| {
                    // Visibility reflects what the provider actually reports for
                    // this exposure, not a configured target: the two can
                    // disagree while an Expose() request is in flight.
                    let visibility = if exposure.public {
                        Visibility::Public
                    } else {
                        Visibility::Private
                    };
                    let on_open = self
                        .configs
                        .lookup(port)
                        .unwrap_or_default()
                        .on_open;
                    ExposedStatus {
                        url: exposure.url.clone(),
                        visibility,
                        on_exposed: remap_on_exposed(on_open, visibility),
                    }
                });

            new_table.insert(
                port,
                PortStatus {
                    local_port: port,
                    global_port: global,
                    served: effective_served,
                    exposed: exposed_status,
                },
            );
        }

        self.submit_exposure_requests(&new_table).await;

        let change = diff::compute(&self.table, &new_table);
        self.table = new_table;
        let _ = self.status_tx.send({
            let mut snapshot: Vec<PortStatus> = self.table.values().cloned().collect();
            snapshot.sort_by_key(|s| s.local_port);
            snapshot
        });

        if !change.is_empty() {
            self.hub.publish(&change);
        }
    }

    /// Submits a fresh `Expose` request wherever the target
    /// `(globalPort, public)` disagrees with what the exposed-provider last
    /// reflected and the port is configured, newly served, or was just
    /// reassigned a different global port (spec §4.A step 3).
    ///
    /// When a port has no configuration at all, its target visibility
    /// preserves whatever the exposed-provider already reflects instead of
    /// defaulting to private — otherwise an out-of-band public exposure
    /// with no matching config would be fought back to private on every
    /// reconciliation (spec §9 Open Question; see DESIGN.md).
    async fn submit_exposure_requests(&self, new_table: &PortMap<PortStatus>) {
        for (&port, status) in new_table {
            let target_public = match self.configs.lookup(port) {
                Some(config) => config.visibility == Visibility::Public,
                None => self
                    .exposed
                    .iter()
                    .find(|e| e.local_port == port)
                    .map(|e| e.public)
                    .unwrap_or(false),
            };

            let matches_existing = self.exposed.iter().any(|e| {
                e.local_port == port && e.global_port == status.global_port && e.public == target_public
            });
            if matches_existing {
                continue;
            }

            let configured = self.configs.configures(port);
            let became_served = status.served
                && !self.table.get(&port).map(|old| old.served).unwrap_or(false);
            let global_reassigned = status.served
                && self
                    .table
                    .get(&port)
                    .map(|old| old.global_port != status.global_port)
                    .unwrap_or(false);

            if !(configured || became_served || global_reassigned) {
                continue;
            }

            if let Err(error) = self
                .exposed_client
                .expose(port, status.global_port, target_public)
                .await
            {
                tracing::warn!(local = port, global = status.global_port, %error, "expose request failed; will retry on next change");
            }
        }
    }
}

/// Invariant 4: `notify` downgrades to `notify-private` under private
/// visibility; every other action (and the unspecified default) passes
/// through unchanged.
fn remap_on_exposed(on_open: OpenAction, visibility: Visibility) -> OpenAction {
    let resolved = on_open.or_default();
    if resolved == OpenAction::Notify && visibility == Visibility::Private {
        OpenAction::NotifyPrivate
    } else {
        resolved
    }
}
