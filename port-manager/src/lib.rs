#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! The port-manager reconciliation engine (spec §4): combines the served,
//! exposed, and config observer streams into a single derived port-status
//! table and broadcasts diffs to subscribers.

mod allocator;
mod diff;
mod manager;
mod proxy_registry;
mod subscription;

pub use allocator::{GlobalPortAllocator, DEFAULT_RANGE_HIGH, DEFAULT_RANGE_LOW};
pub use manager::{Manager, ManagerHandle};
pub use proxy_registry::ProxyRegistry;
pub use subscription::{Subscription, SubscriptionHub, DEFAULT_SUBSCRIBER_CAPACITY};

pub use port_manager_core::ports::{PortHasher, PortMap, PortSet};
pub use port_manager_core::{
    ConfigEntry, ConfigObserver, Configs, Diff, Error, ExposedPort, ExposedPortsClient,
    ExposedPortsObserver, ExposedPortsProvider, ExposedStatus, OpenAction, PortConfig,
    PortStatus, ProxyHandle, ProxyStarter, RangeConfig, Result, ServedPort, ServedPortsObserver,
    Visibility,
};
