#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Domain types and observer/provider contracts for the port manager.
//!
//! This crate has no tokio runtime dependency beyond `sync` and performs no
//! I/O of its own: it is imported by both the reconciliation engine and by
//! whatever concrete providers a binary wires in.

mod error;
mod model;
mod observe;
pub mod ports;

pub use error::Error;
pub use model::{
    ConfigEntry, Diff, ExposedPort, ExposedStatus, OpenAction, PortConfig, PortStatus,
    RangeConfig, ServedPort, Visibility,
};
pub use observe::{
    ConfigObserver, Configs, ExposedPortsClient, ExposedPortsObserver, ExposedPortsProvider,
    ProxyHandle, ProxyStarter, ServedPortsObserver,
};

pub type Result<T, E = Error> = std::result::Result<T, E>;
