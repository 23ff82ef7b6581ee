#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Bootstrap glue: CLI parsing, tracing initialization, and provider wiring
//! for the port manager daemon. Analogous to `policy-controller/src` +
//! `policy-controller/runtime` in the teacher: the reconciliation engine
//! itself lives in the library crates, this crate only assembles and runs
//! it.

mod args;
mod providers;

pub use args::{Args, LogFormat, PortSpecArg};
pub use providers::{DemoConfig, DemoExposedPorts, DemoServedPorts, Driver};

use port_manager::{GlobalPortAllocator, Manager, ManagerHandle, PortSet};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

impl Args {
    /// Parses `std::env::args`, initializes tracing, and runs the
    /// reconciliation engine to completion. Mirrors the teacher's
    /// `Args::parse_and_run` entry point (`runtime/src/args.rs`).
    pub async fn parse_and_run() -> anyhow::Result<()> {
        let args = <Args as clap::Parser>::parse();
        args.init_tracing();
        args.run().await
    }

    fn init_tracing(&self) {
        let filter = EnvFilter::try_new(&self.log_level).unwrap_or_else(|error| {
            eprintln!(
                "invalid --log-level {:?} ({error}); falling back to \"info\"",
                self.log_level
            );
            EnvFilter::new("info")
        });
        let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
        match self.log_format {
            LogFormat::Plain => subscriber.init(),
            LogFormat::Json => subscriber.json().init(),
        }
    }

    async fn run(self) -> anyhow::Result<()> {
        let internal_ports: PortSet = self.internal_port.iter().copied().collect();

        let workspace_entries: Vec<_> = self.workspace_ports.iter().map(|p| p.0.clone()).collect();
        let instance_entries: Vec<_> = self.instance_ports.iter().map(|p| p.0.clone()).collect();
        let workspace = port_manager_config::parse_workspace(&workspace_entries);
        let (single, ranges) = port_manager_config::parse_instance(&instance_entries);
        let initial_configs = port_manager::Configs {
            workspace,
            single,
            ranges,
        };

        let (served, served_driver) = DemoServedPorts::new();
        let (exposed, exposed_driver) = DemoExposedPorts::new();
        let (config, config_driver) = DemoConfig::new();
        config_driver.push(initial_configs).await;

        let allocator = GlobalPortAllocator::new(self.allocator_range_high, self.allocator_range_low);
        let proxy_starter = Arc::new(LoggingProxyStarter);

        let (manager, handle) = Manager::with_allocator(
            Arc::new(exposed),
            Arc::new(served),
            Arc::new(config),
            internal_ports,
            proxy_starter,
            allocator,
        );

        tracing::info!("port manager starting");
        let run = tokio::spawn(manager.run());
        log_status_forever(handle.clone());

        tokio::signal::ctrl_c().await.ok();
        tracing::info!("shutdown signal received; closing provider channels");

        // Closing the drivers (and then the handle) is what lets the
        // manager's source channels drain and `Run()` return (spec §5
        // "the Manager exits when all three source channels are closed").
        drop(served_driver);
        drop(exposed_driver);
        drop(config_driver);
        drop(handle);

        run.await?;
        Ok(())
    }
}

fn log_status_forever(handle: ManagerHandle) {
    tokio::spawn(async move {
        let Some(mut sub) = handle.subscribe().await else {
            return;
        };
        while let Some(diff) = sub.recv().await {
            tracing::info!(
                added = diff.added.len(),
                updated = diff.updated.len(),
                removed = diff.removed.len(),
                "port status changed"
            );
        }
    });
}

/// A proxy starter that logs instead of opening a real socket forwarder —
/// opening TCP listeners is explicitly out of scope for this crate (spec
/// §1 "it does not... run TCP listeners").
struct LoggingProxyStarter;

#[async_trait::async_trait]
impl port_manager::ProxyStarter for LoggingProxyStarter {
    async fn start(
        &self,
        local: u16,
        global: u16,
    ) -> port_manager::Result<Box<dyn port_manager::ProxyHandle>> {
        tracing::info!(local, global, "proxy would start here");
        Ok(Box::new(LoggingProxyHandle { local, global }))
    }
}

struct LoggingProxyHandle {
    local: u16,
    global: u16,
}

impl port_manager::ProxyHandle for LoggingProxyHandle {
    fn close(self: Box<Self>) {
        tracing::info!(local = self.local, global = self.global, "proxy would close here");
    }
}
