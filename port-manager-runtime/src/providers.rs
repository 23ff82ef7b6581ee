//! Channel-backed stand-ins for the served-ports, exposed-ports, and config
//! providers (spec §6 "out of scope, interfaces only"). Each is driven by a
//! `Driver` the binary's own admin/demo surface can push new snapshots
//! into, giving `port-managerd` something real to reconcile without
//! depending on a kernel socket scanner or a control-plane client that are
//! both out of this crate's scope.

use async_trait::async_trait;
use parking_lot::Mutex;
use port_manager::{
    ConfigObserver, Configs, Error, ExposedPort, ExposedPortsClient, ExposedPortsObserver,
    ServedPort, ServedPortsObserver,
};
use tokio::sync::mpsc;

const CHANNEL_CAPACITY: usize = 16;

struct Relay<T> {
    rx: Mutex<Option<mpsc::Receiver<anyhow::Result<T>>>>,
}

impl<T: Send + 'static> Relay<T> {
    fn new() -> (Self, mpsc::Sender<anyhow::Result<T>>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        (
            Self {
                rx: Mutex::new(Some(rx)),
            },
            tx,
        )
    }

    fn take(&self) -> mpsc::Receiver<anyhow::Result<T>> {
        self.rx
            .lock()
            .take()
            .expect("provider's observe() called more than once")
    }
}

/// A sender pair handed back alongside each demo provider, letting the
/// binary's own admin surface (or a test) push fresh snapshots in.
pub struct Driver<T> {
    tx: mpsc::Sender<anyhow::Result<T>>,
}

impl<T> Clone for Driver<T> {
    fn clone(&self) -> Self {
        Driver { tx: self.tx.clone() }
    }
}

impl<T: Send + 'static> Driver<T> {
    pub async fn push(&self, snapshot: T) {
        if self.tx.send(Ok(snapshot)).await.is_err() {
            tracing::warn!("provider channel closed; snapshot dropped");
        }
    }
}

pub struct DemoServedPorts(Relay<Vec<ServedPort>>);

impl DemoServedPorts {
    pub fn new() -> (Self, Driver<Vec<ServedPort>>) {
        let (relay, tx) = Relay::new();
        (Self(relay), Driver { tx })
    }
}

impl ServedPortsObserver for DemoServedPorts {
    fn observe(&self) -> mpsc::Receiver<anyhow::Result<Vec<ServedPort>>> {
        self.0.take()
    }
}

pub struct DemoConfig(Relay<Configs>);

impl DemoConfig {
    pub fn new() -> (Self, Driver<Configs>) {
        let (relay, tx) = Relay::new();
        (Self(relay), Driver { tx })
    }
}

impl ConfigObserver for DemoConfig {
    fn observe(&self) -> mpsc::Receiver<anyhow::Result<Configs>> {
        self.0.take()
    }
}

/// A demo exposed-ports provider: `Expose` requests are recorded and
/// immediately reflected back through `Observe`, since there is no real
/// control-plane here to round-trip through (spec §6 treats the real
/// provider's `Expose`→`Observe` round trip as an external collaborator
/// concern).
pub struct DemoExposedPorts {
    relay: Relay<Vec<ExposedPort>>,
    state: Mutex<Vec<ExposedPort>>,
    echo_tx: mpsc::Sender<anyhow::Result<Vec<ExposedPort>>>,
}

impl DemoExposedPorts {
    pub fn new() -> (Self, Driver<Vec<ExposedPort>>) {
        let (relay, tx) = Relay::new();
        let echo_tx = tx.clone();
        (
            Self {
                relay,
                state: Mutex::new(Vec::new()),
                echo_tx,
            },
            Driver { tx },
        )
    }
}

impl ExposedPortsObserver for DemoExposedPorts {
    fn observe(&self) -> mpsc::Receiver<anyhow::Result<Vec<ExposedPort>>> {
        self.relay.take()
    }
}

#[async_trait]
impl ExposedPortsClient for DemoExposedPorts {
    async fn expose(&self, local: u16, global: u16, public: bool) -> Result<(), Error> {
        let mut state = self.state.lock();
        state.retain(|e| e.local_port != local);
        state.push(ExposedPort {
            local_port: local,
            global_port: global,
            public,
            url: format!("https://{global}.demo.invalid"),
        });
        let snapshot = state.clone();
        drop(state);

        if self.echo_tx.send(Ok(snapshot)).await.is_err() {
            tracing::warn!(local, global, "exposed-ports channel closed; expose not reflected");
        }
        Ok(())
    }
}
