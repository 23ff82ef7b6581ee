//! Proxy registry (spec §4.D): tracks which local ports currently have an
//! active local→global proxy, opening and closing them in response to the
//! manager's reconciliation decisions. Proxies are owned exclusively by the
//! manager; a handle is closed exactly once, whether explicitly via
//! `release` or implicitly on `Drop` when the registry entry is replaced.

use port_manager_core::ports::PortMap;
use port_manager_core::{Error, ProxyHandle, ProxyStarter};

struct ProxyEntry {
    handle: Box<dyn ProxyHandle>,
    global_port: u16,
}

#[derive(Default)]
pub struct ProxyRegistry {
    entries: PortMap<ProxyEntry>,
}

impl ProxyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global_port_for(&self, local: u16) -> Option<u16> {
        self.entries.get(&local).map(|e| e.global_port)
    }

    pub fn contains(&self, local: u16) -> bool {
        self.entries.contains_key(&local)
    }

    /// Starts a proxy for `local -> global` if one isn't already running
    /// with that exact global port; if a proxy exists but targets a
    /// different global port, it is closed and replaced. On starter
    /// failure the local port is left with no proxy, matching spec §7
    /// "Proxy start failure... subsequent events re-attempt."
    pub async fn ensure(
        &mut self,
        starter: &dyn ProxyStarter,
        local: u16,
        global: u16,
    ) -> Result<(), Error> {
        if let Some(entry) = self.entries.get(&local) {
            if entry.global_port == global {
                return Ok(());
            }
            self.release(local);
        }
        let handle = starter.start(local, global).await?;
        self.entries.insert(local, ProxyEntry { handle, global_port: global });
        Ok(())
    }

    pub fn release(&mut self, local: u16) {
        if let Some(entry) = self.entries.remove(&local) {
            entry.handle.close();
        }
    }

    /// Closes every active proxy; called on manager shutdown (spec §5
    /// "at shutdown all proxies are closed").
    pub fn close_all(&mut self) {
        for (_, entry) in self.entries.drain() {
            entry.handle.close();
        }
    }
}
