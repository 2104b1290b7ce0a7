//! Process-wide table of running interfaces.
//!
//! A registry lets interfaces be started and stopped independently at
//! runtime instead of only at process startup, matching accel-ppp's
//! `pppoe_init`/per-interface start/stop model.

use crate::config::GlobalConfig;
use crate::discovery::DiscoveryEngine;
use crate::error::ServerError;
use crate::iface::InterfaceServer;
use crate::ppp::PppEngine;
use crate::stats::Stats;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

struct Running {
    cancel: CancellationToken,
    engine: Arc<DiscoveryEngine>,
    task: JoinHandle<()>,
}

/// Owns every running [`InterfaceServer`] and the process-wide stats they
/// all report into.
pub struct Registry {
    interfaces: RwLock<HashMap<String, Running>>,
    stats: Arc<Stats>,
    ppp: Arc<dyn PppEngine>,
}

impl Registry {
    pub fn new(ppp: Arc<dyn PppEngine>) -> Arc<Self> {
        Arc::new(Self {
            interfaces: RwLock::new(HashMap::new()),
            stats: Arc::new(Stats::default()),
            ppp,
        })
    }

    pub fn stats(&self) -> Arc<Stats> {
        self.stats.clone()
    }

    /// Binds and starts one interface. Fails if `ifname` is already
    /// registered, leaving the existing interface untouched.
    pub async fn start(&self, ifname: String, global: &GlobalConfig) -> Result<(), ServerError> {
        let mut interfaces = self.interfaces.write().await;
        if interfaces.contains_key(&ifname) {
            return Err(ServerError::AlreadyExists(ifname));
        }

        let server = InterfaceServer::bind(
            ifname.clone(),
            global,
            global.global_padi_limit,
            self.stats.clone(),
            self.ppp.clone(),
        )?;
        let engine = server.engine();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(server.run(cancel.clone()));

        interfaces.insert(ifname, Running { cancel, engine, task });
        Ok(())
    }

    /// Signals an interface to stop and waits for its drain to finish.
    pub async fn stop(&self, ifname: &str) -> Result<(), ServerError> {
        let running = self
            .interfaces
            .write()
            .await
            .remove(ifname)
            .ok_or_else(|| ServerError::NotFound(ifname.to_string()))?;

        running.cancel.cancel();
        let _ = running.task.await;
        info!(ifname, "interface removed from registry");
        Ok(())
    }

    /// Stops every registered interface, used for process-wide shutdown.
    pub async fn stop_all(&self) {
        let running: Vec<(String, Running)> = self.interfaces.write().await.drain().collect();
        for (ifname, running) in running {
            running.cancel.cancel();
            let _ = running.task.await;
            info!(ifname, "interface removed from registry");
        }
    }

    pub async fn engine(&self, ifname: &str) -> Option<Arc<DiscoveryEngine>> {
        self.interfaces.read().await.get(ifname).map(|r| r.engine.clone())
    }

    pub async fn interface_names(&self) -> Vec<String> {
        self.interfaces.read().await.keys().cloned().collect()
    }
}
