//! Registry for supervising multiple render surfaces.
//!
//! Hosts embedding more than one render surface get one [`RecoveryManager`]
//! (and thus one supervisor actor) per surface, keyed by a caller-chosen
//! surface id. Managers are spawned lazily and reused.

use std::sync::Arc;

use anyhow::Result;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::config::RecoveryConfig;
use crate::host::HostDriver;
use crate::manager::RecoveryManager;

pub struct SupervisorRegistry {
    managers: Arc<DashMap<String, RecoveryManager>>,
    driver: Arc<dyn HostDriver>,
    config: RecoveryConfig,
}

impl SupervisorRegistry {
    pub fn new(driver: Arc<dyn HostDriver>, config: RecoveryConfig) -> Self {
        info!("initializing supervisor registry");
        Self {
            managers: Arc::new(DashMap::new()),
            driver,
            config,
        }
    }

    /// Returns the manager for `surface_id`, spawning one (and its initial
    /// render host) on first access.
    pub async fn get_or_spawn(&self, surface_id: &str) -> Result<RecoveryManager> {
        if let Some(existing) = self.managers.get(surface_id) {
            debug!(surface = surface_id, "reusing recovery manager");
            return Ok(existing.clone());
        }

        info!(surface = surface_id, "spawning recovery manager");
        let manager = RecoveryManager::spawn(self.driver.clone(), self.config).await?;

        // Concurrent first accesses can race past the lookup above; the
        // loser's manager is shut down and the winner's is returned.
        match self.managers.entry(surface_id.to_string()) {
            Entry::Occupied(existing) => {
                debug!(surface = surface_id, "lost spawn race, reusing winner");
                manager.shutdown();
                Ok(existing.get().clone())
            }
            Entry::Vacant(slot) => {
                slot.insert(manager.clone());
                Ok(manager)
            }
        }
    }

    pub fn manager_count(&self) -> usize {
        self.managers.len()
    }

    /// Removes and shuts down the manager for `surface_id`.
    pub fn remove(&self, surface_id: &str) {
        match self.managers.remove(surface_id) {
            Some((_, manager)) => {
                info!(surface = surface_id, "removing recovery manager");
                manager.shutdown();
            }
            None => warn!(surface = surface_id, "no recovery manager to remove"),
        }
    }

    /// Shuts down every manager. Used at host teardown.
    pub fn shutdown_all(&self) {
        info!(count = self.managers.len(), "shutting down all recovery managers");
        for entry in self.managers.iter() {
            entry.value().shutdown();
        }
        self.managers.clear();
    }
}

impl Clone for SupervisorRegistry {
    fn clone(&self) -> Self {
        Self {
            managers: Arc::clone(&self.managers),
            driver: Arc::clone(&self.driver),
            config: self.config,
        }
    }
}
