//! Adapter client cache
//!
//! Clients are keyed by (project, FQMN). A cached client whose container id
//! no longer matches is dropped and rebuilt on the next lookup. The map lock
//! is never held while the engine is queried.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::module::ipc::auth::AdapterKey;
use crate::module::ipc::client::AdapterClient;
use crate::module::ipc::transport::RpcTransport;
use crate::module::traits::ModuleError;

type CacheKey = (String, String);

/// Cache of adapter clients
pub struct AdapterClientCache {
    transport: RpcTransport,
    clients: Mutex<HashMap<CacheKey, Arc<AdapterClient>>>,
}

impl AdapterClientCache {
    pub fn new(transport: RpcTransport) -> Self {
        Self {
            transport,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached client for (project, fqmn) or connect a new one
    ///
    /// `key` is only used when a new client has to be created.
    pub async fn get(
        &self,
        project: &str,
        fqmn: &str,
        container: &str,
        key: Option<AdapterKey>,
    ) -> Result<Arc<AdapterClient>, ModuleError> {
        let cache_key = (project.to_string(), fqmn.to_string());
        let cached = self.clients.lock().await.get(&cache_key).cloned();

        if let Some(client) = cached {
            if client.container() == container && !client.is_stale().await? {
                return Ok(client);
            }
            debug!("Discarding stale adapter client for {} in {}", fqmn, project);
            let mut clients = self.clients.lock().await;
            if clients
                .get(&cache_key)
                .is_some_and(|current| Arc::ptr_eq(current, &client))
            {
                clients.remove(&cache_key);
            }
        }

        let fresh = Arc::new(AdapterClient::connect(self.transport.clone(), container, key).await?);
        let mut clients = self.clients.lock().await;
        // A concurrent lookup may have connected to the same container meanwhile
        if let Some(existing) = clients.get(&cache_key) {
            if existing.container() == container && existing.container_id() == fresh.container_id() {
                return Ok(Arc::clone(existing));
            }
        }
        clients.insert(cache_key, Arc::clone(&fresh));
        Ok(fresh)
    }

    /// Drop the client for (project, fqmn)
    pub async fn invalidate(&self, project: &str, fqmn: &str) {
        self.clients
            .lock()
            .await
            .remove(&(project.to_string(), fqmn.to_string()));
    }

    /// Drop every client of a project
    pub async fn invalidate_project(&self, project: &str) {
        self.clients.lock().await.retain(|(p, _), _| p != project);
    }

    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
