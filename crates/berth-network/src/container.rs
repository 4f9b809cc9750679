//! Container network facet.
//!
//! The scope subsystem references containers, it does not own them. This
//! type carries only the network-side bookkeeping of a container: its
//! identity and the endpoints it holds, one per attached scope.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use berth_common::{BerthError, BerthResult, ContainerId, ScopeId};
use parking_lot::RwLock;

use crate::endpoint::Endpoint;

/// Process-wide counter backing registration tokens.
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// A container's network-side state.
///
/// Every instance carries a unique registration token. A scope records
/// the token at attach time and compares it on later operations, so a
/// stale handle with the same ID as a registered container is rejected
/// rather than silently accepted.
#[derive(Debug)]
pub struct Container {
    id: ContainerId,
    token: u64,
    endpoints: RwLock<HashMap<ScopeId, Arc<Endpoint>>>,
}

impl Container {
    /// Create the network facet for a container.
    #[must_use]
    pub fn new(id: ContainerId) -> Self {
        Self {
            id,
            token: NEXT_TOKEN.fetch_add(1, Ordering::Relaxed),
            endpoints: RwLock::new(HashMap::new()),
        }
    }

    /// The container's ID.
    #[must_use]
    pub fn id(&self) -> &ContainerId {
        &self.id
    }

    /// This instance's registration token.
    pub(crate) fn token(&self) -> u64 {
        self.token
    }

    /// The container's endpoint in `scope_id`, if attached there.
    #[must_use]
    pub fn endpoint(&self, scope_id: &ScopeId) -> Option<Arc<Endpoint>> {
        self.endpoints.read().get(scope_id).cloned()
    }

    /// Snapshot of all endpoints this container holds.
    #[must_use]
    pub fn endpoints(&self) -> Vec<Arc<Endpoint>> {
        self.endpoints.read().values().cloned().collect()
    }

    pub(crate) fn add_endpoint(&self, endpoint: Arc<Endpoint>) {
        self.endpoints
            .write()
            .insert(endpoint.scope_id().clone(), endpoint);
    }

    pub(crate) fn remove_endpoint(&self, endpoint: &Arc<Endpoint>) {
        self.endpoints.write().remove(endpoint.scope_id());
    }

    /// Mark the endpoint in `scope_id` bound.
    ///
    /// The actual interface plumbing is the runtime's responsibility;
    /// this facet tracks only the flag, and the transition is idempotent.
    pub(crate) fn bind(&self, scope_id: &ScopeId) -> BerthResult<()> {
        let endpoint = self
            .endpoint(scope_id)
            .ok_or_else(|| BerthError::ResourceNotFound {
                id: self.id.to_string(),
            })?;

        endpoint.set_bound(true);
        tracing::debug!(container = %self.id, scope = %scope_id, ip = %endpoint.ip(), "Endpoint bound");
        Ok(())
    }

    /// Mark the endpoint in `scope_id` unbound.
    pub(crate) fn unbind(&self, scope_id: &ScopeId) -> BerthResult<()> {
        let endpoint = self
            .endpoint(scope_id)
            .ok_or_else(|| BerthError::ResourceNotFound {
                id: self.id.to_string(),
            })?;

        endpoint.set_bound(false);
        tracing::debug!(container = %self.id, scope = %scope_id, "Endpoint unbound");
        Ok(())
    }
}
