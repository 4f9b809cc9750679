//! Scope directory: creation, lookup, and teardown of scopes.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use berth_common::{BerthError, BerthResult, ScopeId};
use ipnet::Ipv4Net;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::scope::{Scope, ScopeType};
use crate::settings::NetworkSettings;

/// Parameters for creating a scope.
///
/// Omitted fields fall back to directory defaults: the default subnet
/// from [`NetworkSettings`], the subnet's first usable host as gateway,
/// and the scope name as backing-network name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopeConfig {
    /// Human-facing scope name, unique within the directory.
    pub name: String,
    /// Scope type.
    #[serde(default)]
    pub scope_type: ScopeType,
    /// Scope subnet.
    #[serde(default)]
    pub subnet: Option<Ipv4Net>,
    /// Gateway address inside the subnet.
    #[serde(default)]
    pub gateway: Option<Ipv4Addr>,
    /// DNS servers, in resolution order.
    #[serde(default)]
    pub dns: Vec<Ipv4Addr>,
    /// Address pools (CIDRs or inclusive ranges) within the subnet.
    #[serde(default)]
    pub pools: Vec<String>,
    /// Name of the externally-realized backing network.
    #[serde(default)]
    pub backing_network: Option<String>,
}

impl ScopeConfig {
    /// Config for a scope with the given name and defaults elsewhere.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

struct DirectoryInner {
    by_id: HashMap<ScopeId, Arc<Scope>>,
    by_name: HashMap<String, ScopeId>,
}

/// Name/ID directory of the appliance's scopes.
///
/// The directory serializes creation and destruction of scope entries;
/// lifecycle operations inside a scope are serialized by that scope's
/// own lock. The default subnet is supplied here at construction time
/// rather than living in process-wide state.
pub struct ScopeDirectory {
    settings: NetworkSettings,
    inner: RwLock<DirectoryInner>,
}

impl ScopeDirectory {
    /// Create a directory and its default bridge scope.
    ///
    /// The bridge scope covers the default subnet and is backed by the
    /// bridge network named in `settings`.
    ///
    /// # Errors
    ///
    /// Propagates scope-creation failures for the default bridge scope.
    pub fn new(settings: NetworkSettings) -> BerthResult<Self> {
        let directory = Self {
            settings,
            inner: RwLock::new(DirectoryInner {
                by_id: HashMap::new(),
                by_name: HashMap::new(),
            }),
        };

        directory.create_scope(ScopeConfig {
            name: ScopeType::Bridge.as_str().to_string(),
            scope_type: ScopeType::Bridge,
            backing_network: Some(directory.settings.bridge_network.clone()),
            ..ScopeConfig::default()
        })?;

        Ok(directory)
    }

    /// Create a scope from `config`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty name, `DuplicateResource` for a
    /// name collision, plus any subnet/pool validation failure.
    pub fn create_scope(&self, config: ScopeConfig) -> BerthResult<Arc<Scope>> {
        if config.name.is_empty() {
            return Err(BerthError::InvalidArgument {
                message: "scope name must not be empty".to_string(),
            });
        }

        let mut inner = self.inner.write();
        if inner.by_name.contains_key(&config.name) {
            return Err(BerthError::DuplicateResource {
                id: config.name.clone(),
            });
        }

        let subnet = config.subnet.unwrap_or(self.settings.default_subnet);
        let gateway = config.gateway.unwrap_or_else(|| first_host(subnet));
        let backing_network = config.backing_network.unwrap_or_else(|| config.name.clone());

        let id = ScopeId::generate();
        let scope = Arc::new(Scope::new(
            id.clone(),
            config.name.clone(),
            config.scope_type,
            subnet,
            gateway,
            config.dns,
            &config.pools,
            backing_network,
        )?);

        inner.by_name.insert(config.name.clone(), id.clone());
        inner.by_id.insert(id.clone(), Arc::clone(&scope));

        tracing::info!(
            scope = %config.name,
            id = %id,
            scope_type = %config.scope_type,
            subnet = %subnet,
            gateway = %gateway,
            "Scope created"
        );
        Ok(scope)
    }

    /// Look up a scope by ID.
    ///
    /// # Errors
    ///
    /// `ResourceNotFound` carrying the queried ID.
    pub fn scope(&self, id: &ScopeId) -> BerthResult<Arc<Scope>> {
        self.inner
            .read()
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| BerthError::ResourceNotFound { id: id.to_string() })
    }

    /// Look up a scope by name.
    ///
    /// # Errors
    ///
    /// `ResourceNotFound` carrying the queried name.
    pub fn scope_by_name(&self, name: &str) -> BerthResult<Arc<Scope>> {
        let inner = self.inner.read();
        inner
            .by_name
            .get(name)
            .and_then(|id| inner.by_id.get(id))
            .cloned()
            .ok_or_else(|| BerthError::ResourceNotFound {
                id: name.to_string(),
            })
    }

    /// Snapshot of all scopes.
    #[must_use]
    pub fn scopes(&self) -> Vec<Arc<Scope>> {
        self.inner.read().by_id.values().cloned().collect()
    }

    /// Destroy the scope named `name`.
    ///
    /// # Errors
    ///
    /// `ResourceNotFound` for an unknown name; `PreconditionFailed`
    /// while any container is still attached.
    pub fn remove_scope(&self, name: &str) -> BerthResult<()> {
        let mut inner = self.inner.write();
        let id = inner
            .by_name
            .get(name)
            .cloned()
            .ok_or_else(|| BerthError::ResourceNotFound {
                id: name.to_string(),
            })?;

        // by_name and by_id are kept in lockstep.
        if let Some(scope) = inner.by_id.get(&id) {
            if !scope.containers().is_empty() {
                return Err(BerthError::PreconditionFailed {
                    message: format!("scope {name} still has attached containers"),
                });
            }
        }

        inner.by_name.remove(name);
        inner.by_id.remove(&id);
        tracing::info!(scope = %name, id = %id, "Scope destroyed");
        Ok(())
    }
}

/// First usable host of a subnet, the default gateway position.
fn first_host(subnet: Ipv4Net) -> Ipv4Addr {
    let network = u32::from(subnet.network());
    if subnet.prefix_len() >= 31 {
        Ipv4Addr::from(network)
    } else {
        Ipv4Addr::from(network + 1)
    }
}
