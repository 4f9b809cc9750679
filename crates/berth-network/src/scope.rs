//! Network scopes: isolated L3 segments containers attach to.
//!
//! Per (scope, container) pair the lifecycle is a strict state machine:
//!
//! ```text
//! unattached -> attached(unbound) -> attached(bound) -> attached(unbound) -> unattached
//! ```
//!
//! Every transition and every read accessor goes through one exclusive
//! lock per scope; the scope's allocator is only ever touched inside
//! that critical section.

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;

use berth_common::{BerthError, BerthResult, ContainerId, ScopeId};
use ipnet::Ipv4Net;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::container::Container;
use crate::endpoint::Endpoint;
use crate::ipam::Ipam;

/// How a scope's traffic is realized outside the appliance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeType {
    /// Internal bridge segment, local to the appliance.
    Bridge,
    /// Externally realized network the appliance only records a name for.
    External,
}

impl ScopeType {
    /// The wire/config spelling of the scope type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bridge => "bridge",
            Self::External => "external",
        }
    }
}

impl Default for ScopeType {
    fn default() -> Self {
        Self::Bridge
    }
}

impl fmt::Display for ScopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A container registered with a scope, plus the instance token recorded
/// at attach time.
struct Attachment {
    container: Arc<Container>,
    token: u64,
}

/// Mutable scope state, guarded by the scope's one lock.
struct ScopeInner {
    ipam: Ipam,
    containers: HashMap<ContainerId, Attachment>,
    endpoints: Vec<Arc<Endpoint>>,
}

/// An isolated virtual network segment.
///
/// The scope owns its IPAM and its endpoints; containers are referenced,
/// never owned. Identity and network facts are fixed at creation; the
/// attach/bind lifecycle is serialized by an internal mutex that is
/// never exposed.
pub struct Scope {
    id: ScopeId,
    name: String,
    scope_type: ScopeType,
    subnet: Ipv4Net,
    gateway: Ipv4Addr,
    dns: Vec<Ipv4Addr>,
    /// Name of the externally-realized backing network (portgroup,
    /// bridge device); how it is realized is not this subsystem's
    /// concern.
    backing_network: String,
    inner: Mutex<ScopeInner>,
}

impl Scope {
    /// Create a scope. The gateway is claimed from the pools up front
    /// when one covers it, so dynamic allocation can never hand it out.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: ScopeId,
        name: String,
        scope_type: ScopeType,
        subnet: Ipv4Net,
        gateway: Ipv4Addr,
        dns: Vec<Ipv4Addr>,
        pools: &[String],
        backing_network: String,
    ) -> BerthResult<Self> {
        if !subnet.contains(&gateway) {
            return Err(BerthError::InvalidArgument {
                message: format!("gateway {gateway} is outside subnet {subnet}"),
            });
        }

        let mut ipam = Ipam::from_pools(subnet, pools)?;
        if ipam.spaces().iter().any(|s| s.contains(gateway)) {
            ipam.reserve_ip4(gateway)?;
        }

        Ok(Self {
            id,
            name,
            scope_type,
            subnet,
            gateway,
            dns,
            backing_network,
            inner: Mutex::new(ScopeInner {
                ipam,
                containers: HashMap::new(),
                endpoints: Vec::new(),
            }),
        })
    }

    /// The scope's immutable ID.
    #[must_use]
    pub fn id(&self) -> &ScopeId {
        &self.id
    }

    /// The scope's human-facing name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The scope type.
    #[must_use]
    pub fn scope_type(&self) -> ScopeType {
        self.scope_type
    }

    /// The scope subnet.
    #[must_use]
    pub fn subnet(&self) -> Ipv4Net {
        self.subnet
    }

    /// The scope gateway.
    #[must_use]
    pub fn gateway(&self) -> Ipv4Addr {
        self.gateway
    }

    /// DNS servers for the scope, in resolution order.
    #[must_use]
    pub fn dns(&self) -> &[Ipv4Addr] {
        &self.dns
    }

    /// Name of the backing network.
    #[must_use]
    pub fn backing_network(&self) -> &str {
        &self.backing_network
    }

    /// Attach a container, leasing it an address.
    ///
    /// With `requested_ip` the endpoint is static and exactly that
    /// address is reserved; otherwise the next free address is leased in
    /// pool order. The reservation happens before any registration, so a
    /// failed attach leaves the scope unchanged.
    ///
    /// # Errors
    ///
    /// `DuplicateResource` if the container is already attached here;
    /// `AllocationExhausted` if the address cannot be reserved.
    pub fn add_container(
        &self,
        container: &Arc<Container>,
        requested_ip: Option<Ipv4Addr>,
    ) -> BerthResult<Arc<Endpoint>> {
        let mut inner = self.inner.lock();

        if inner.containers.contains_key(container.id()) {
            return Err(BerthError::DuplicateResource {
                id: container.id().to_string(),
            });
        }

        let (ip, is_static) = match requested_ip {
            Some(ip) => {
                inner.ipam.reserve_ip4(ip)?;
                (ip, true)
            }
            None => (inner.ipam.reserve_next_ip4()?, false),
        };

        let endpoint = Arc::new(Endpoint::new(
            self.id.clone(),
            container.id().clone(),
            self.subnet,
            self.gateway,
            ip,
            is_static,
        ));

        container.add_endpoint(Arc::clone(&endpoint));
        inner.endpoints.push(Arc::clone(&endpoint));
        inner.containers.insert(
            container.id().clone(),
            Attachment {
                container: Arc::clone(container),
                token: container.token(),
            },
        );

        tracing::debug!(
            scope = %self.name,
            container = %container.id(),
            ip = %ip,
            is_static,
            "Container attached"
        );
        Ok(endpoint)
    }

    /// Detach a container, releasing its address.
    ///
    /// Unbinding is a hard precondition; a bound endpoint is never
    /// detached implicitly. Static endpoints keep their address value
    /// after the lease ends; dynamic endpoints are reset to `0.0.0.0`.
    ///
    /// # Errors
    ///
    /// `ResourceNotFound` if the container is not attached here, or the
    /// handle is stale, or no endpoint exists for it;
    /// `PreconditionFailed` while the endpoint is bound;
    /// `AllocationInconsistent` if the address release finds no
    /// reservation.
    pub fn remove_container(&self, container: &Arc<Container>) -> BerthResult<()> {
        let mut inner = self.inner.lock();

        let registered = match inner.containers.get(container.id()) {
            Some(attachment) if attachment.token == container.token() => {
                Arc::clone(&attachment.container)
            }
            _ => {
                return Err(BerthError::ResourceNotFound {
                    id: container.id().to_string(),
                });
            }
        };

        let endpoint =
            registered
                .endpoint(&self.id)
                .ok_or_else(|| BerthError::ResourceNotFound {
                    id: container.id().to_string(),
                })?;

        if endpoint.is_bound() {
            return Err(BerthError::PreconditionFailed {
                message: format!(
                    "container {} is still bound to scope {}; unbind it first",
                    container.id(),
                    self.name
                ),
            });
        }

        inner.ipam.release_ip4(endpoint.ip())?;
        if !endpoint.is_static() {
            endpoint.clear_ip();
        }

        inner.endpoints.retain(|e| !Arc::ptr_eq(e, &endpoint));
        inner.containers.remove(container.id());
        registered.remove_endpoint(&endpoint);

        tracing::debug!(scope = %self.name, container = %container.id(), "Container detached");
        Ok(())
    }

    /// Mark a container's endpoint in this scope bound.
    ///
    /// # Errors
    ///
    /// `ResourceNotFound` if the container is not attached here or the
    /// handle is stale.
    pub fn bind_container(&self, container: &Arc<Container>) -> BerthResult<()> {
        let inner = self.inner.lock();
        Self::registered(&inner, container)?.bind(&self.id)
    }

    /// Mark a container's endpoint in this scope unbound.
    ///
    /// # Errors
    ///
    /// `ResourceNotFound` if the container is not attached here or the
    /// handle is stale.
    pub fn unbind_container(&self, container: &Arc<Container>) -> BerthResult<()> {
        let inner = self.inner.lock();
        Self::registered(&inner, container)?.unbind(&self.id)
    }

    /// Token-checked lookup of the registered instance for `container`.
    fn registered(inner: &ScopeInner, container: &Arc<Container>) -> BerthResult<Arc<Container>> {
        match inner.containers.get(container.id()) {
            Some(attachment) if attachment.token == container.token() => {
                Ok(Arc::clone(&attachment.container))
            }
            _ => Err(BerthError::ResourceNotFound {
                id: container.id().to_string(),
            }),
        }
    }

    /// Freshly allocated snapshot of the attached containers.
    #[must_use]
    pub fn containers(&self) -> Vec<Arc<Container>> {
        let inner = self.inner.lock();
        inner
            .containers
            .values()
            .map(|a| Arc::clone(&a.container))
            .collect()
    }

    /// The attached container with `id`, if any.
    #[must_use]
    pub fn container(&self, id: &ContainerId) -> Option<Arc<Container>> {
        let inner = self.inner.lock();
        inner.containers.get(id).map(|a| Arc::clone(&a.container))
    }

    /// Snapshot of the scope's endpoints.
    #[must_use]
    pub fn endpoints(&self) -> Vec<Arc<Endpoint>> {
        self.inner.lock().endpoints.clone()
    }

    /// Pool names of the scope's allocator, in selection order.
    #[must_use]
    pub fn pools(&self) -> Vec<String> {
        self.inner.lock().ipam.pools().to_vec()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("scope_type", &self.scope_type)
            .field("subnet", &self.subnet)
            .field("gateway", &self.gateway)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(subnet: &str, gateway: &str) -> Scope {
        Scope::new(
            ScopeId::generate(),
            "test".to_string(),
            ScopeType::Bridge,
            subnet.parse().unwrap(),
            gateway.parse().unwrap(),
            Vec::new(),
            &[],
            "test-net".to_string(),
        )
        .unwrap()
    }

    fn container(id: &str) -> Arc<Container> {
        Arc::new(Container::new(ContainerId::new(id).unwrap()))
    }

    #[test]
    fn gateway_is_never_allocated() {
        let s = scope("10.0.0.0/24", "10.0.0.1");
        let c = container("c1");
        let ep = s.add_container(&c, None).unwrap();
        assert_eq!(ep.ip().to_string(), "10.0.0.2");
    }

    #[test]
    fn gateway_outside_subnet_rejected() {
        let result = Scope::new(
            ScopeId::generate(),
            "bad".to_string(),
            ScopeType::Bridge,
            "10.0.0.0/24".parse().unwrap(),
            "10.1.0.1".parse().unwrap(),
            Vec::new(),
            &[],
            "net".to_string(),
        );
        assert!(matches!(result, Err(BerthError::InvalidArgument { .. })));
    }

    #[test]
    fn duplicate_attach_rejected() {
        let s = scope("10.0.0.0/24", "10.0.0.1");
        let c = container("c1");
        s.add_container(&c, None).unwrap();
        assert!(matches!(
            s.add_container(&c, None),
            Err(BerthError::DuplicateResource { .. })
        ));
        // The failed attach must not leak an address.
        assert_eq!(s.endpoints().len(), 1);
    }

    #[test]
    fn static_address_conflict() {
        let s = scope("10.0.0.0/24", "10.0.0.1");
        let wanted: Ipv4Addr = "10.0.0.5".parse().unwrap();

        let ep = s.add_container(&container("c1"), Some(wanted)).unwrap();
        assert!(ep.is_static());
        assert_eq!(ep.ip(), wanted);

        assert!(matches!(
            s.add_container(&container("c2"), Some(wanted)),
            Err(BerthError::AllocationExhausted { .. })
        ));
    }

    #[test]
    fn failed_attach_leaves_scope_unchanged() {
        // One usable address, already taken by the gateway reservation.
        let s = scope("10.0.0.0/30", "10.0.0.1");
        let taken = s.add_container(&container("c0"), None).unwrap();
        assert_eq!(taken.ip().to_string(), "10.0.0.2");

        let c = container("c1");
        assert!(s.add_container(&c, None).is_err());
        assert!(s.container(c.id()).is_none());
        assert!(c.endpoint(s.id()).is_none());
        assert_eq!(s.endpoints().len(), 1);
    }

    #[test]
    fn remove_requires_unbound() {
        let s = scope("10.0.0.0/24", "10.0.0.1");
        let c = container("c1");
        s.add_container(&c, None).unwrap();
        s.bind_container(&c).unwrap();

        assert!(matches!(
            s.remove_container(&c),
            Err(BerthError::PreconditionFailed { .. })
        ));

        s.unbind_container(&c).unwrap();
        s.remove_container(&c).unwrap();
        assert!(s.containers().is_empty());
        assert!(s.endpoints().is_empty());
    }

    #[test]
    fn released_address_is_reusable() {
        let s = scope("10.0.0.0/24", "10.0.0.1");
        let c1 = container("c1");
        let first = s.add_container(&c1, None).unwrap().ip();
        s.remove_container(&c1).unwrap();

        let second = s.add_container(&container("c2"), None).unwrap().ip();
        assert_eq!(first, second);
    }

    #[test]
    fn dynamic_release_zeroes_static_release_does_not() {
        let s = scope("10.0.0.0/24", "10.0.0.1");

        let c1 = container("c1");
        let dynamic = s.add_container(&c1, None).unwrap();
        s.remove_container(&c1).unwrap();
        assert_eq!(dynamic.ip(), Ipv4Addr::UNSPECIFIED);

        let c2 = container("c2");
        let fixed: Ipv4Addr = "10.0.0.40".parse().unwrap();
        let stat = s.add_container(&c2, Some(fixed)).unwrap();
        s.remove_container(&c2).unwrap();
        assert_eq!(stat.ip(), fixed);
    }

    #[test]
    fn double_remove_is_not_found() {
        let s = scope("10.0.0.0/24", "10.0.0.1");
        let c = container("c1");
        s.add_container(&c, None).unwrap();
        s.remove_container(&c).unwrap();
        assert!(matches!(
            s.remove_container(&c),
            Err(BerthError::ResourceNotFound { .. })
        ));
    }

    #[test]
    fn stale_handle_rejected() {
        let s = scope("10.0.0.0/24", "10.0.0.1");
        let c = container("c1");
        s.add_container(&c, None).unwrap();

        // A different instance with the same ID is not the registered one.
        let stale = container("c1");
        assert!(matches!(
            s.remove_container(&stale),
            Err(BerthError::ResourceNotFound { .. })
        ));
        assert!(matches!(
            s.bind_container(&stale),
            Err(BerthError::ResourceNotFound { .. })
        ));

        // The registered handle still works.
        s.remove_container(&c).unwrap();
    }

    #[test]
    fn container_map_matches_endpoint_list() {
        let s = scope("10.0.0.0/24", "10.0.0.1");
        let c1 = container("c1");
        let c2 = container("c2");
        s.add_container(&c1, None).unwrap();
        s.add_container(&c2, None).unwrap();

        assert_eq!(s.containers().len(), 2);
        assert_eq!(s.endpoints().len(), 2);
        for ep in s.endpoints() {
            assert!(s.container(ep.container_id()).is_some());
        }
    }

    #[test]
    fn scope_type_serde_spelling() {
        assert_eq!(ScopeType::Bridge.to_string(), "bridge");
        assert_eq!(
            serde_json::to_string(&ScopeType::External).unwrap(),
            "\"external\""
        );
    }
}
