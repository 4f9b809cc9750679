//! Container attachment records.

use std::net::Ipv4Addr;

use berth_common::{ContainerId, ScopeId};
use ipnet::Ipv4Net;
use parking_lot::Mutex;

/// One container's attachment to one scope.
///
/// The endpoint is owned by the scope that created it and referenced by
/// exactly one container. The leased address and the bound flag are the
/// only mutable state; both are only ever touched while the owning
/// scope's lock is held.
#[derive(Debug)]
pub struct Endpoint {
    scope_id: ScopeId,
    container_id: ContainerId,
    subnet: Ipv4Net,
    gateway: Ipv4Addr,
    /// Caller-supplied address, exempt from automatic release semantics.
    is_static: bool,
    state: Mutex<EndpointState>,
}

#[derive(Debug)]
struct EndpointState {
    ip: Ipv4Addr,
    bound: bool,
}

impl Endpoint {
    pub(crate) fn new(
        scope_id: ScopeId,
        container_id: ContainerId,
        subnet: Ipv4Net,
        gateway: Ipv4Addr,
        ip: Ipv4Addr,
        is_static: bool,
    ) -> Self {
        Self {
            scope_id,
            container_id,
            subnet,
            gateway,
            is_static,
            state: Mutex::new(EndpointState { ip, bound: false }),
        }
    }

    /// ID of the scope that owns this endpoint.
    #[must_use]
    pub fn scope_id(&self) -> &ScopeId {
        &self.scope_id
    }

    /// ID of the attached container.
    #[must_use]
    pub fn container_id(&self) -> &ContainerId {
        &self.container_id
    }

    /// The scope subnet this endpoint lives in.
    #[must_use]
    pub fn subnet(&self) -> Ipv4Net {
        self.subnet
    }

    /// Gateway address for the endpoint.
    #[must_use]
    pub fn gateway(&self) -> Ipv4Addr {
        self.gateway
    }

    /// Whether the address was caller-supplied.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.is_static
    }

    /// The leased address, or `0.0.0.0` when unset or released.
    #[must_use]
    pub fn ip(&self) -> Ipv4Addr {
        self.state.lock().ip
    }

    /// Whether the endpoint's network plumbing is currently active.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.state.lock().bound
    }

    pub(crate) fn set_bound(&self, bound: bool) {
        self.state.lock().bound = bound;
    }

    /// Reset the leased address after release. Never called for static
    /// endpoints, whose address is caller-managed.
    pub(crate) fn clear_ip(&self) {
        self.state.lock().ip = Ipv4Addr::UNSPECIFIED;
    }
}
