//! # berth-network
//!
//! Network scopes and address allocation for Berth containers.
//!
//! A *scope* is an isolated L3 segment with its own subnet, gateway, DNS
//! list, and address pools. Containers attach to a scope through
//! endpoints that hold a leased address; the scope serializes every
//! lifecycle step behind one exclusive lock so addresses are never
//! double-allocated and attachment state never races.

#![warn(missing_docs)]

pub mod address_space;
pub mod container;
pub mod directory;
pub mod endpoint;
pub mod ipam;
pub mod scope;
pub mod settings;

pub use address_space::AddressSpace;
pub use container::Container;
pub use directory::{ScopeConfig, ScopeDirectory};
pub use endpoint::Endpoint;
pub use ipam::Ipam;
pub use scope::{Scope, ScopeType};
pub use settings::NetworkSettings;
