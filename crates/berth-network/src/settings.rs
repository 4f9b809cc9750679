//! Network settings extracted from the appliance configuration source.

use std::net::Ipv4Addr;

use berth_common::{BerthError, BerthResult, DataSource};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};

/// Key carrying the name of the backing bridge network.
const BRIDGE_NETWORK_KEY: &str = "network/bridge";
/// Key carrying the bridge subnet; optional, see [`fallback_subnet`].
const BRIDGE_SUBNET_KEY: &str = "network/bridge/subnet";

/// Settings the scope directory is constructed from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Subnet used for scopes that do not specify one.
    pub default_subnet: Ipv4Net,
    /// Name of the backing network for the default bridge scope.
    pub bridge_network: String,
}

impl NetworkSettings {
    /// Create settings from explicit values.
    pub fn new(default_subnet: Ipv4Net, bridge_network: impl Into<String>) -> Self {
        Self {
            default_subnet,
            bridge_network: bridge_network.into(),
        }
    }

    /// Read settings from a configuration source.
    ///
    /// The bridge network name is required. The subnet key is optional
    /// and falls back to `172.16.0.0/16` when absent.
    ///
    /// # Errors
    ///
    /// Propagates source failures (missing required key, channel
    /// unavailable) and rejects malformed subnet values with a `Config`
    /// error.
    pub fn from_source(source: &dyn DataSource) -> BerthResult<Self> {
        let bridge_network = source.get(BRIDGE_NETWORK_KEY)?;

        let default_subnet = match source.get(BRIDGE_SUBNET_KEY) {
            Ok(raw) => raw.parse().map_err(|_| BerthError::Config {
                message: format!("invalid subnet '{raw}' for {BRIDGE_SUBNET_KEY}"),
            })?,
            Err(BerthError::ResourceNotFound { .. }) => fallback_subnet(),
            Err(err) => return Err(err),
        };

        tracing::debug!(
            bridge_network = %bridge_network,
            subnet = %default_subnet,
            "Network settings loaded"
        );
        Ok(Self {
            default_subnet,
            bridge_network,
        })
    }
}

/// Built-in default bridge subnet.
fn fallback_subnet() -> Ipv4Net {
    Ipv4Net::new(Ipv4Addr::new(172, 16, 0, 0), 16).expect("/16 is a valid prefix")
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_common::MapSource;

    #[test]
    fn reads_both_keys() {
        let src: MapSource = [
            ("network/bridge", "vic-bridge"),
            ("network/bridge/subnet", "192.168.100.0/22"),
        ]
        .into_iter()
        .collect();

        let settings = NetworkSettings::from_source(&src).unwrap();
        assert_eq!(settings.bridge_network, "vic-bridge");
        assert_eq!(settings.default_subnet.to_string(), "192.168.100.0/22");
    }

    #[test]
    fn missing_subnet_uses_fallback() {
        let src: MapSource = [("network/bridge", "vic-bridge")].into_iter().collect();
        let settings = NetworkSettings::from_source(&src).unwrap();
        assert_eq!(settings.default_subnet.to_string(), "172.16.0.0/16");
    }

    #[test]
    fn missing_bridge_network_fails() {
        let src = MapSource::new();
        assert!(matches!(
            NetworkSettings::from_source(&src),
            Err(BerthError::ResourceNotFound { .. })
        ));
    }

    #[test]
    fn malformed_subnet_fails() {
        let src: MapSource = [
            ("network/bridge", "vic-bridge"),
            ("network/bridge/subnet", "not-a-subnet"),
        ]
        .into_iter()
        .collect();
        assert!(matches!(
            NetworkSettings::from_source(&src),
            Err(BerthError::Config { .. })
        ));
    }

    #[test]
    fn channel_unavailable_propagates() {
        // Models a guestinfo-backed source probed outside a VM.
        struct Unavailable;
        impl DataSource for Unavailable {
            fn get(&self, _key: &str) -> BerthResult<String> {
                Err(BerthError::NotVirtualized)
            }
        }

        assert!(matches!(
            NetworkSettings::from_source(&Unavailable),
            Err(BerthError::NotVirtualized)
        ));
    }
}
