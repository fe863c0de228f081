//! Configuration Module
//!
//! Handles loading and managing node configuration from environment variables.

use std::env;

/// Node configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address this node listens on and advertises to peers
    pub node_addr: String,
    /// Service name used for registration and discovery
    pub service_name: String,
    /// etcd endpoints for the coordination store
    pub etcd_endpoints: Vec<String>,
    /// Name of the default cache group served by this node
    pub group_name: String,
    /// Byte budget for the default group's local store
    pub cache_bytes: i64,
    /// Entry TTL in seconds for the default group (0 = never expire)
    pub default_ttl: u64,
    /// Run without peer discovery or registration
    pub standalone: bool,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `NODE_ADDR` - Listen/advertise address (default: 127.0.0.1:8001)
    /// - `SERVICE_NAME` - Discovery service name (default: meshcache)
    /// - `ETCD_ENDPOINTS` - Comma-separated etcd endpoints (default: localhost:2379)
    /// - `GROUP_NAME` - Default cache group name (default: default)
    /// - `CACHE_MAX_BYTES` - Local store byte budget (default: 2097152)
    /// - `DEFAULT_TTL` - Entry TTL in seconds, 0 means no expiry (default: 0)
    /// - `STANDALONE` - Disable clustering when set to "true" or "1"
    pub fn from_env() -> Self {
        Self {
            node_addr: env::var("NODE_ADDR").unwrap_or_else(|_| "127.0.0.1:8001".to_string()),
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| crate::registry::DEFAULT_SERVICE_NAME.to_string()),
            etcd_endpoints: env::var("ETCD_ENDPOINTS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_else(|_| vec!["localhost:2379".to_string()]),
            group_name: env::var("GROUP_NAME").unwrap_or_else(|_| "default".to_string()),
            cache_bytes: env::var("CACHE_MAX_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2 << 20),
            default_ttl: env::var("DEFAULT_TTL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            standalone: env::var("STANDALONE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_addr: "127.0.0.1:8001".to_string(),
            service_name: crate::registry::DEFAULT_SERVICE_NAME.to_string(),
            etcd_endpoints: vec!["localhost:2379".to_string()],
            group_name: "default".to_string(),
            cache_bytes: 2 << 20,
            default_ttl: 0,
            standalone: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.node_addr, "127.0.0.1:8001");
        assert_eq!(config.service_name, "meshcache");
        assert_eq!(config.etcd_endpoints, vec!["localhost:2379".to_string()]);
        assert_eq!(config.cache_bytes, 2 << 20);
        assert_eq!(config.default_ttl, 0);
        assert!(!config.standalone);
    }

    #[test]
    fn test_endpoint_list_parsing() {
        env::set_var("ETCD_ENDPOINTS", "etcd1:2379, etcd2:2379,");
        let config = Config::from_env();
        env::remove_var("ETCD_ENDPOINTS");

        assert_eq!(
            config.etcd_endpoints,
            vec!["etcd1:2379".to_string(), "etcd2:2379".to_string()]
        );
    }
}
