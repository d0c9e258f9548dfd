//! Client configuration

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Client configuration
///
/// The configuration file uses TOML format:
///
/// ```toml
/// [client]
/// dns_listen = "127.0.0.1:53"
/// server_url = "wss://tunnel.example.com:8443/dns"
/// password = "shared-secret"
/// salt = "00112233445566778899aabbccddeeff"
///
/// [cache]
/// enabled = true
/// ttl = 300
/// max_size = 10000
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Tunnel client settings
    pub client: ClientConfig,

    /// Response cache settings
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.client.server_url.is_empty() {
            return Err(Error::Config("server_url is required".into()));
        }

        if !self.client.server_url.starts_with("ws://")
            && !self.client.server_url.starts_with("wss://")
        {
            return Err(Error::Config(format!(
                "server_url '{}' must use a ws:// or wss:// scheme",
                self.client.server_url
            )));
        }

        if self.client.password.is_empty() {
            return Err(Error::Config("password is required".into()));
        }

        self.client.salt_bytes()?;

        if self.cache.enabled && self.cache.max_size == 0 {
            return Err(Error::Config("cache.max_size must be non-zero".into()));
        }

        Ok(())
    }

    /// Generate a sample configuration
    pub fn sample() -> String {
        r#"# Burrow tunnel client configuration

[client]
# UDP address to answer DNS queries on
dns_listen = "127.0.0.1:53"

# Tunnel endpoint on the upstream peer (ws:// or wss://)
server_url = "wss://tunnel.example.com:8443/dns"

# Shared secret; must match the upstream
password = "change-this-password"

# Hex-encoded key derivation salt; must match the upstream
# (generate one with `burrow gen-salt`)
salt = "00112233445566778899aabbccddeeff"

# Accept any TLS certificate from the upstream (testing only)
insecure_skip_tls = false

# Seconds to wait before redialing after the tunnel drops
reconnect_delay = 5

[cache]
# Cache successful DNS responses locally
enabled = true

# Seconds a cached response stays valid
ttl = 300

# Maximum number of cached responses
max_size = 10000
"#
        .to_string()
    }
}

/// Tunnel client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// UDP address the local resolver listens on
    #[serde(default = "default_dns_listen")]
    pub dns_listen: SocketAddr,

    /// Tunnel URL of the upstream peer
    pub server_url: String,

    /// Shared secret for key derivation
    #[serde(default)]
    pub password: String,

    /// Hex-encoded key derivation salt
    #[serde(default)]
    pub salt: String,

    /// Skip TLS certificate verification when dialing wss://
    #[serde(default)]
    pub insecure_skip_tls: bool,

    /// Seconds between reconnect attempts
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay: u64,
}

impl ClientConfig {
    /// Decode the configured salt
    pub fn salt_bytes(&self) -> Result<Vec<u8>> {
        if self.salt.is_empty() {
            return Err(Error::Config("salt is required".into()));
        }
        hex::decode(&self.salt)
            .map_err(|e| Error::Config(format!("salt is not valid hex: {}", e)))
    }

    /// Reconnect delay as a duration
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay)
    }
}

/// Response cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache successful responses
    #[serde(default)]
    pub enabled: bool,

    /// Seconds a cached response stays valid
    #[serde(default = "default_cache_ttl")]
    pub ttl: u64,

    /// Maximum number of cached responses
    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,
}

impl CacheConfig {
    /// Cache TTL as a duration
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl: default_cache_ttl(),
            max_size: default_cache_max_size(),
        }
    }
}

// Default value functions
fn default_dns_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 53))
}

fn default_reconnect_delay() -> u64 {
    5
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_cache_max_size() -> usize {
    10_000
}
