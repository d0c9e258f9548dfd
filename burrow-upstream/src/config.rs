//! Upstream configuration

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Upstream configuration
///
/// The configuration file uses TOML format:
///
/// ```toml
/// [server]
/// listen = "0.0.0.0:8443"
/// password = "shared-secret"
/// salt = "00112233445566778899aabbccddeeff"
///
/// [dns]
/// upstreams = ["8.8.8.8:53", "1.1.1.1:53"]
/// timeout = 5
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Tunnel endpoint settings
    pub server: ServerConfig,

    /// Recursive resolution settings
    #[serde(default)]
    pub dns: DnsConfig,
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
        if self.server.password.is_empty() {
            return Err(Error::Config("password is required".into()));
        }

        self.server.salt_bytes()?;

        if self.server.tls_cert.is_some() != self.server.tls_key.is_some() {
            return Err(Error::Config(
                "tls_cert and tls_key must be configured together".into(),
            ));
        }

        if self.dns.upstreams.is_empty() {
            return Err(Error::Config("at least one DNS upstream is required".into()));
        }
        self.dns.upstream_addrs()?;

        Ok(())
    }

    /// Generate a sample configuration
    pub fn sample() -> String {
        r#"# Burrow tunnel upstream configuration

[server]
# Address the tunnel endpoint listens on
listen = "0.0.0.0:8443"

# TLS certificate and key (PEM); leave unset to serve plain ws://
# (only for testing -- the tunnel payload stays AEAD-encrypted either way)
# tls_cert = "/etc/burrow/cert.pem"
# tls_key = "/etc/burrow/key.pem"

# Shared secret; must match the clients
password = "change-this-password"

# Hex-encoded key derivation salt; must match the clients
# (generate one with `burrow gen-salt`)
salt = "00112233445566778899aabbccddeeff"

[dns]
# Resolvers tried in order for each query
upstreams = ["8.8.8.8:53", "1.1.1.1:53"]

# Seconds to wait on each resolver before trying the next
timeout = 5
"#
        .to_string()
    }
}

/// Tunnel endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address for the HTTP/WebSocket endpoint
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// TLS certificate chain in PEM format
    pub tls_cert: Option<PathBuf>,

    /// TLS private key in PEM format
    pub tls_key: Option<PathBuf>,

    /// Shared secret for key derivation
    #[serde(default)]
    pub password: String,

    /// Hex-encoded key derivation salt
    #[serde(default)]
    pub salt: String,
}

impl ServerConfig {
    /// Decode the configured salt
    pub fn salt_bytes(&self) -> Result<Vec<u8>> {
        if self.salt.is_empty() {
            return Err(Error::Config("salt is required".into()));
        }
        hex::decode(&self.salt)
            .map_err(|e| Error::Config(format!("salt is not valid hex: {}", e)))
    }

    /// Certificate and key paths when TLS is configured
    pub fn tls_paths(&self) -> Option<(&Path, &Path)> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Some((cert, key)),
            _ => None,
        }
    }
}

/// Recursive resolution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// Resolvers tried in configuration order
    #[serde(default = "default_upstreams")]
    pub upstreams: Vec<String>,

    /// Seconds to wait per resolver attempt
    #[serde(default = "default_dns_timeout")]
    pub timeout: u64,
}

impl DnsConfig {
    /// Parsed upstream addresses
    pub fn upstream_addrs(&self) -> Result<Vec<SocketAddr>> {
        self.upstreams
            .iter()
            .map(|s| {
                s.parse::<SocketAddr>().map_err(|e| {
                    Error::Config(format!("invalid DNS upstream '{}': {}", s, e))
                })
            })
            .collect()
    }

    /// Per-attempt exchange timeout as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            upstreams: default_upstreams(),
            timeout: default_dns_timeout(),
        }
    }
}

// Default value functions
fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8443))
}

fn default_upstreams() -> Vec<String> {
    vec!["8.8.8.8:53".to_string(), "1.1.1.1:53".to_string()]
}

fn default_dns_timeout() -> u64 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[server]
listen = "0.0.0.0:9000"
password = "pw"
salt = "00112233445566778899aabbccddeeff"

[dns]
upstreams = ["9.9.9.9:53"]
timeout = 2
"#;

        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.server.listen.port(), 9000);
        assert!(config.server.tls_paths().is_none());
        assert_eq!(
            config.dns.upstream_addrs().unwrap(),
            vec!["9.9.9.9:53".parse::<SocketAddr>().unwrap()]
        );
        assert_eq!(config.dns.timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_defaults() {
        let toml = r#"
[server]
password = "pw"
salt = "aabb"
"#;

        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.server.listen, default_listen());
        assert_eq!(config.dns.upstreams.len(), 2);
        assert_eq!(config.dns.timeout, 5);
    }

    #[test]
    fn test_tls_requires_both_halves() {
        let toml = r#"
[server]
password = "pw"
salt = "aabb"
tls_cert = "/tmp/cert.pem"
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_tls_paths_present_together() {
        let toml = r#"
[server]
password = "pw"
salt = "aabb"
tls_cert = "/tmp/cert.pem"
tls_key = "/tmp/key.pem"
"#;
        let config = Config::from_toml(toml).unwrap();
        assert!(config.server.tls_paths().is_some());
    }

    #[test]
    fn test_bad_upstream_fails() {
        let toml = r#"
[server]
password = "pw"
salt = "aabb"

[dns]
upstreams = ["not-an-address"]
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_empty_upstreams_fail() {
        let toml = r#"
[server]
password = "pw"
salt = "aabb"

[dns]
upstreams = []
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_sample_parses() {
        let config = Config::from_toml(&Config::sample()).unwrap();
        assert_eq!(config.dns.upstreams.len(), 2);
    }
}
