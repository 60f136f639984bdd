//! Client configuration.
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration. Durations are whole milliseconds.

use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tessera_transport::TransportConfig;

use crate::error::ConfigError;

/// Tessera client configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ClientConfig {
    /// Socket configuration
    #[serde(default)]
    pub network: NetworkConfig,
    /// Domain session timing and thresholds
    #[serde(default)]
    pub session: SessionConfig,
    /// Who this client says it is
    #[serde(default)]
    pub identity: IdentityConfig,
}

/// Socket configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Local address to bind
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Socket receive buffer size
    #[serde(default = "default_buffer_size")]
    pub recv_buffer_size: usize,
    /// Socket send buffer size
    #[serde(default = "default_buffer_size")]
    pub send_buffer_size: usize,
}

/// Domain session timing and thresholds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionConfig {
    /// Time between check-ins (ms)
    #[serde(default = "default_check_in_interval")]
    pub check_in_interval_ms: u64,
    /// Silence after which a node is removed (ms)
    #[serde(default = "default_silent_node_threshold")]
    pub silent_node_threshold_ms: u64,
    /// Time between hole-punch pings to inactive nodes (ms)
    #[serde(default = "default_ping_punch_interval")]
    pub ping_punch_interval_ms: u64,
    /// Use a node's public address as soon as it is added
    #[serde(default = "default_true")]
    pub activate_public_immediately: bool,
    /// Unanswered check-ins after which unreliable node traffic is dropped
    #[serde(default = "default_drop_threshold")]
    pub drop_threshold: u32,
    /// Unanswered check-ins after which the session is reset
    #[serde(default = "default_max_silent_check_ins")]
    pub max_silent_check_ins: u32,
    /// Upper bound on duplicate copies of one check-in
    #[serde(default = "default_max_check_in_copies")]
    pub max_check_in_copies: u32,
    /// Metaverse login denials before the keypair is regenerated
    #[serde(default = "default_keypair_regen_denials")]
    pub keypair_regen_denials: u32,
}

/// Who this client says it is
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct IdentityConfig {
    /// Metaverse username, empty for anonymous sessions
    #[serde(default)]
    pub username: String,
    /// Place name sent with every check-in
    #[serde(default)]
    pub place_name: String,
}

// Default values

fn default_bind_addr() -> String {
    "0.0.0.0:0".to_string()
}

fn default_buffer_size() -> usize {
    256 * 1024
}

fn default_check_in_interval() -> u64 {
    1000
}

fn default_silent_node_threshold() -> u64 {
    10_000
}

fn default_ping_punch_interval() -> u64 {
    100
}

fn default_true() -> bool {
    true
}

fn default_drop_threshold() -> u32 {
    2
}

fn default_max_silent_check_ins() -> u32 {
    5
}

fn default_max_check_in_copies() -> u32 {
    20
}

fn default_keypair_regen_denials() -> u32 {
    3
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            recv_buffer_size: default_buffer_size(),
            send_buffer_size: default_buffer_size(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            check_in_interval_ms: default_check_in_interval(),
            silent_node_threshold_ms: default_silent_node_threshold(),
            ping_punch_interval_ms: default_ping_punch_interval(),
            activate_public_immediately: true,
            drop_threshold: default_drop_threshold(),
            max_silent_check_ins: default_max_silent_check_ins(),
            max_check_in_copies: default_max_check_in_copies(),
            keypair_regen_denials: default_keypair_regen_denials(),
        }
    }
}

impl SessionConfig {
    /// Time between check-ins
    #[must_use]
    pub fn check_in_interval(&self) -> Duration {
        Duration::from_millis(self.check_in_interval_ms)
    }

    /// Silence after which a node is removed
    #[must_use]
    pub fn silent_node_threshold(&self) -> Duration {
        Duration::from_millis(self.silent_node_threshold_ms)
    }

    /// Time between hole-punch pings
    #[must_use]
    pub fn ping_punch_interval(&self) -> Duration {
        Duration::from_millis(self.ping_punch_interval_ms)
    }
}

impl ClientConfig {
    /// Parse configuration from TOML text
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the text is not valid TOML for this
    /// structure, or [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse the bind address
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the address cannot be parsed.
    pub fn parse_bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.network
            .bind_addr
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("bad bind address: {}", self.network.bind_addr)))
    }

    /// Socket options for the transport
    #[must_use]
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            recv_buffer_size: self.network.recv_buffer_size,
            send_buffer_size: self.network.send_buffer_size,
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let addr = self.parse_bind_addr()?;
        if addr.is_ipv6() {
            return Err(ConfigError::Invalid("bind address must be IPv4".to_string()));
        }

        let session = &self.session;
        if session.check_in_interval_ms == 0 || session.ping_punch_interval_ms == 0 {
            return Err(ConfigError::Invalid("intervals must be non-zero".to_string()));
        }
        if session.silent_node_threshold_ms <= session.check_in_interval_ms {
            return Err(ConfigError::Invalid(
                "silent node threshold must exceed the check-in interval".to_string(),
            ));
        }
        if session.drop_threshold == 0 || session.drop_threshold > session.max_silent_check_ins {
            return Err(ConfigError::Invalid(format!(
                "drop threshold must be between 1 and {}",
                session.max_silent_check_ins
            )));
        }
        if session.max_check_in_copies == 0 {
            return Err(ConfigError::Invalid("max check-in copies must be non-zero".to_string()));
        }
        if session.keypair_regen_denials == 0 {
            return Err(ConfigError::Invalid("keypair regeneration threshold must be non-zero".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.network.bind_addr, "0.0.0.0:0");
        assert_eq!(config.session.check_in_interval(), Duration::from_secs(1));
        assert_eq!(config.session.silent_node_threshold(), Duration::from_secs(10));
        assert_eq!(config.session.ping_punch_interval(), Duration::from_millis(100));
        assert!(config.session.activate_public_immediately);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(ClientConfig::from_toml_str("").unwrap(), ClientConfig::default());
    }

    #[test]
    fn test_partial_document() {
        let config = ClientConfig::from_toml_str(
            r#"
            [session]
            check_in_interval_ms = 500
            max_silent_check_ins = 8

            [identity]
            place_name = "hub"
            "#,
        )
        .unwrap();
        assert_eq!(config.session.check_in_interval_ms, 500);
        assert_eq!(config.session.max_silent_check_ins, 8);
        assert_eq!(config.session.drop_threshold, 2);
        assert_eq!(config.identity.place_name, "hub");
    }

    #[test]
    fn test_config_validation() {
        let mut config = ClientConfig::default();
        config.session.drop_threshold = 9;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = ClientConfig::default();
        config.network.bind_addr = "[::1]:0".to_string();
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.session.silent_node_threshold_ms = 10;
        assert!(config.validate().is_err());

        assert!(matches!(
            ClientConfig::from_toml_str("session = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_toml_serialization() {
        let config = ClientConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: ClientConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            ClientConfig::load("/nonexistent/tessera.toml"),
            Err(ConfigError::Io(_))
        ));
    }
}
