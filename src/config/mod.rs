//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables (`BUSWAY_*`)
//! - CLI arguments (for the demo binary)

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{BuswayError, Result};
use crate::session::{ProximityMask, SessionOptions, TrafficKind, TransportMask};

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Bus connection configuration
    #[serde(default)]
    pub bus: BusConfig,

    /// Service identity and session configuration
    #[serde(default)]
    pub service: ServiceConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| BuswayError::Config(format!("Failed to read config file: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| BuswayError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(address) = std::env::var("BUSWAY_ADDRESS") {
            config.bus.address = address;
        }
        if let Ok(name) = std::env::var("BUSWAY_NAME") {
            config.service.well_known_name = name;
        }
        if let Ok(path) = std::env::var("BUSWAY_PATH") {
            config.service.object_path = path;
        }
        if let Ok(port) = std::env::var("BUSWAY_PORT") {
            if let Ok(port) = port.parse() {
                config.service.contact_port = port;
            }
        }

        config
    }

    /// Default config file location (`<config dir>/busway/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("busway").join("config.toml"))
    }

    /// Load from the default location if a file exists there, else defaults
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(path),
            _ => Ok(Self::default()),
        }
    }

    /// Merge with another config (other takes precedence)
    pub fn merge(self, other: Self) -> Self {
        let bus_defaults = BusConfig::default();
        let service_defaults = ServiceConfig::default();

        Self {
            bus: BusConfig {
                address: if other.bus.address != bus_defaults.address {
                    other.bus.address
                } else {
                    self.bus.address
                },
            },
            service: ServiceConfig {
                well_known_name: if other.service.well_known_name
                    != service_defaults.well_known_name
                {
                    other.service.well_known_name
                } else {
                    self.service.well_known_name
                },
                object_path: if other.service.object_path != service_defaults.object_path {
                    other.service.object_path
                } else {
                    self.service.object_path
                },
                contact_port: if other.service.contact_port != service_defaults.contact_port {
                    other.service.contact_port
                } else {
                    self.service.contact_port
                },
                ..other.service
            },
        }
    }
}

/// Bus connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Bus daemon address
    pub address: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            address: "loopback:abstract=busway".to_string(),
        }
    }
}

/// Service identity and session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Well-known name to claim and advertise
    pub well_known_name: String,

    /// Object path the service object registers under
    pub object_path: String,

    /// Session contact port to bind
    pub contact_port: u16,

    /// Traffic kind offered to joiners
    #[serde(default)]
    pub traffic: TrafficKind,

    /// Whether more than one peer may join
    #[serde(default)]
    pub multipoint: bool,

    /// Acceptable joiner proximity
    #[serde(default)]
    pub proximity: ProximityMask,

    /// Transports to advertise over
    #[serde(default)]
    pub transports: TransportMask,
}

impl ServiceConfig {
    /// Session options offered at bind time.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            traffic: self.traffic,
            multipoint: self.multipoint,
            proximity: self.proximity,
            transports: self.transports,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            well_known_name: "org.busway.demo".to_string(),
            object_path: "/service".to_string(),
            contact_port: 42,
            traffic: TrafficKind::Messages,
            multipoint: false,
            proximity: ProximityMask::ANY,
            transports: TransportMask::ANY,
        }
    }
}
