use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "controller.toml";

/// Ground station parameters
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ControllerConfig {
    pub server_ip: String,
    pub server_port: u16,
    /// Gamepad polling period
    pub poll_ms: u64,
    /// How long to wait for the helicopter to answer a control byte
    pub reply_timeout_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            server_ip: "127.0.0.1".into(),
            server_port: 4371,
            poll_ms: 10,
            reply_timeout_ms: 5000,
        }
    }
}

impl ControllerConfig {
    pub fn load(path: Option<&str>) -> Result<Self> {
        // Only the default file may be missing
        let required = path.is_some();
        let path = path.unwrap_or(CONFIG_FILE);
        Config::builder()
            .add_source(File::new(path, FileFormat::Toml).required(required))
            .add_source(Environment::with_prefix("CONTROLLER").prefix_separator("__"))
            .build()
            .and_then(|config| config.try_deserialize())
            .with_context(|| format!("Cannot load configuration from {}", path))
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server_ip, self.server_port)
    }
}
