use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "heli.toml";

/// TCP endpoint the helicopter listens on
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Socket read timeout, bounds how long shutdown waits on an idle client
    pub read_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 4371,
            read_timeout_ms: 200,
        }
    }
}

/// Pilot loop parameters
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct PilotConfig {
    /// Lowest motor speed while armed
    pub min_throttle: f32,
    /// Motor speed reached by the start sequence
    pub initial_throttle: f32,
    /// Yaw error band inside which the tail is left alone
    pub yaw_threshold: f32,
    /// Delay between two ticks of the pilot loop
    pub tick_ms: u64,
    /// Raw gyro rates [x, y, z] equating to a demand of 1
    pub gyro_normalisation: [f32; 3],
    /// Raw accelerations [x, y, z] equating to a demand of 1
    pub acceleration_normalisation: [f32; 3],
}

impl Default for PilotConfig {
    fn default() -> Self {
        Self {
            min_throttle: 0.3,
            initial_throttle: 0.3,
            yaw_threshold: 0.1,
            tick_ms: 10,
            gyro_normalisation: [50.0, 50.0, 80.0],
            acceleration_normalisation: [1.0, 1.0, 1.0],
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct MotorConfig {
    /// Output channel of the speed controller
    pub channel: u8,
    /// Speed increase per spin-up step
    pub spin_up_step: f32,
    pub spin_up_interval_ms: u64,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            channel: 23,
            spin_up_step: 0.02,
            spin_up_interval_ms: 50,
        }
    }
}

/// One servo output
#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ServoConfig {
    pub channel: u8,
    /// Position considered centred, in servo units
    pub centre_offset: f32,
    /// Mirror every position around the centre
    pub invert: bool,
}

/// Swash plate servo: an output plus where it sits around the rotor mast
#[derive(Serialize, Deserialize, Default, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SwashServoConfig {
    /// Mounting angle in degrees, 0 is the front and angles grow to the right
    pub angle: f32,
    pub channel: u8,
    pub centre_offset: f32,
    pub invert: bool,
}

impl SwashServoConfig {
    pub fn servo(&self) -> ServoConfig {
        ServoConfig {
            channel: self.channel,
            centre_offset: self.centre_offset,
            invert: self.invert,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SwashConfig {
    /// Servo travel corresponding to a fully deflected axis
    pub max_servo_delta: f32,
    pub right: SwashServoConfig,
    pub left: SwashServoConfig,
    pub rear: SwashServoConfig,
}

impl Default for SwashConfig {
    fn default() -> Self {
        let servo = |angle, channel| SwashServoConfig {
            angle,
            channel,
            ..Default::default()
        };
        Self {
            max_servo_delta: 15.0,
            right: servo(0.0, 18),
            left: servo(120.0, 22),
            rear: servo(240.0, 17),
        }
    }
}

/// Helicopter configuration parameters
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct HeliConfig {
    pub server: ServerConfig,
    pub pilot: PilotConfig,
    pub motor: MotorConfig,
    pub swash: SwashConfig,
    pub tail: ServoConfig,
}

impl Default for HeliConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            pilot: PilotConfig::default(),
            motor: MotorConfig::default(),
            swash: SwashConfig::default(),
            tail: ServoConfig {
                channel: 27,
                ..Default::default()
            },
        }
    }
}

impl HeliConfig {
    /// Load `path` (or `heli.toml` when absent), then apply `HELI__*`
    /// environment overrides. A missing default file means defaults, a
    /// missing explicit `path` is an error.
    pub fn load(path: Option<&str>) -> Result<Self> {
        // Only the default file may be missing
        let required = path.is_some();
        let path = path.unwrap_or(CONFIG_FILE);
        Config::builder()
            .add_source(File::new(path, FileFormat::Toml).required(required))
            .add_source(Environment::with_prefix("HELI").prefix_separator("__").separator("__"))
            .build()
            .and_then(|config| config.try_deserialize())
            .with_context(|| format!("Cannot load configuration from {}", path))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Config::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()
            .and_then(|config| config.try_deserialize())
            .context("Cannot parse configuration")
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
