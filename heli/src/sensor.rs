use anyhow::{Context, Result};

use crate::config::PilotConfig;

/// Rate gyro and accelerometer.
pub trait Imu {
    /// Raw accelerations [x, y, z].
    fn get_acceleration(&mut self) -> Result<[f32; 3]>;
    /// Raw angular rates [x, y, z], z being yaw.
    fn get_gyro(&mut self) -> Result<[f32; 3]>;
    /// Record the current readings as zero. Called on every tick while the
    /// operator holds the button, so it has to be cheap and idempotent.
    fn calibrate(&mut self) -> Result<()>;
}

/// Scale factors turning raw sensor units into the [-1, 1] demand space.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GyroProfile {
    gyro: [f32; 3],
    acceleration: [f32; 3],
}

impl GyroProfile {
    pub fn new(gyro: [f32; 3], acceleration: [f32; 3]) -> Self {
        Self {
            gyro,
            acceleration,
        }
    }

    pub fn from_config(config: &PilotConfig) -> Self {
        Self::new(config.gyro_normalisation, config.acceleration_normalisation)
    }

    pub fn normalise_rates(&self, raw: [f32; 3]) -> [f32; 3] {
        normalise(raw, self.gyro)
    }

    pub fn normalise_accelerations(&self, raw: [f32; 3]) -> [f32; 3] {
        normalise(raw, self.acceleration)
    }
}

fn normalise(raw: [f32; 3], scale: [f32; 3]) -> [f32; 3] {
    let mut out = [0.0; 3];
    for ((out, raw), scale) in out.iter_mut().zip(raw).zip(scale) {
        *out = if scale == 0.0 {
            0.0
        } else {
            (raw / scale).clamp(-1.0, 1.0)
        };
    }
    out
}

/// Normalised sensor feedback for one tick.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Feedback {
    pub rates: [f32; 3],
    pub accelerations: [f32; 3],
}

impl Feedback {
    pub fn read(imu: &mut dyn Imu, profile: &GyroProfile) -> Result<Self> {
        let accelerations = imu.get_acceleration().context("Reading accelerometer")?;
        let rates = imu.get_gyro().context("Reading gyro")?;
        Ok(Self {
            rates: profile.normalise_rates(rates),
            accelerations: profile.normalise_accelerations(accelerations),
        })
    }

    pub fn yaw_rate(&self) -> f32 {
        self.rates[2]
    }
}
