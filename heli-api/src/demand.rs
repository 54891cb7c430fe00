use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Operator intent for one input sample.
///
/// Axes are normalised to [-1, 1], actions are plain flags. A `Demand` is
/// always replaced as a whole, never patched field by field where the pilot
/// can see it.
#[derive(Serialize, Deserialize, Default, Copy, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Demand {
    pub stop: bool,
    pub start: bool,
    pub calibrate: bool,
    pub throttle: f32,
    pub yaw: f32,
    pub pitch: f32,
    pub roll: f32,
    pub init_connection: bool,
    pub battery_connected: bool,
    pub request_gyro_state: bool,
}

/// Partial demand as carried by a single streaming frame.
///
/// Fields absent from the frame stay `None` and leave the previous value
/// untouched when merged.
#[derive(Serialize, Deserialize, Default, Copy, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DemandPatch {
    #[serde(alias = "stop_demand", skip_serializing_if = "Option::is_none")]
    pub stop: Option<bool>,
    #[serde(alias = "start_demand", skip_serializing_if = "Option::is_none")]
    pub start: Option<bool>,
    #[serde(alias = "calibration_demand", skip_serializing_if = "Option::is_none")]
    pub calibrate: Option<bool>,
    #[serde(alias = "throttle_demand", skip_serializing_if = "Option::is_none")]
    pub throttle: Option<f32>,
    #[serde(alias = "yaw_demand", skip_serializing_if = "Option::is_none")]
    pub yaw: Option<f32>,
    #[serde(alias = "pitch_demand", skip_serializing_if = "Option::is_none")]
    pub pitch: Option<f32>,
    #[serde(alias = "roll_demand", skip_serializing_if = "Option::is_none")]
    pub roll: Option<f32>,
    #[serde(alias = "init_connection_demand", skip_serializing_if = "Option::is_none")]
    pub init_connection: Option<bool>,
    #[serde(alias = "battery_connected_demand", skip_serializing_if = "Option::is_none")]
    pub battery_connected: Option<bool>,
    #[serde(alias = "request_gyro_state_demand", skip_serializing_if = "Option::is_none")]
    pub request_gyro_state: Option<bool>,
}

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
}

impl DemandPatch {
    /// Parse one newline-stripped streaming frame.
    pub fn parse(frame: &str) -> Result<Self, FrameError> {
        let value: serde_json::Value = serde_json::from_str(frame)?;
        if !value.is_object() {
            return Err(FrameError::NotAnObject);
        }
        Ok(serde_json::from_value(value)?)
    }
}

impl Demand {
    /// Return a new vector with every field present in `patch` replaced.
    /// Axes are clamped to [-1, 1].
    pub fn merge(&self, patch: &DemandPatch) -> Demand {
        Demand {
            stop: patch.stop.unwrap_or(self.stop),
            start: patch.start.unwrap_or(self.start),
            calibrate: patch.calibrate.unwrap_or(self.calibrate),
            throttle: patch.throttle.map(clamp_axis).unwrap_or(self.throttle),
            yaw: patch.yaw.map(clamp_axis).unwrap_or(self.yaw),
            pitch: patch.pitch.map(clamp_axis).unwrap_or(self.pitch),
            roll: patch.roll.map(clamp_axis).unwrap_or(self.roll),
            init_connection: patch.init_connection.unwrap_or(self.init_connection),
            battery_connected: patch.battery_connected.unwrap_or(self.battery_connected),
            request_gyro_state: patch.request_gyro_state.unwrap_or(self.request_gyro_state),
        }
    }

    /// `start` is only honoured while `stop` is released.
    pub fn wants_start(&self) -> bool {
        self.start && !self.stop
    }
}

impl From<Demand> for DemandPatch {
    fn from(demand: Demand) -> Self {
        DemandPatch {
            stop: Some(demand.stop),
            start: Some(demand.start),
            calibrate: Some(demand.calibrate),
            throttle: Some(demand.throttle),
            yaw: Some(demand.yaw),
            pitch: Some(demand.pitch),
            roll: Some(demand.roll),
            init_connection: Some(demand.init_connection),
            battery_connected: Some(demand.battery_connected),
            request_gyro_state: Some(demand.request_gyro_state),
        }
    }
}

pub fn clamp_axis(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(-1.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_fields_persist_across_frames() {
        let first = DemandPatch::parse(r#"{"throttle":0.2,"yaw":0.0}"#).unwrap();
        let second = DemandPatch::parse(r#"{"yaw":0.5}"#).unwrap();

        let demand = Demand::default().merge(&first).merge(&second);

        assert_eq!(demand.throttle, 0.2);
        assert_eq!(demand.yaw, 0.5);
        assert!(!demand.start);
    }

    #[test]
    fn legacy_key_names_are_accepted() {
        let patch = DemandPatch::parse(r#"{"throttle_demand":0.4,"stop_demand":true}"#).unwrap();
        assert_eq!(patch.throttle, Some(0.4));
        assert_eq!(patch.stop, Some(true));
    }

    #[test]
    fn axes_are_clamped_on_merge() {
        let patch = DemandPatch::parse(r#"{"pitch":3.0,"roll":-7}"#).unwrap();
        let demand = Demand::default().merge(&patch);
        assert_eq!(demand.pitch, 1.0);
        assert_eq!(demand.roll, -1.0);
    }

    #[test]
    fn malformed_frames_are_rejected() {
        assert!(matches!(DemandPatch::parse("{\"yaw\":"), Err(FrameError::Json(_))));
        assert!(matches!(DemandPatch::parse("[true, false]"), Err(FrameError::NotAnObject)));
        assert!(matches!(DemandPatch::parse(r#"{"yaw":"left"}"#), Err(FrameError::Json(_))));
    }

    #[test]
    fn full_vector_serialises_with_plain_names() {
        let demand = Demand {
            start: true,
            throttle: 0.5,
            ..Default::default()
        };
        let json = serde_json::to_string(&demand).unwrap();
        assert!(json.contains("\"start\":true"));
        assert!(json.contains("\"throttle\":0.5"));
        assert_eq!(Demand::default().merge(&DemandPatch::parse(&json).unwrap()), demand);
    }

    #[test]
    fn start_requires_stop_released() {
        let both = Demand {
            start: true,
            stop: true,
            ..Default::default()
        };
        assert!(!both.wants_start());
        assert!(Demand {
            start: true,
            ..Default::default()
        }
        .wants_start());
    }
}
