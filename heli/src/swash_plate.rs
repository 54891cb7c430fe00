use crate::actuator::{Positionable, ServoOutput};

/// Where a servo sits around the rotor mast, as the cosine and sine of its
/// mounting angle. Fixed once built.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ServoGeometry {
    forward_position: f32,
    lateral_position: f32,
}

impl ServoGeometry {
    /// `degrees` is measured from the nose, growing towards the right.
    pub fn from_angle(degrees: f32) -> Self {
        let radians = degrees.to_radians();
        Self {
            forward_position: radians.cos(),
            lateral_position: radians.sin(),
        }
    }

    /// -1 at the tail, 1 at the nose.
    pub fn forward_position(&self) -> f32 {
        self.forward_position
    }

    /// -1 on the left, 1 on the right.
    pub fn lateral_position(&self) -> f32 {
        self.lateral_position
    }
}

/// Requested swash plate attitude, every axis in [-1, 1].
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct SwashTarget {
    pub collective: f32,
    pub pitch: f32,
    pub roll: f32,
}

/// Servo travel needed for `target` on a servo mounted at `geometry`.
///
/// Contributions are summed first and the sum is clamped to [-1, 1], so one
/// saturated servo never changes what the others receive.
pub fn servo_target(target: &SwashTarget, geometry: &ServoGeometry, max_servo_delta: f32) -> f32 {
    let raw = target.collective
        + target.roll * geometry.lateral_position
        + target.pitch * geometry.forward_position;
    max_servo_delta * raw.clamp(-1.0, 1.0)
}

/// A servo linked to the swash plate.
pub struct SwashServo {
    geometry: ServoGeometry,
    output: ServoOutput,
}

impl SwashServo {
    pub fn new(angle: f32, output: ServoOutput) -> Self {
        Self {
            geometry: ServoGeometry::from_angle(angle),
            output,
        }
    }

    pub fn geometry(&self) -> &ServoGeometry {
        &self.geometry
    }
}

impl Positionable for SwashServo {
    fn increment(&mut self) {
        self.output.increment()
    }

    fn decrement(&mut self) {
        self.output.decrement()
    }

    fn centre(&mut self) {
        self.output.centre()
    }

    fn set_position(&mut self, value: f32) {
        self.output.set_position(value)
    }

    fn position(&self) -> f32 {
        self.output.position()
    }
}

/// Swash plate driven by three servos: right, left and rear.
pub struct SwashPlate {
    servos: [SwashServo; 3],
    target: SwashTarget,
    max_servo_delta: f32,
}

impl SwashPlate {
    pub fn new(right: SwashServo, left: SwashServo, rear: SwashServo, max_servo_delta: f32) -> Self {
        Self {
            servos: [right, left, rear],
            target: SwashTarget::default(),
            max_servo_delta,
        }
    }

    pub fn target(&self) -> SwashTarget {
        self.target
    }

    pub fn servos(&self) -> &[SwashServo; 3] {
        &self.servos
    }

    /// Servo travel for the current target, in [right, left, rear] order.
    pub fn servo_targets(&self) -> [f32; 3] {
        self.servos
            .each_ref()
            .map(|servo| servo_target(&self.target, &servo.geometry, self.max_servo_delta))
    }

    /// Back to the neutral attitude.
    pub fn level(&mut self) {
        self.target = SwashTarget::default();
        self.servos.iter_mut().for_each(|servo| servo.centre());
    }

    /// Raise the whole plate by one servo step.
    pub fn rise(&mut self) {
        self.servos.iter_mut().for_each(|servo| servo.increment());
    }

    /// Lower the whole plate by one servo step.
    pub fn lower(&mut self) {
        self.servos.iter_mut().for_each(|servo| servo.decrement());
    }

    /// Positive height raises the plate without changing its orientation.
    pub fn set_height(&mut self, height: f32) {
        self.target.collective = height.clamp(-1.0, 1.0);
        self.update_position();
    }

    /// Positive pitch tilts the front of the plate down.
    pub fn set_pitch(&mut self, amount: f32) {
        self.target.pitch = amount.clamp(-1.0, 1.0);
        self.update_position();
    }

    /// Positive roll tilts the right side of the plate down.
    pub fn set_roll(&mut self, amount: f32) {
        self.target.roll = amount.clamp(-1.0, 1.0);
        self.update_position();
    }

    pub fn pitch_forwards(&mut self, amount: f32) {
        self.set_pitch(amount);
    }

    pub fn pitch_backwards(&mut self, amount: f32) {
        self.set_pitch(-amount);
    }

    pub fn roll_right(&mut self, amount: f32) {
        self.set_roll(amount);
    }

    pub fn roll_left(&mut self, amount: f32) {
        self.set_roll(-amount);
    }

    fn update_position(&mut self) {
        let targets = self.servo_targets();
        for (servo, target) in self.servos.iter_mut().zip(targets) {
            servo.set_position(target);
        }
        log::trace!("Swash plate {:?} -> {:?}", self.target, targets);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServoConfig;
    use crate::mock::{MockServo, Trace};

    const MAX_DELTA: f32 = 15.0;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    fn plate(angles: [f32; 3]) -> SwashPlate {
        let trace = Trace::default();
        let servo = |angle, channel| {
            let config = ServoConfig {
                channel,
                ..Default::default()
            };
            SwashServo::new(angle, Box::new(MockServo::new(&config, trace.clone())))
        };
        SwashPlate::new(servo(angles[0], 18), servo(angles[1], 22), servo(angles[2], 17), MAX_DELTA)
    }

    #[test]
    fn geometry_from_mounting_angle() {
        let front = ServoGeometry::from_angle(0.0);
        assert!(close(front.forward_position(), 1.0));
        assert!(close(front.lateral_position(), 0.0));

        let left_back = ServoGeometry::from_angle(120.0);
        assert!(close(left_back.forward_position(), -0.5));
        assert!(close(left_back.lateral_position(), 0.866_025));

        let right_back = ServoGeometry::from_angle(240.0);
        assert!(close(right_back.forward_position(), -0.5));
        assert!(close(right_back.lateral_position(), -0.866_025));
    }

    #[test]
    fn full_pitch_on_three_servo_plate() {
        let mut plate = plate([0.0, 120.0, 240.0]);
        plate.set_pitch(1.0);

        let [first, second, third] = plate.servo_targets();
        assert!(close(first, MAX_DELTA));
        assert!(close(second, -0.5 * MAX_DELTA));
        assert!(close(third, -0.5 * MAX_DELTA));

        let positions = plate.servos().each_ref().map(|servo| servo.position());
        assert!(close(positions[0], MAX_DELTA));
        assert!(close(positions[1], -0.5 * MAX_DELTA));
    }

    #[test]
    fn clamping_is_per_servo_after_summing() {
        let mut plate = plate([0.0, 120.0, 240.0]);
        plate.set_height(0.8);
        plate.set_pitch(1.0);

        let [first, second, third] = plate.servo_targets();
        // 0.8 + 1.0 saturates, 0.8 - 0.5 does not
        assert!(close(first, MAX_DELTA));
        assert!(close(second, 0.3 * MAX_DELTA));
        assert!(close(third, 0.3 * MAX_DELTA));
    }

    #[test]
    fn roll_splits_between_lateral_servos() {
        let mut plate = plate([0.0, 120.0, 240.0]);
        plate.roll_right(0.5);

        let [first, second, third] = plate.servo_targets();
        assert!(close(first, 0.0));
        assert!(close(second, 0.5 * 0.866_025 * MAX_DELTA));
        assert!(close(third, -0.5 * 0.866_025 * MAX_DELTA));
    }

    #[test]
    fn wrappers_flip_sign() {
        let mut plate = plate([0.0, 120.0, 240.0]);
        plate.pitch_backwards(0.4);
        plate.roll_left(0.2);
        assert_eq!(plate.target().pitch, -0.4);
        assert_eq!(plate.target().roll, -0.2);

        plate.pitch_forwards(0.4);
        plate.roll_right(0.2);
        assert_eq!(plate.target().pitch, 0.4);
        assert_eq!(plate.target().roll, 0.2);
    }

    #[test]
    fn axes_are_independent() {
        let mut plate = plate([0.0, 120.0, 240.0]);
        plate.set_height(0.2);
        plate.set_roll(-0.3);
        plate.set_pitch(0.1);
        assert_eq!(
            plate.target(),
            SwashTarget {
                collective: 0.2,
                pitch: 0.1,
                roll: -0.3
            }
        );
    }

    #[test]
    fn level_resets_target_and_centres() {
        let mut plate = plate([0.0, 120.0, 240.0]);
        plate.set_height(0.5);
        plate.set_pitch(-0.5);
        plate.level();

        assert_eq!(plate.target(), SwashTarget::default());
        assert!(plate.servos().iter().all(|servo| servo.position() == 0.0));
    }

    #[test]
    fn rise_and_lower_move_every_servo() {
        let mut plate = plate([0.0, 120.0, 240.0]);
        plate.rise();
        plate.rise();
        plate.lower();
        assert!(plate.servos().iter().all(|servo| servo.position() == 1.0));
    }
}
