use anyhow::Result;

/// Main rotor speed controller.
///
/// Speeds are normalised to [0, 1]. `spin_down` and `estop` must be safe to
/// call at any time, armed or not, and cannot fail.
pub trait Motor {
    /// Prepare the speed controller to accept a spin command.
    fn arm(&mut self) -> Result<()>;
    /// Ramp up to `limit`. With `blocking` the call returns once the ramp is done.
    fn spin_up(&mut self, limit: f32, blocking: bool) -> Result<()>;
    /// Ramp down to a stop. Returns once the rotor is stopped.
    fn spin_down(&mut self);
    /// Cut the power immediately.
    fn estop(&mut self);
    fn set_motor_speed(&mut self, value: f32) -> Result<()>;
    fn speed(&self) -> f32;
}

/// Anything that can be driven to a position, in servo units.
pub trait Positionable {
    /// One step further in the positive direction.
    fn increment(&mut self);
    /// One step further in the negative direction.
    fn decrement(&mut self);
    fn centre(&mut self);
    fn set_position(&mut self, value: f32);
    fn position(&self) -> f32;
}

pub type ServoOutput = Box<dyn Positionable + Send>;

/// Tail rotor pitch servo.
pub struct TailServo {
    output: ServoOutput,
}

impl TailServo {
    pub fn new(output: ServoOutput) -> Self {
        Self {
            output,
        }
    }

    /// Increase the counter-clockwise yaw rate.
    pub fn more_left(&mut self) {
        self.output.decrement();
    }

    /// Increase the clockwise yaw rate.
    pub fn more_right(&mut self) {
        self.output.increment();
    }
}

impl Positionable for TailServo {
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
