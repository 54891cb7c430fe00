use anyhow::{Context, Result};

use crate::actuator::{Motor, Positionable, TailServo};
use crate::sensor::Imu;
use crate::swash_plate::SwashPlate;

/// Every actuator of the airframe.
pub struct Helicopter {
    pub motor: Box<dyn Motor + Send>,
    pub swash_plate: SwashPlate,
    pub tail: TailServo,
}

/// What powering the airframe up gives the pilot to fly with.
pub struct Avionics {
    pub helicopter: Helicopter,
    pub imu: Box<dyn Imu + Send>,
}

/// Source of avionics. Powering on fails when the battery is not plugged in
/// or a sensor does not answer.
pub trait Airframe {
    fn power_on(&mut self) -> Result<Avionics>;
}

impl Helicopter {
    pub fn new(motor: Box<dyn Motor + Send>, swash_plate: SwashPlate, tail: TailServo) -> Self {
        Self {
            motor,
            swash_plate,
            tail,
        }
    }

    pub fn arm(&mut self) -> Result<()> {
        self.motor.arm().context("Arming motor")
    }

    /// Slowly spin the motor up to `initial_speed`, blocking until done.
    pub fn start_motor(&mut self, initial_speed: f32) -> Result<()> {
        self.motor.spin_up(initial_speed, true).context("Spinning motor up")
    }

    pub fn level_swash(&mut self) {
        self.swash_plate.level();
    }

    pub fn turn_more_left(&mut self) {
        self.tail.more_left();
    }

    pub fn turn_more_right(&mut self) {
        self.tail.more_right();
    }

    /// Spin down, then put every servo back to neutral.
    pub fn stop(&mut self) {
        self.motor.spin_down();
        self.swash_plate.level();
        self.tail.centre();
    }
}
