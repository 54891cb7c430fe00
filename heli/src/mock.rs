//! Simulated hardware.
//!
//! Stands in for the motor controller, the servos and the IMU when the
//! helicopter runs on a bench machine. Every actuator command is logged and
//! appended to a shared [`Trace`].

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Result};

use crate::actuator::{Motor, Positionable, TailServo};
use crate::config::{HeliConfig, MotorConfig, ServoConfig};
use crate::helicopter::{Airframe, Avionics, Helicopter};
use crate::sensor::Imu;
use crate::swash_plate::{SwashPlate, SwashServo};

const SERVO_STEP: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ServoOp {
    Increment,
    Decrement,
    Centre,
    Set,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    PowerOn,
    Armed,
    SpinUp(f32),
    SpinDown,
    Estop,
    MotorSpeed(f32),
    Servo {
        channel: u8,
        op: ServoOp,
        output: f32,
    },
    Calibrate,
}

/// Ordered record of everything the simulated hardware was asked to do.
#[derive(Clone, Default)]
pub struct Trace(Arc<Mutex<Vec<Event>>>);

impl Trace {
    fn lock(&self) -> MutexGuard<'_, Vec<Event>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, event: Event) {
        log::debug!("sim: {:?}", event);
        self.lock().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.lock().iter().filter(|event| predicate(event)).count()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

pub struct MockMotor {
    config: MotorConfig,
    armed: bool,
    speed: f32,
    trace: Trace,
}

impl MockMotor {
    pub fn new(config: &MotorConfig, trace: Trace) -> Self {
        Self {
            config: config.clone(),
            armed: false,
            speed: 0.0,
            trace,
        }
    }

    fn step_delay(&self) {
        if self.config.spin_up_interval_ms > 0 {
            thread::sleep(Duration::from_millis(self.config.spin_up_interval_ms));
        }
    }
}

impl Motor for MockMotor {
    fn arm(&mut self) -> Result<()> {
        self.armed = true;
        self.trace.push(Event::Armed);
        Ok(())
    }

    fn spin_up(&mut self, limit: f32, blocking: bool) -> Result<()> {
        if !self.armed {
            bail!("Motor {} is not armed", self.config.channel);
        }
        self.trace.push(Event::SpinUp(limit));
        let limit = limit.clamp(0.0, 1.0);
        let step = self.config.spin_up_step.max(f32::EPSILON);
        while self.speed < limit {
            self.speed = (self.speed + step).min(limit);
            if blocking {
                self.step_delay();
            }
        }
        Ok(())
    }

    fn spin_down(&mut self) {
        self.trace.push(Event::SpinDown);
        let step = self.config.spin_up_step.max(f32::EPSILON);
        while self.speed > 0.0 {
            self.speed = (self.speed - step).max(0.0);
            self.step_delay();
        }
    }

    fn estop(&mut self) {
        self.trace.push(Event::Estop);
        self.speed = 0.0;
    }

    fn set_motor_speed(&mut self, value: f32) -> Result<()> {
        if !self.armed {
            bail!("Motor {} is not armed", self.config.channel);
        }
        self.speed = value.clamp(0.0, 1.0);
        self.trace.push(Event::MotorSpeed(self.speed));
        Ok(())
    }

    fn speed(&self) -> f32 {
        self.speed
    }
}

/// Servo with trim, positions are relative to the configured centre.
pub struct MockServo {
    config: ServoConfig,
    position: f32,
    trace: Trace,
}

impl MockServo {
    pub fn new(config: &ServoConfig, trace: Trace) -> Self {
        Self {
            config: config.clone(),
            position: 0.0,
            trace,
        }
    }

    /// Value the servo output would actually be driven to.
    pub fn output(&self) -> f32 {
        let position = if self.config.invert {
            -self.position
        } else {
            self.position
        };
        self.config.centre_offset + position
    }

    fn apply(&mut self, op: ServoOp, position: f32) {
        self.position = position;
        self.trace.push(Event::Servo {
            channel: self.config.channel,
            op,
            output: self.output(),
        });
    }
}

impl Positionable for MockServo {
    fn increment(&mut self) {
        self.apply(ServoOp::Increment, self.position + SERVO_STEP);
    }

    fn decrement(&mut self) {
        self.apply(ServoOp::Decrement, self.position - SERVO_STEP);
    }

    fn centre(&mut self) {
        self.apply(ServoOp::Centre, 0.0);
    }

    fn set_position(&mut self, value: f32) {
        self.apply(ServoOp::Set, value);
    }

    fn position(&self) -> f32 {
        self.position
    }
}

/// Readings the simulated IMU returns, shared with whoever drives the
/// simulation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImuReadings {
    pub gyro: [f32; 3],
    pub acceleration: [f32; 3],
    pub failing: bool,
}

#[derive(Clone, Default)]
pub struct ImuHandle(Arc<Mutex<ImuReadings>>);

impl ImuHandle {
    pub fn set(&self, readings: ImuReadings) {
        *self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = readings;
    }

    fn get(&self) -> ImuReadings {
        *self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct MockImu {
    readings: ImuHandle,
    offset: [f32; 3],
    trace: Trace,
}

impl MockImu {
    pub fn new(readings: ImuHandle, trace: Trace) -> Self {
        Self {
            readings,
            offset: [0.0; 3],
            trace,
        }
    }

    fn current(&self) -> Result<ImuReadings> {
        let readings = self.readings.get();
        if readings.failing {
            bail!("IMU not responding");
        }
        Ok(readings)
    }
}

impl Imu for MockImu {
    fn get_acceleration(&mut self) -> Result<[f32; 3]> {
        Ok(self.current()?.acceleration)
    }

    fn get_gyro(&mut self) -> Result<[f32; 3]> {
        let gyro = self.current()?.gyro;
        Ok([gyro[0] - self.offset[0], gyro[1] - self.offset[1], gyro[2] - self.offset[2]])
    }

    fn calibrate(&mut self) -> Result<()> {
        self.offset = self.current()?.gyro;
        self.trace.push(Event::Calibrate);
        Ok(())
    }
}

/// Builds a simulated helicopter each time the battery is reported connected.
pub struct MockAirframe {
    config: HeliConfig,
    trace: Trace,
    imu: ImuHandle,
    failures: usize,
}

impl MockAirframe {
    pub fn new(config: HeliConfig) -> Self {
        Self {
            config,
            trace: Trace::default(),
            imu: ImuHandle::default(),
            failures: 0,
        }
    }

    /// Fail the next `count` power-ons, as a flat battery would.
    pub fn failing(mut self, count: usize) -> Self {
        self.failures = count;
        self
    }

    pub fn trace(&self) -> Trace {
        self.trace.clone()
    }

    pub fn imu(&self) -> ImuHandle {
        self.imu.clone()
    }
}

impl Airframe for MockAirframe {
    fn power_on(&mut self) -> Result<Avionics> {
        if self.failures > 0 {
            self.failures -= 1;
            bail!("No power on the sensor bus");
        }
        self.trace.push(Event::PowerOn);

        let servo = |config: &ServoConfig| Box::new(MockServo::new(config, self.trace.clone()));
        let swash = &self.config.swash;
        let swash_plate = SwashPlate::new(
            SwashServo::new(swash.right.angle, servo(&swash.right.servo())),
            SwashServo::new(swash.left.angle, servo(&swash.left.servo())),
            SwashServo::new(swash.rear.angle, servo(&swash.rear.servo())),
            swash.max_servo_delta,
        );
        let tail = TailServo::new(servo(&self.config.tail));
        let motor = Box::new(MockMotor::new(&self.config.motor, self.trace.clone()));

        Ok(Avionics {
            helicopter: Helicopter::new(motor, swash_plate, tail),
            imu: Box::new(MockImu::new(self.imu.clone(), self.trace.clone())),
        })
    }
}
