use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use heli_api::Demand;
use thread_priority::{
    RealtimeThreadSchedulePolicy, ScheduleParams, ThreadBuilder, ThreadPriority, ThreadSchedulePolicy,
};

use crate::config::PilotConfig;
use crate::helicopter::{Avionics, Helicopter};
use crate::sensor::{Feedback, GyroProfile, Imu};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PilotState {
    Idle,
    Armed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum YawCorrection {
    MoreLeft,
    MoreRight,
}

/// Bang-bang yaw law: correct by one tail step when the error leaves the
/// `threshold` band, do nothing inside it.
pub fn yaw_correction(demand: f32, rate: f32, threshold: f32) -> Option<YawCorrection> {
    let delta = demand - rate;
    if delta > threshold {
        Some(YawCorrection::MoreLeft)
    } else if delta < -threshold {
        Some(YawCorrection::MoreRight)
    } else {
        None
    }
}

/// Latest demand, written whole by the link and read whole by the pilot.
#[derive(Clone, Default)]
pub struct DemandCell(Arc<Mutex<Demand>>);

impl DemandCell {
    pub fn publish(&self, demand: Demand) {
        *self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = demand;
    }

    pub fn snapshot(&self) -> Demand {
        *self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Turns demands and gyro feedback into actuator commands.
pub struct Pilot {
    helicopter: Helicopter,
    imu: Box<dyn Imu + Send>,
    profile: GyroProfile,
    config: PilotConfig,
    state: PilotState,
}

impl Pilot {
    /// Arm the motor and check the IMU answers. Any failure means the
    /// helicopter is not ready to fly.
    pub fn new(avionics: Avionics, config: &PilotConfig) -> Result<Self> {
        let Avionics {
            mut helicopter,
            mut imu,
        } = avionics;
        let profile = GyroProfile::from_config(config);

        Feedback::read(imu.as_mut(), &profile).context("IMU unreachable")?;
        helicopter.arm()?;
        helicopter.level_swash();

        Ok(Self {
            helicopter,
            imu,
            profile,
            config: config.clone(),
            state: PilotState::Idle,
        })
    }

    pub fn state(&self) -> PilotState {
        self.state
    }

    pub fn helicopter(&self) -> &Helicopter {
        &self.helicopter
    }

    /// One scheduling step: start sequencing while idle, flight tick while
    /// armed.
    pub fn step(&mut self, demand: &Demand) {
        if demand.calibrate {
            if let Err(e) = self.imu.calibrate() {
                log::warn!("Calibration failed: {:#}", e);
            }
        }

        match self.state {
            PilotState::Idle if demand.wants_start() => self.start(),
            PilotState::Idle => (),
            PilotState::Armed => self.tick(demand),
        }
    }

    fn start(&mut self) {
        log::info!("Starting motor");
        match self.helicopter.start_motor(self.config.initial_throttle) {
            Ok(()) => {
                self.state = PilotState::Armed;
                log::info!("Armed");
            },
            Err(e) => {
                log::error!("{:#}, cutting power", e);
                self.helicopter.motor.estop();
            },
        }
    }

    fn tick(&mut self, demand: &Demand) {
        let feedback = match Feedback::read(self.imu.as_mut(), &self.profile) {
            Ok(feedback) => feedback,
            Err(e) => {
                log::warn!("{:#}, flying without feedback", e);
                Feedback::default()
            },
        };

        if demand.stop {
            log::info!("Stop requested, spinning down");
            self.helicopter.motor.spin_down();
            self.state = PilotState::Idle;
        }

        if self.state == PilotState::Armed {
            let throttle = self.config.min_throttle.max(demand.throttle.abs());
            if let Err(e) = self.helicopter.motor.set_motor_speed(throttle) {
                log::error!("Motor rejected speed {}: {:#}", throttle, e);
                self.helicopter.motor.estop();
                self.state = PilotState::Idle;
            } else {
                // Collective follows throttle
                self.helicopter.swash_plate.set_height(demand.throttle);
            }
        }

        match yaw_correction(demand.yaw, feedback.yaw_rate(), self.config.yaw_threshold) {
            Some(YawCorrection::MoreLeft) => {
                log::debug!("Turning more left");
                self.helicopter.turn_more_left();
            },
            Some(YawCorrection::MoreRight) => {
                log::debug!("Turning more right");
                self.helicopter.turn_more_right();
            },
            None => (),
        }

        self.helicopter.swash_plate.set_pitch(demand.pitch);
        self.helicopter.swash_plate.set_roll(demand.roll);

        if demand.request_gyro_state {
            log::info!("Gyro rates: {:?}, accelerations: {:?}", feedback.rates, feedback.accelerations);
        }
    }

    /// Spin down and level everything, whatever the current state.
    pub fn shutdown(&mut self) {
        log::info!("Shutting pilot down");
        self.helicopter.stop();
        self.state = PilotState::Idle;
    }
}

impl Drop for Pilot {
    fn drop(&mut self) {
        if self.state == PilotState::Armed {
            self.helicopter.motor.estop();
        }
    }
}

enum Signal {
    StopFlying,
}

/// Pilot running on its own thread.
pub struct PilotHandle {
    signal: Sender<Signal>,
    thread: Option<JoinHandle<()>>,
}

impl PilotHandle {
    pub fn spawn(pilot: Pilot, demands: DemandCell, tick: Duration) -> Result<Self> {
        let (signal, signals) = channel();
        let thread = ThreadBuilder::default()
            .name("pilot")
            .policy(ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo))
            .priority(ThreadPriority::from_posix(ScheduleParams {
                sched_priority: 40,
            }))
            .spawn_careless(move || fly(pilot, demands, signals, tick))
            .context("Spawning pilot thread")?;
        Ok(Self {
            signal,
            thread: Some(thread),
        })
    }

    /// Spin the motor down and end the pilot thread. Returns once the motor
    /// is stopped.
    pub fn stop_flying(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.signal.send(Signal::StopFlying);
            if thread.join().is_err() {
                log::error!("Pilot thread panicked");
            }
        }
    }

    pub fn is_flying(&self) -> bool {
        self.thread.as_ref().is_some_and(|thread| !thread.is_finished())
    }
}

impl Drop for PilotHandle {
    fn drop(&mut self) {
        self.stop_flying();
    }
}

fn fly(mut pilot: Pilot, demands: DemandCell, signals: Receiver<Signal>, tick: Duration) {
    loop {
        match signals.recv_timeout(tick) {
            Ok(Signal::StopFlying) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => (),
        }
        pilot.step(&demands.snapshot());
    }
    pilot.shutdown();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeliConfig;
    use crate::helicopter::Airframe;
    use crate::mock::{Event, ImuHandle, ImuReadings, MockAirframe, ServoOp, Trace};
    use std::thread;

    const TAIL: u8 = 27;

    fn config() -> HeliConfig {
        let mut config = HeliConfig::default();
        config.motor.spin_up_interval_ms = 0;
        config
    }

    fn pilot() -> (Pilot, Trace, ImuHandle) {
        let config = config();
        let mut airframe = MockAirframe::new(config.clone());
        let pilot = Pilot::new(airframe.power_on().unwrap(), &config.pilot).unwrap();
        (pilot, airframe.trace(), airframe.imu())
    }

    fn armed() -> (Pilot, Trace, ImuHandle) {
        let (mut pilot, trace, imu) = pilot();
        pilot.step(&Demand {
            start: true,
            ..Default::default()
        });
        assert_eq!(pilot.state(), PilotState::Armed);
        trace.clear();
        (pilot, trace, imu)
    }

    fn spin_ups(trace: &Trace) -> usize {
        trace.count(|event| matches!(event, Event::SpinUp(_)))
    }

    fn tail_ops(trace: &Trace) -> Vec<ServoOp> {
        trace
            .events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Servo {
                    channel: TAIL,
                    op,
                    ..
                } => Some(op),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn bang_bang_thresholds() {
        assert_eq!(yaw_correction(0.5, 0.2, 0.1), Some(YawCorrection::MoreLeft));
        assert_eq!(yaw_correction(0.2, 0.25, 0.1), None);
        assert_eq!(yaw_correction(-0.5, 0.0, 0.1), Some(YawCorrection::MoreRight));
        assert_eq!(yaw_correction(0.1, 0.0, 0.1), None);
    }

    #[test]
    fn start_spins_up_once() {
        let (mut pilot, trace, _) = pilot();
        let start = Demand {
            start: true,
            ..Default::default()
        };
        pilot.step(&start);
        pilot.step(&start);
        pilot.step(&start);

        assert_eq!(pilot.state(), PilotState::Armed);
        assert_eq!(spin_ups(&trace), 1);
        assert!(trace.events().contains(&Event::SpinUp(0.3)));
    }

    #[test]
    fn start_is_ignored_while_stop_held() {
        let (mut pilot, trace, _) = pilot();
        pilot.step(&Demand {
            start: true,
            stop: true,
            ..Default::default()
        });
        assert_eq!(pilot.state(), PilotState::Idle);
        assert_eq!(spin_ups(&trace), 0);
    }

    #[test]
    fn stop_wins_over_everything_else() {
        let (mut pilot, trace, _) = armed();
        pilot.step(&Demand {
            stop: true,
            start: true,
            throttle: 0.9,
            pitch: 0.5,
            ..Default::default()
        });

        assert_eq!(pilot.state(), PilotState::Idle);
        let events = trace.events();
        assert!(events.contains(&Event::SpinDown));
        assert!(!events.iter().any(|event| matches!(event, Event::MotorSpeed(_))));
        // Other fields are still visited
        assert_eq!(pilot.helicopter().swash_plate.target().pitch, 0.5);
    }

    #[test]
    fn rearm_after_spin_down() {
        let (mut pilot, trace, _) = armed();
        pilot.step(&Demand {
            stop: true,
            ..Default::default()
        });
        assert_eq!(pilot.helicopter().motor.speed(), 0.0);
        pilot.step(&Demand {
            start: true,
            ..Default::default()
        });
        assert_eq!(pilot.state(), PilotState::Armed);
        assert_eq!(spin_ups(&trace), 1);
    }

    #[test]
    fn throttle_has_a_floor_and_drives_collective() {
        let (mut pilot, trace, _) = armed();
        pilot.step(&Demand {
            throttle: 0.1,
            ..Default::default()
        });
        pilot.step(&Demand {
            throttle: -0.6,
            ..Default::default()
        });

        let speeds: Vec<f32> = trace
            .events()
            .into_iter()
            .filter_map(|event| match event {
                Event::MotorSpeed(speed) => Some(speed),
                _ => None,
            })
            .collect();
        assert_eq!(speeds, vec![0.3, 0.6]);
        assert_eq!(pilot.helicopter().swash_plate.target().collective, -0.6);
    }

    #[test]
    fn yaw_error_moves_the_tail() {
        let (mut pilot, trace, imu) = armed();
        // 16 / 80 = 0.2 normalised
        imu.set(ImuReadings {
            gyro: [0.0, 0.0, 16.0],
            ..Default::default()
        });

        pilot.step(&Demand {
            yaw: 0.5,
            ..Default::default()
        });
        assert_eq!(tail_ops(&trace), vec![ServoOp::Decrement]);

        trace.clear();
        imu.set(ImuReadings {
            gyro: [0.0, 0.0, 20.0],
            ..Default::default()
        });
        pilot.step(&Demand {
            yaw: 0.2,
            ..Default::default()
        });
        assert!(tail_ops(&trace).is_empty());

        pilot.step(&Demand {
            yaw: -0.5,
            ..Default::default()
        });
        assert_eq!(tail_ops(&trace), vec![ServoOp::Increment]);
    }

    #[test]
    fn sensor_failure_degrades_to_zero_feedback() {
        let (mut pilot, trace, imu) = armed();
        imu.set(ImuReadings {
            gyro: [0.0, 0.0, 80.0],
            failing: true,
            ..Default::default()
        });

        // Zero feedback: 0.05 stays inside the band
        pilot.step(&Demand {
            yaw: 0.05,
            throttle: 0.5,
            ..Default::default()
        });
        assert_eq!(pilot.state(), PilotState::Armed);
        assert!(trace.events().contains(&Event::MotorSpeed(0.5)));
        assert!(tail_ops(&trace).is_empty());
    }

    #[test]
    fn pitch_and_roll_pass_through() {
        let (mut pilot, _, _) = armed();
        pilot.step(&Demand {
            pitch: 0.4,
            roll: -0.25,
            ..Default::default()
        });
        let target = pilot.helicopter().swash_plate.target();
        assert_eq!(target.pitch, 0.4);
        assert_eq!(target.roll, -0.25);
    }

    #[test]
    fn calibration_repeats_while_held() {
        let (mut pilot, trace, _) = pilot();
        let calibrate = Demand {
            calibrate: true,
            ..Default::default()
        };
        pilot.step(&calibrate);
        pilot.step(&calibrate);
        pilot.step(&Demand::default());
        assert_eq!(trace.count(|event| *event == Event::Calibrate), 2);
    }

    #[test]
    fn unreachable_imu_is_not_ready() {
        let config = config();
        let mut airframe = MockAirframe::new(config.clone());
        airframe.imu().set(ImuReadings {
            failing: true,
            ..Default::default()
        });
        assert!(Pilot::new(airframe.power_on().unwrap(), &config.pilot).is_err());
    }

    #[test]
    fn stop_flying_spins_down_before_returning() {
        let (pilot, trace, _) = pilot();
        let demands = DemandCell::default();
        let mut handle = PilotHandle::spawn(pilot, demands.clone(), Duration::from_millis(1)).unwrap();

        demands.publish(Demand {
            start: true,
            throttle: 0.5,
            ..Default::default()
        });
        thread::sleep(Duration::from_millis(50));
        assert!(handle.is_flying());

        handle.stop_flying();
        assert!(!handle.is_flying());

        let events = trace.events();
        let spin_down = events.iter().rposition(|event| *event == Event::SpinDown).unwrap();
        assert!(events.contains(&Event::SpinUp(0.3)));
        assert!(!events[spin_down..]
            .iter()
            .any(|event| matches!(event, Event::MotorSpeed(_) | Event::SpinUp(_))));
    }
}
