use anyhow::{anyhow, bail, Result};
use gilrs::{Axis, Button, Event, EventType, GamepadId, Gilrs};

use heli_api::demand::clamp_axis;
use heli_api::Demand;

/// Gamepad event reduced to what the mapping cares about.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Input {
    Axis(Axis, f32),
    Button(Button, bool),
}

impl Input {
    pub fn from_event(event: &EventType) -> Option<Self> {
        match *event {
            EventType::AxisChanged(axis, value, _) => Some(Input::Axis(axis, value)),
            EventType::ButtonPressed(button, _) => Some(Input::Button(button, true)),
            EventType::ButtonReleased(button, _) => Some(Input::Button(button, false)),
            _ => None,
        }
    }
}

/// Demand vector as built from the gamepad events seen so far.
#[derive(Debug, Default, Clone)]
pub struct GamepadState {
    demand: Demand,
    left_bumper: bool,
    right_bumper: bool,
}

impl GamepadState {
    pub fn demand(&self) -> Demand {
        self.demand
    }

    /// Fold one input in, returns whether the demand changed.
    pub fn apply(&mut self, input: Input) -> bool {
        let before = self.demand;
        let demand = &mut self.demand;
        match input {
            Input::Axis(axis, value) => {
                let value = clamp_axis(value);
                match axis {
                    Axis::LeftStickX => demand.yaw = value,
                    Axis::LeftStickY => demand.throttle = value,
                    Axis::RightStickX => demand.roll = value,
                    Axis::RightStickY => demand.pitch = value,
                    _ => (),
                }
            },
            Input::Button(button, pressed) => match button {
                Button::LeftTrigger => self.left_bumper = pressed,
                Button::RightTrigger => self.right_bumper = pressed,
                Button::Mode => demand.stop = pressed,
                Button::North => demand.calibrate = pressed,
                Button::West => demand.request_gyro_state = pressed,
                Button::Start => demand.init_connection = pressed,
                Button::Select => demand.battery_connected = pressed,
                _ => (),
            },
        }
        // Start only while both bumpers are held
        self.demand.start = self.left_bumper && self.right_bumper;
        self.demand != before
    }
}

/// Anything producing operator demands.
pub trait DemandSource {
    /// `Ok(None)` when nothing changed since the last call. An error means
    /// the source is gone for good.
    fn next_demand(&mut self) -> Result<Option<Demand>>;
}

pub struct Gamepad {
    gilrs: Gilrs,
    id: GamepadId,
    state: GamepadState,
}

impl Gamepad {
    /// Use the first gamepad found.
    pub fn open() -> Result<Self> {
        let gilrs = Gilrs::new().map_err(|e| anyhow!("Cannot access gamepads: {}", e))?;
        let Some((id, gamepad)) = gilrs.gamepads().next() else {
            bail!("No gamepad connected");
        };
        log::info!("Using {} ({:?})", gamepad.name(), gamepad.power_info());

        Ok(Self {
            gilrs,
            id,
            state: GamepadState::default(),
        })
    }
}

impl DemandSource for Gamepad {
    fn next_demand(&mut self) -> Result<Option<Demand>> {
        let mut changed = false;
        while let Some(Event {
            id,
            event,
            ..
        }) = self.gilrs.next_event()
        {
            if id != self.id {
                continue;
            }
            if event == EventType::Disconnected {
                bail!("Gamepad disconnected");
            }
            if let Some(input) = Input::from_event(&event) {
                changed |= self.state.apply(input);
            }
        }
        Ok(changed.then(|| self.state.demand()))
    }
}
