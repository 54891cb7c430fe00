use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use heli_api::Demand;

use crate::config::ControllerConfig;
use crate::connection::{Link, LinkError};
use crate::gamepad::DemandSource;

/// Ground station loop: turns operator demands into link actions.
pub struct Controller<S: DemandSource> {
    source: S,
    link: Link,
    poll: Duration,
    previous: Demand,
}

impl<S: DemandSource> Controller<S> {
    pub fn new(source: S, config: &ControllerConfig) -> Self {
        Self {
            source,
            link: Link::new(config.server_address(), Duration::from_millis(config.reply_timeout_ms)),
            poll: Duration::from_millis(config.poll_ms),
            previous: Demand::default(),
        }
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    /// Run until `shutdown` is raised or the demand source fails. Link
    /// failures are reported and wait for the operator to reconnect.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        while !shutdown.load(Ordering::Relaxed) {
            match self.source.next_demand().context("Lost the demand source")? {
                Some(demand) => self.handle(demand),
                None => thread::sleep(self.poll),
            }
        }
        self.link.close();
        Ok(())
    }

    fn handle(&mut self, demand: Demand) {
        let previous = std::mem::replace(&mut self.previous, demand);

        if demand.init_connection && !previous.init_connection {
            log::info!("Connecting to the helicopter");
            match self.link.init_connection() {
                Ok(()) => log::info!("Connected, waiting for the battery"),
                Err(e) => report(&e),
            }
        }

        if demand.battery_connected && !previous.battery_connected {
            if self.link.is_connected() {
                log::info!("Battery already confirmed");
            } else {
                self.confirm_battery();
            }
        }

        if self.link.is_connected() {
            if let Err(e) = self.link.send_demands(&demand) {
                report(&e);
            }
        }
    }

    fn confirm_battery(&mut self) {
        match self.link.confirm_battery() {
            Ok(true) => log::info!("Helicopter ready to fly"),
            Ok(false) => log::warn!("Helicopter not ready, check the battery and try again"),
            Err(e) => report(&e),
        }
    }
}

fn report(error: &LinkError) {
    match error {
        LinkError::NotConnected => log::warn!("Not connected, press start to connect"),
        LinkError::Unreachable(_) | LinkError::NoReply => {
            log::error!("{}, check the helicopter is on and reachable", error)
        },
        _ => log::error!("{}, press start to reconnect", error),
    }
}
