use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use log::LevelFilter;
use signal_hook::consts::{SIGINT, SIGTERM};

use controller::config::ControllerConfig;
use controller::controller::Controller;
use controller::gamepad::Gamepad;
use heli_api::log::Logger;

fn main() -> Result<()> {
    let mut log_sink = Logger::init(LevelFilter::Info);

    let path = std::env::args().nth(1);
    let config = ControllerConfig::load(path.as_deref())?;

    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGINT, Arc::clone(&shutdown)).context("Registering SIGINT")?;
    signal_hook::flag::register(SIGTERM, Arc::clone(&shutdown)).context("Registering SIGTERM")?;

    log::info!("Helicopter expected at {}", config.server_address());
    let input = {
        let shutdown = Arc::clone(&shutdown);
        // Gilrs stays on the thread that polls it
        thread::Builder::new().name("input".into()).spawn(move || -> Result<()> {
            let gamepad = Gamepad::open()?;
            Controller::new(gamepad, &config).run(&shutdown)
        })?
    };

    while !shutdown.load(Ordering::Relaxed) && !input.is_finished() {
        log_sink.handle_logs();
        thread::sleep(Duration::from_millis(10));
    }
    shutdown.store(true, Ordering::Relaxed);

    let result = input.join().map_err(|_| anyhow::anyhow!("Input thread panicked"))?;
    if let Err(e) = &result {
        log::error!("{:#}", e);
    }
    log_sink.handle_logs();
    result
}
