use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use log::LevelFilter;
use signal_hook::consts::{SIGINT, SIGTERM};

use heli::config::HeliConfig;
use heli::mock::MockAirframe;
use heli::server::Server;
use heli_api::log::Logger;

fn main() -> Result<()> {
    let mut log_sink = Logger::init(LevelFilter::Info);

    let path = std::env::args().nth(1);
    let config = HeliConfig::load(path.as_deref())?;

    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGINT, Arc::clone(&shutdown)).context("Registering SIGINT")?;
    signal_hook::flag::register(SIGTERM, Arc::clone(&shutdown)).context("Registering SIGTERM")?;

    log::info!("Flying the simulated airframe");
    let airframe = MockAirframe::new(config.clone());
    let mut server = Server::bind(config, airframe)?;

    let server = {
        let shutdown = Arc::clone(&shutdown);
        thread::Builder::new().name("server".into()).spawn(move || server.run(&shutdown))?
    };

    while !shutdown.load(Ordering::Relaxed) && !server.is_finished() {
        log_sink.handle_logs();
        thread::sleep(Duration::from_millis(10));
    }
    shutdown.store(true, Ordering::Relaxed);

    let result = server.join().map_err(|_| anyhow::anyhow!("Server thread panicked"))?;
    log_sink.handle_logs();
    result
}
