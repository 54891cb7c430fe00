pub mod actuator;
pub mod config;
pub mod helicopter;
pub mod mock;
pub mod pilot;
pub mod polling;
pub mod sensor;
pub mod server;
pub mod swash_plate;
