pub mod config;
pub mod connection;
pub mod controller;
pub mod gamepad;
