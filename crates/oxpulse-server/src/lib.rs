//! HTTP front end and process wiring for the oxpulse alert engine.

pub mod api;
pub mod app;
pub mod config;
pub mod logging;
pub mod seed;
pub mod state;
