pub mod adb;
pub mod capture;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod session;
pub mod signals;
