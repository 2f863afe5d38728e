//! Configuration module for cpulaunch
//!
//! Provides CLI arguments and the launch configuration derived from them.

mod settings;

pub use settings::*;
