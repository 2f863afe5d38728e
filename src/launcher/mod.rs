//! Runtime library resolution and launch planning
//!
//! Resolves the memory allocator, OpenMP runtime and multi-task manager,
//! composes the environment for workload processes and combines it with the
//! core partition into a [`LaunchPlan`].

mod core;
pub mod env;
pub mod logging;
pub mod ranges;
pub mod resolver;

pub use self::core::{InstancePlan, LaunchPlan, Launcher};
pub use env::{AmbientEnv, EnvironmentOverlay, PreloadList};
pub use logging::{LaunchLogger, LogLevel, StdoutLogger, TracingLogger};
pub use ranges::{format_ranges, parse_list_argument};
pub use resolver::{LibraryCategory, NameEntry, ProbeStrategy, Resolver};
