//! # cpulaunch - Topology-Aware Launcher for CPU Workloads
//!
//! cpulaunch starts deep-learning inference and training workloads on CPU
//! machines. It splits the cores into per-instance pools, picks a memory
//! allocator and an OpenMP runtime, and runs every instance with a tuned
//! environment and core binding.
//!
//! ## Features
//!
//! - **Topology Discovery**: sockets, NUMA nodes, hyperthreads and P/E cores
//!   from `lscpu`, sysfs or a flat fallback
//! - **Core Partitioning**: instance pools by count or by size, optionally
//!   never crossing a NUMA node
//! - **Library Resolution**: TCMalloc/JeMalloc and Intel OpenMP located on
//!   disk and added to `LD_PRELOAD`
//! - **Environment Composition**: `MALLOC_CONF`, `KMP_*` and `OMP_*` presets
//!   that never override what the user already exported
//! - **Core Binding**: numactl, taskset or native `sched_setaffinity`
//!
//! ## Quick Start
//!
//! ```no_run
//! use cpulaunch::config::LaunchConfig;
//! use cpulaunch::launcher::Launcher;
//! use cpulaunch::spawn::InstanceSpawner;
//!
//! let mut launcher = Launcher::from_system("").unwrap();
//! let config = LaunchConfig {
//!     ncores_per_instance: 4,
//!     ..Default::default()
//! };
//!
//! let plan = launcher.launch(&config).unwrap();
//! plan.print_summary();
//!
//! let workload = vec!["python".to_string(), "infer.py".to_string()];
//! let report = InstanceSpawner::new(&plan).spawn_all(&workload).unwrap();
//! std::process::exit(report.exit_code());
//! ```
//!
//! ## Partitioning Only
//!
//! ```no_run
//! use cpulaunch::system::{CpuPoolList, PoolRequest};
//!
//! let topology = CpuPoolList::detect();
//! topology.print_summary();
//!
//! let pools = topology
//!     .gen_pools_ondemand(&PoolRequest {
//!         ninstances: 2,
//!         skip_cross_node_cores: true,
//!         ..Default::default()
//!     })
//!     .unwrap();
//! for pool in &pools {
//!     println!("{} on node(s) {}", pool.cpu_list(), pool.node_list());
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod launcher;
pub mod spawn;
pub mod system;

// Re-export commonly used types
pub use config::LaunchConfig;
pub use error::{LaunchError, Result};
pub use launcher::{LaunchPlan, Launcher};
pub use spawn::InstanceSpawner;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use cpulaunch::prelude::*;
    //! ```

    pub use crate::config::{LaunchConfig, OutputFormat};
    pub use crate::error::{LaunchError, Result};
    pub use crate::launcher::{
        format_ranges, parse_list_argument, AmbientEnv, LaunchLogger, LaunchPlan, Launcher, LibraryCategory,
        TracingLogger,
    };
    pub use crate::spawn::{InstanceSpawner, SpawnReport};
    pub use crate::system::{CpuPool, CpuPoolList, PoolRequest, ThreadAffinity};
}
