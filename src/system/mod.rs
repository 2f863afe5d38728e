//! Machine topology and core placement
//!
//! Discovers sockets, NUMA nodes and core classes, partitions them into
//! per-instance pools, and applies affinity to spawned processes.

pub mod affinity;
pub mod pool;
pub mod topology;

pub use affinity::ThreadAffinity;
pub use pool::{CpuPool, PoolRequest};
pub use topology::{CoreInfo, CpuPoolList};
