//! Workload process spawning
//!
//! Applies a [`LaunchPlan`](crate::launcher::LaunchPlan) to a workload command
//! line: one child per instance, bound to its cores by numactl, taskset or
//! native affinity.

mod runner;

pub use runner::{InstanceCommand, InstanceSpawner, SpawnReport};
