//! Core pool partitioning
//!
//! Splits the machine's cores into equally sized, disjoint pools, one per
//! workload instance.

use super::topology::{CoreInfo, CpuPoolList};
use crate::error::{LaunchError, Result};
use crate::launcher::ranges::format_ranges;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Cores assigned to one instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuPool {
    cores: Vec<CoreInfo>,
}

impl CpuPool {
    fn new(cores: Vec<CoreInfo>) -> Self {
        Self { cores }
    }

    /// Cores in assignment order
    pub fn cores(&self) -> &[CoreInfo] {
        &self.cores
    }

    /// Logical CPU ids in assignment order
    pub fn cpu_ids(&self) -> Vec<usize> {
        self.cores.iter().map(|c| c.cpu).collect()
    }

    /// NUMA nodes touched by this pool
    pub fn node_ids(&self) -> Vec<usize> {
        self.cores.iter().map(|c| c.node).collect::<BTreeSet<_>>().into_iter().collect()
    }

    /// Compact CPU list (`"0-3,8"`)
    pub fn cpu_list(&self) -> String {
        format_ranges(self.cpu_ids())
    }

    /// Compact node list
    pub fn node_list(&self) -> String {
        format_ranges(self.node_ids())
    }

    /// Number of cores
    pub fn len(&self) -> usize {
        self.cores.len()
    }

    /// Whether the pool is empty
    pub fn is_empty(&self) -> bool {
        self.cores.is_empty()
    }
}

/// What the user asked for
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolRequest {
    /// Number of instances, 0 = derive
    pub ninstances: usize,
    /// Cores per instance, 0 = derive
    pub ncores_per_instance: usize,
    /// Include hyperthread siblings
    pub use_logical_cores: bool,
    /// Include efficiency cores
    pub use_e_cores: bool,
    /// Never let one instance span two NUMA nodes
    pub skip_cross_node_cores: bool,
    /// Restrict to these NUMA nodes, empty = all
    pub nodes: BTreeSet<usize>,
    /// Use exactly these logical CPUs, overrides `nodes`
    pub cores: BTreeSet<usize>,
}

impl CpuPoolList {
    /// Partition the topology into per-instance pools
    ///
    /// The result is deterministic: candidates are ordered by node then CPU
    /// id and handed out in consecutive chunks.
    pub fn gen_pools_ondemand(&self, request: &PoolRequest) -> Result<Vec<CpuPool>> {
        let candidates = self.candidates(request)?;
        let n = candidates.len();

        let node_sizes: Vec<usize> = if request.skip_cross_node_cores {
            group_by_node(&candidates).iter().map(|g| g.len()).collect()
        } else {
            vec![n]
        };
        let capacity = |per: usize| node_sizes.iter().map(|size| size / per).sum::<usize>();

        let (ninstances, per_instance) = match (request.ninstances, request.ncores_per_instance) {
            (0, 0) if request.skip_cross_node_cores => {
                let smallest = node_sizes.iter().copied().min().unwrap_or(0);
                (capacity(smallest.max(1)), smallest)
            }
            (0, 0) => (1, n),
            (k, 0) => {
                let per = (1..=n / k).rev().find(|&per| capacity(per) >= k).ok_or_else(|| {
                    LaunchError::InsufficientCores(format!(
                        "{} cores cannot host {} instances",
                        n, k
                    ))
                })?;
                (k, per)
            }
            (0, per) => (capacity(per), per),
            (k, per) => (k, per),
        };

        if ninstances == 0 || per_instance == 0 {
            return Err(LaunchError::InsufficientCores(format!(
                "{} cores available, {} per instance requested",
                n, request.ncores_per_instance
            )));
        }
        if capacity(per_instance) < ninstances {
            return Err(LaunchError::InsufficientCores(format!(
                "{} instances x {} cores requested, only {} instances fit in {} cores",
                ninstances,
                per_instance,
                capacity(per_instance),
                n
            )));
        }

        let groups = if request.skip_cross_node_cores {
            group_by_node(&candidates)
        } else {
            vec![candidates]
        };

        let pools = groups
            .into_iter()
            .flat_map(|group| {
                group
                    .chunks_exact(per_instance)
                    .map(|chunk| CpuPool::new(chunk.to_vec()))
                    .collect::<Vec<_>>()
            })
            .take(ninstances)
            .collect();

        Ok(pools)
    }

    fn candidates(&self, request: &PoolRequest) -> Result<Vec<CoreInfo>> {
        let mut picked: Vec<CoreInfo> = if !request.cores.is_empty() {
            request
                .cores
                .iter()
                .map(|&cpu| self.core(cpu).cloned().ok_or(LaunchError::UnknownCore(cpu)))
                .collect::<Result<_>>()?
        } else {
            let available = self.nodes();
            if let Some(&node) = request.nodes.iter().find(|n| !available.contains(*n)) {
                return Err(LaunchError::UnknownNode { node, available });
            }
            self.cores()
                .iter()
                .filter(|c| request.nodes.is_empty() || request.nodes.contains(&c.node))
                .filter(|c| request.use_logical_cores || c.is_physical_core)
                .filter(|c| request.use_e_cores || c.is_p_core)
                .cloned()
                .collect()
        };

        if picked.is_empty() {
            return Err(LaunchError::InsufficientCores(
                "no cores match the requested nodes and core types".to_string(),
            ));
        }

        picked.sort_by_key(|c| (c.node, c.cpu));
        Ok(picked)
    }
}

/// Split node-sorted cores into one group per node
fn group_by_node(cores: &[CoreInfo]) -> Vec<Vec<CoreInfo>> {
    let mut groups: Vec<Vec<CoreInfo>> = Vec::new();
    for core in cores {
        match groups.last_mut() {
            Some(group) if group[0].node == core.node => group.push(core.clone()),
            _ => groups.push(vec![core.clone()]),
        }
    }
    groups
}
