//! Launch orchestration
//!
//! A [`Launcher`] owns every piece of mutable state for one invocation: the
//! environment overlay, the preload list and the log sink. [`Launcher::launch`]
//! runs the stages in order and freezes the outcome into a [`LaunchPlan`].

use super::env::{
    AmbientEnv, EnvironmentOverlay, PreloadList, JEMALLOC_BENCHMARK_CONF, JEMALLOC_DEFAULT_CONF,
    KMP_AFFINITY_PRESET, KMP_BLOCKTIME_PRESET,
};
use super::logging::{LaunchLogger, LogLevel, StdoutLogger};
use super::ranges::parse_list_argument;
use super::resolver::{default_library_paths, LibraryCategory, Resolver};
use crate::config::LaunchConfig;
use crate::error::Result;
use crate::system::{CpuPool, CpuPoolList, PoolRequest};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Cores and nodes of one instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstancePlan {
    /// Instance index, starting at 0
    pub index: usize,
    /// Logical CPUs in assignment order
    pub cpus: Vec<usize>,
    /// NUMA nodes the CPUs belong to
    pub nodes: Vec<usize>,
    /// Compact CPU list for numactl/taskset
    pub cpu_list: String,
    /// Compact node list for numactl
    pub node_list: String,
}

impl InstancePlan {
    fn from_pool(index: usize, pool: &CpuPool) -> Self {
        Self {
            index,
            cpus: pool.cpu_ids(),
            nodes: pool.node_ids(),
            cpu_list: pool.cpu_list(),
            node_list: pool.node_list(),
        }
    }
}

/// Frozen outcome of one launch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchPlan {
    /// Resolved memory allocator
    pub memory_allocator: String,
    /// Resolved OpenMP runtime
    pub omp_runtime: String,
    /// Resolved multi-task manager
    pub task_manager: String,
    /// One entry per instance
    pub instances: Vec<InstancePlan>,
    /// Colon-joined `LD_PRELOAD` value, empty for none
    pub ld_preload: String,
    /// Variables to set in every instance
    pub environment: BTreeMap<String, String>,
}

impl LaunchPlan {
    /// Every variable a child needs, `LD_PRELOAD` included
    pub fn child_environment(&self) -> Vec<(String, String)> {
        let mut vars: Vec<(String, String)> = self
            .environment
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if !self.ld_preload.is_empty() {
            vars.push(("LD_PRELOAD".to_string(), self.ld_preload.clone()));
        }
        vars
    }

    /// Print the plan in human-readable form
    pub fn print_summary(&self) {
        println!("=== Launch Plan ===");
        println!("Memory allocator:   {}", self.memory_allocator);
        println!("OpenMP runtime:     {}", self.omp_runtime);
        println!("Multi-task manager: {}", self.task_manager);
        println!("LD_PRELOAD:         {}", self.ld_preload);
        println!();
        println!("Environment:");
        for (name, value) in &self.environment {
            println!("  {}={}", name, value);
        }
        println!();
        println!("Instances:");
        for instance in &self.instances {
            println!(
                "  #{:<3} cpus {:<16} nodes {}",
                instance.index, instance.cpu_list, instance.node_list
            );
        }
    }
}

/// Single-shot launcher context
pub struct Launcher {
    topology: CpuPoolList,
    ambient: AmbientEnv,
    logger: Arc<dyn LaunchLogger>,
    library_paths: Vec<PathBuf>,
    environ_set: EnvironmentOverlay,
    ld_preload: PreloadList,
}

impl Launcher {
    /// Create a launcher for a topology and an environment snapshot
    ///
    /// Messages go to stdout until [`Launcher::with_logger`] installs
    /// another sink.
    pub fn new(topology: CpuPoolList, ambient: AmbientEnv) -> Self {
        let library_paths = default_library_paths(
            ambient.non_empty("CONDA_PREFIX"),
            ambient.non_empty("VIRTUAL_ENV"),
            ambient.non_empty("HOME"),
        );
        let ld_preload = PreloadList::from_ambient(&ambient);

        Self {
            topology,
            ambient,
            logger: Arc::new(StdoutLogger),
            library_paths,
            environ_set: EnvironmentOverlay::new(),
            ld_preload,
        }
    }

    /// Launcher for this machine and process environment
    ///
    /// `lscpu_txt` replaces topology detection when non-empty.
    pub fn from_system(lscpu_txt: &str) -> Result<Self> {
        let topology = if lscpu_txt.trim().is_empty() {
            CpuPoolList::detect()
        } else {
            CpuPoolList::from_lscpu(lscpu_txt)?
        };
        Ok(Self::new(topology, AmbientEnv::capture()))
    }

    /// Replace the log sink
    pub fn with_logger(mut self, logger: Arc<dyn LaunchLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Replace the library search directories
    pub fn with_library_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.library_paths = paths;
        self
    }

    /// Machine topology
    pub fn topology(&self) -> &CpuPoolList {
        &self.topology
    }

    /// Library search directories in search order
    pub fn library_paths(&self) -> &[PathBuf] {
        &self.library_paths
    }

    /// Variables recorded so far
    pub fn overlay(&self) -> &EnvironmentOverlay {
        &self.environ_set
    }

    /// Preload entries recorded so far
    pub fn preload(&self) -> &PreloadList {
        &self.ld_preload
    }

    fn verbose(&self, level: LogLevel, msg: &str) {
        self.logger.log(level, msg);
    }

    /// Record a variable for spawned processes, deferring to the ambient value
    pub fn add_env(&mut self, name: &str, value: &str) {
        if let Some(conflict) = self.environ_set.add(&self.ambient, name, value) {
            self.verbose(LogLevel::Warning, &conflict.message());
        }
    }

    /// Resolve a category against the machine
    pub fn set_lib_bin_from_list(
        &mut self,
        requested: &str,
        category: &LibraryCategory,
        exclusions: &[&str],
    ) -> String {
        let mut resolver = Resolver::new(
            &mut self.ld_preload,
            &self.library_paths,
            self.ambient.get("PATH"),
            self.logger.as_ref(),
        );
        resolver.resolve(requested, category, exclusions)
    }

    /// Pick the memory allocator and record its tuning
    ///
    /// Only jemalloc has tuning; `benchmark` selects the low-latency preset.
    pub fn set_memory_allocator(&mut self, requested: &str, benchmark: bool, exclusions: &[&str]) -> String {
        let allocator = self.set_lib_bin_from_list(requested, &LibraryCategory::memory_allocator(), exclusions);
        if allocator == "jemalloc" {
            let conf = if benchmark {
                JEMALLOC_BENCHMARK_CONF
            } else {
                JEMALLOC_DEFAULT_CONF
            };
            self.add_env("MALLOC_CONF", conf);
        }
        allocator
    }

    /// Pick the OpenMP runtime and record its thread settings
    pub fn set_omp_runtime(&mut self, requested: &str, set_kmp_affinity: bool) -> String {
        let runtime = self.set_lib_bin_from_list(requested, &LibraryCategory::omp_runtime(), &[]);
        match runtime.as_str() {
            "intel" => {
                if set_kmp_affinity {
                    self.add_env("KMP_AFFINITY", KMP_AFFINITY_PRESET);
                }
                self.add_env("KMP_BLOCKTIME", KMP_BLOCKTIME_PRESET);
            }
            "default" => {
                self.add_env("OMP_SCHEDULE", "STATIC");
                self.add_env("OMP_PROC_BIND", "CLOSE");
            }
            _ => {}
        }
        runtime
    }

    /// Pick the tool that binds instances to their cores
    pub fn set_multi_task_manager(&mut self, requested: &str) -> String {
        self.set_lib_bin_from_list(requested, &LibraryCategory::task_manager(), &[])
    }

    /// Split the topology into instance pools
    pub fn partition(&self, config: &LaunchConfig) -> Result<Vec<CpuPool>> {
        let nodes = parse_list_argument(&config.nodes_list)?;
        let cores = parse_list_argument(&config.cores_list)?;
        if !cores.is_empty() && !nodes.is_empty() {
            self.verbose(
                LogLevel::Warning,
                "Both --nodes-list and --cores-list are set. --nodes-list is ignored.",
            );
        }

        let request = PoolRequest {
            ninstances: config.ninstances,
            ncores_per_instance: config.ncores_per_instance,
            use_logical_cores: config.use_logical_cores,
            use_e_cores: config.use_e_cores,
            skip_cross_node_cores: config.skip_cross_node_cores,
            nodes,
            cores,
        };
        self.topology.gen_pools_ondemand(&request)
    }

    /// Run every stage and freeze the result
    pub fn launch(&mut self, config: &LaunchConfig) -> Result<LaunchPlan> {
        let exclusions: Vec<&str> = config.allocator_exclusions.iter().map(String::as_str).collect();
        let memory_allocator = self.set_memory_allocator(&config.memory_allocator, config.benchmark, &exclusions);
        let omp_runtime = self.set_omp_runtime(&config.omp_runtime, config.set_kmp_affinity);

        let pools = self.partition(config)?;
        if let Some(first) = pools.first() {
            self.add_env("OMP_NUM_THREADS", &first.len().to_string());
        }
        self.verbose(
            LogLevel::Info,
            &format!(
                "{} instance(s), {} core(s) each",
                pools.len(),
                pools.first().map(CpuPool::len).unwrap_or(0)
            ),
        );

        let task_manager = self.set_multi_task_manager(&config.multi_task_manager);

        Ok(LaunchPlan {
            memory_allocator,
            omp_runtime,
            task_manager,
            instances: pools
                .iter()
                .enumerate()
                .map(|(i, pool)| InstancePlan::from_pool(i, pool))
                .collect(),
            ld_preload: self.ld_preload.to_spec(),
            environment: self.environ_set.clone().into_map(),
        })
    }
}
