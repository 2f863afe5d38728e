//! Configuration settings for cpulaunch
//!
//! Defines the CLI arguments and the runtime launch configuration derived
//! from them.

use crate::error::Result;
use crate::launcher::ranges::parse_list_argument;
use clap::builder::PossibleValuesParser;
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// cpulaunch - multi-instance launcher for CPU deep-learning workloads
#[derive(Parser, Debug, Clone)]
#[command(name = "cpulaunch")]
#[command(author = "cpulaunch Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Topology-aware launcher for CPU inference and training workloads")]
#[command(long_about = r#"
cpulaunch partitions the machine's cores into instances and starts one
workload process per instance with a tuned runtime environment.

Features:
  - Socket, NUMA node, hyperthread and P/E-core aware core partitioning
  - Automatic TCMalloc/JeMalloc preloading with tuned MALLOC_CONF
  - Intel OpenMP preloading with KMP_AFFINITY/KMP_BLOCKTIME
  - numactl/taskset binding, or native affinity when neither is installed

Examples:
  cpulaunch -- python infer.py                          # One instance, all physical cores
  cpulaunch --ncores-per-instance 4 -- python infer.py  # As many 4-core instances as fit
  cpulaunch --nodes-list 0 --memory-allocator jemalloc -- ./bench
  cpulaunch --dry-run --output-format json -- ./bench   # Print the plan only
  cpulaunch topology                                    # Show detected topology
"#)]
pub struct CliArgs {
    /// Workload command and its arguments
    #[arg(value_name = "PROGRAM", trailing_var_arg = true)]
    pub program: Vec<String>,

    /// Number of cores used for computation per instance (0 = derive)
    #[arg(long, alias = "ncores_per_instance", default_value = "0", value_name = "NUM")]
    pub ncores_per_instance: usize,

    /// Number of instances (0 = derive)
    #[arg(long, default_value = "0", value_name = "NUM")]
    pub ninstances: usize,

    /// NUMA nodes to run on, e.g. "0,1" or "0-1" (default: all nodes)
    #[arg(long, alias = "nodes_list", default_value = "", value_name = "LIST")]
    pub nodes_list: String,

    /// Logical CPUs to run on, e.g. "0-7,16-23" (overrides --nodes-list)
    #[arg(long, alias = "cores_list", default_value = "", value_name = "LIST")]
    pub cores_list: String,

    /// Use efficiency cores as well (default: performance cores only)
    #[arg(long, alias = "use_e_cores")]
    pub use_e_cores: bool,

    /// Use hyperthread siblings as well (default: physical cores only)
    #[arg(long, alias = "use_logical_cores")]
    pub use_logical_cores: bool,

    /// Never let an instance span two NUMA nodes
    #[arg(long, alias = "skip_cross_node_cores")]
    pub skip_cross_node_cores: bool,

    /// Memory allocator to run the workloads with
    #[arg(
        long,
        alias = "memory_allocator",
        default_value = "auto",
        ignore_case = true,
        value_parser = PossibleValuesParser::new(["auto", "default", "tcmalloc", "jemalloc"]),
        value_name = "NAME"
    )]
    pub memory_allocator: String,

    /// OpenMP runtime to run the workloads with
    #[arg(
        long,
        alias = "omp_runtime",
        default_value = "auto",
        ignore_case = true,
        value_parser = PossibleValuesParser::new(["auto", "default", "intel"]),
        value_name = "NAME"
    )]
    pub omp_runtime: String,

    /// Tool used to bind each instance to its cores
    #[arg(
        long,
        alias = "multi_task_manager",
        default_value = "auto",
        ignore_case = true,
        value_parser = PossibleValuesParser::new(["auto", "none", "numactl", "taskset"]),
        value_name = "NAME"
    )]
    pub multi_task_manager: String,

    /// Tune the allocator for latency benchmarking
    #[arg(long)]
    pub benchmark: bool,

    /// Do not set KMP_AFFINITY for Intel OpenMP
    #[arg(long, alias = "disable_kmp_affinity")]
    pub disable_kmp_affinity: bool,

    /// Read topology from saved `lscpu --all --extended` output
    #[arg(long, alias = "lscpu_file", env = "CPULAUNCH_LSCPU_FILE", value_name = "PATH")]
    pub lscpu_file: Option<PathBuf>,

    /// Print the launch plan without starting anything
    #[arg(short = 'n', long, alias = "dry_run")]
    pub dry_run: bool,

    /// Output format for plans and topology
    #[arg(long, alias = "output_format", value_enum, default_value = "text")]
    pub output_format: OutputFormat,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (only errors)
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Show the detected CPU topology
    #[command(name = "topology")]
    Topology,
}

/// Output format for reports
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON format
    Json,
}

/// Runtime configuration derived from CLI args
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchConfig {
    /// Cores per instance, 0 = derive
    pub ncores_per_instance: usize,
    /// Instance count, 0 = derive
    pub ninstances: usize,
    /// Node range list
    pub nodes_list: String,
    /// CPU range list
    pub cores_list: String,
    /// Include efficiency cores
    pub use_e_cores: bool,
    /// Include hyperthread siblings
    pub use_logical_cores: bool,
    /// Keep instances within one node
    pub skip_cross_node_cores: bool,
    /// Requested memory allocator
    pub memory_allocator: String,
    /// Requested OpenMP runtime
    pub omp_runtime: String,
    /// Requested multi-task manager
    pub multi_task_manager: String,
    /// Allocators that must not be picked
    pub allocator_exclusions: Vec<String>,
    /// Benchmark tuning
    pub benchmark: bool,
    /// Set KMP_AFFINITY for Intel OpenMP
    pub set_kmp_affinity: bool,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            ncores_per_instance: 0,
            ninstances: 0,
            nodes_list: String::new(),
            cores_list: String::new(),
            use_e_cores: false,
            use_logical_cores: false,
            skip_cross_node_cores: false,
            memory_allocator: "auto".to_string(),
            omp_runtime: "auto".to_string(),
            multi_task_manager: "auto".to_string(),
            allocator_exclusions: Vec::new(),
            benchmark: false,
            set_kmp_affinity: true,
        }
    }
}

impl LaunchConfig {
    /// Create config from CLI arguments
    ///
    /// Range lists are validated here so syntax errors surface before any
    /// resolution work is done.
    pub fn from_cli(args: &CliArgs) -> Result<Self> {
        parse_list_argument(&args.nodes_list)?;
        parse_list_argument(&args.cores_list)?;

        Ok(Self {
            ncores_per_instance: args.ncores_per_instance,
            ninstances: args.ninstances,
            nodes_list: args.nodes_list.clone(),
            cores_list: args.cores_list.clone(),
            use_e_cores: args.use_e_cores,
            use_logical_cores: args.use_logical_cores,
            skip_cross_node_cores: args.skip_cross_node_cores,
            memory_allocator: args.memory_allocator.clone(),
            omp_runtime: args.omp_runtime.clone(),
            multi_task_manager: args.multi_task_manager.clone(),
            allocator_exclusions: Vec::new(),
            benchmark: args.benchmark,
            set_kmp_affinity: !args.disable_kmp_affinity,
        })
    }
}
