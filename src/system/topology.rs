//! CPU topology model
//!
//! Builds the list of logical CPUs with their socket, NUMA node and physical
//! core, and classifies each one as physical core or hyperthread sibling and
//! as performance or efficiency core. The primary source is
//! `lscpu --all --extended`; sysfs and a flat `num_cpus` model are used when
//! lscpu is unavailable.

use crate::error::{IoResultExt, LaunchError, Result};
use crate::launcher::ranges::{format_ranges, parse_list_argument};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::process::Command;

/// One logical CPU
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreInfo {
    /// Logical CPU id
    pub cpu: usize,
    /// Socket (package) id
    pub socket: usize,
    /// NUMA node id
    pub node: usize,
    /// Physical core id
    pub core: usize,
    /// False for hyperthread siblings
    pub is_physical_core: bool,
    /// Maximum frequency, 0 when unknown
    pub max_mhz: f64,
    /// False for efficiency cores
    pub is_p_core: bool,
}

impl CoreInfo {
    /// A physical performance core with unknown frequency
    pub fn new(cpu: usize, socket: usize, node: usize, core: usize) -> Self {
        Self {
            cpu,
            socket,
            node,
            core,
            is_physical_core: true,
            max_mhz: 0.0,
            is_p_core: true,
        }
    }
}

/// Column positions found in the lscpu header line
#[derive(Debug, Default)]
struct LscpuHeader {
    width: usize,
    cpu: usize,
    socket: usize,
    core: usize,
    node: Option<usize>,
    maxmhz: Option<usize>,
    online: Option<usize>,
}

impl LscpuHeader {
    fn parse(cols: &[&str]) -> Option<Self> {
        let find = |name: &str| cols.iter().position(|c| *c == name);
        Some(Self {
            width: cols.len(),
            cpu: find("cpu")?,
            socket: find("socket")?,
            core: find("core")?,
            node: find("node"),
            maxmhz: find("maxmhz"),
            online: find("online"),
        })
    }

    fn row(&self, cols: &[&str]) -> Option<CoreInfo> {
        if cols.len() != self.width {
            return None;
        }
        if let Some(i) = self.online {
            if cols[i] == "no" {
                return None;
            }
        }

        let cpu = cols[self.cpu].parse().ok()?;
        let socket = cols[self.socket].parse().ok()?;
        let core = cols[self.core].parse().ok()?;
        let node = self
            .node
            .and_then(|i| cols[i].parse().ok())
            .unwrap_or(socket);
        let mut info = CoreInfo::new(cpu, socket, node, core);
        if let Some(i) = self.maxmhz {
            info.max_mhz = cols[i].parse().unwrap_or(0.0);
        }
        Some(info)
    }
}

/// All online logical CPUs of the machine, ordered by CPU id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuPoolList {
    cores: Vec<CoreInfo>,
}

impl CpuPoolList {
    /// Detect the topology of the running machine
    ///
    /// Tries lscpu, then sysfs, then falls back to a single-socket model
    /// sized by `num_cpus`.
    pub fn detect() -> Self {
        match Self::run_lscpu().and_then(|txt| Self::from_lscpu(&txt)) {
            Ok(list) => return list,
            Err(e) => tracing::debug!("lscpu topology unavailable: {}", e),
        }

        if cfg!(target_os = "linux") {
            match Self::from_sysfs(Path::new("/sys/devices/system")) {
                Ok(list) => return list,
                Err(e) => tracing::debug!("sysfs topology unavailable: {}", e),
            }
        }

        let num_cpus = num_cpus::get().max(1);
        tracing::warn!("Falling back to a flat topology of {} CPUs", num_cpus);
        Self::from_cores((0..num_cpus).map(|cpu| CoreInfo::new(cpu, 0, 0, cpu)).collect())
    }

    fn run_lscpu() -> Result<String> {
        let output = Command::new("lscpu")
            .args(["--all", "--extended"])
            .env("LANG", "C")
            .output()
            .map_err(|e| LaunchError::TopologyUnavailable(format!("failed to run lscpu: {}", e)))?;
        if !output.status.success() {
            return Err(LaunchError::TopologyUnavailable(format!(
                "lscpu exited with {}",
                output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Parse `lscpu --all --extended` output
    pub fn from_lscpu(text: &str) -> Result<Self> {
        let mut header: Option<LscpuHeader> = None;
        let mut cores = Vec::new();

        for line in text.lines() {
            let line = line.trim().to_lowercase();
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.is_empty() {
                continue;
            }

            match &header {
                None => {
                    if cols.contains(&"cpu") && cols.contains(&"socket") && cols.contains(&"core") {
                        header = LscpuHeader::parse(&cols);
                    }
                }
                Some(h) => {
                    if let Some(info) = h.row(&cols) {
                        cores.push(info);
                    }
                }
            }
        }

        if header.is_none() {
            return Err(LaunchError::TopologyParse(
                "no header line with CPU, SOCKET and CORE columns".to_string(),
            ));
        }
        if cores.is_empty() {
            return Err(LaunchError::TopologyParse("no online CPU rows found".to_string()));
        }

        let mut seen = BTreeSet::new();
        if let Some(dup) = cores.iter().find(|c| !seen.insert(c.cpu)) {
            return Err(LaunchError::TopologyParse(format!("CPU {} listed twice", dup.cpu)));
        }

        Ok(Self::from_cores(cores))
    }

    /// Read the topology from a sysfs tree rooted at `root`
    /// (normally `/sys/devices/system`)
    pub fn from_sysfs(root: &Path) -> Result<Self> {
        let node_of = Self::read_node_cpus(&root.join("node"));
        let cpu_dir = root.join("cpu");
        let mut cores = Vec::new();

        for entry in std::fs::read_dir(&cpu_dir).with_path(&cpu_dir)?.filter_map(|e| e.ok()) {
            let name = entry.file_name();
            let Some(cpu) = name
                .to_str()
                .and_then(|n| n.strip_prefix("cpu"))
                .and_then(|n| n.parse::<usize>().ok())
            else {
                continue;
            };

            let path = entry.path();
            if read_trimmed(&path.join("online")).as_deref() == Some("0") {
                continue;
            }

            let socket = read_number(&path.join("topology/physical_package_id")).unwrap_or(0);
            let core = read_number(&path.join("topology/core_id")).unwrap_or(cpu);
            let node = node_of.get(&cpu).copied().unwrap_or(socket);

            let mut info = CoreInfo::new(cpu, socket, node, core);
            if let Some(khz) = read_number(&path.join("cpufreq/cpuinfo_max_freq")) {
                info.max_mhz = khz as f64 / 1000.0;
            }
            cores.push(info);
        }

        if cores.is_empty() {
            return Err(LaunchError::TopologyUnavailable(format!(
                "no CPUs under {}",
                cpu_dir.display()
            )));
        }

        Ok(Self::from_cores(cores))
    }

    /// Map of logical CPU -> NUMA node from `node*/cpulist`
    fn read_node_cpus(node_dir: &Path) -> BTreeMap<usize, usize> {
        let mut node_of = BTreeMap::new();
        let Ok(entries) = std::fs::read_dir(node_dir) else {
            return node_of;
        };

        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name();
            let Some(node) = name
                .to_str()
                .and_then(|n| n.strip_prefix("node"))
                .and_then(|n| n.parse::<usize>().ok())
            else {
                continue;
            };

            let Some(cpulist) = read_trimmed(&entry.path().join("cpulist")) else {
                continue;
            };
            match parse_list_argument(&cpulist) {
                Ok(cpus) => {
                    for cpu in cpus {
                        node_of.insert(cpu, node);
                    }
                }
                Err(e) => tracing::debug!("Ignoring cpulist of node {}: {}", node, e),
            }
        }

        node_of
    }

    /// Build from raw descriptors, deriving the physical and P/E flags
    pub fn from_cores(mut cores: Vec<CoreInfo>) -> Self {
        // The lowest logical CPU of each (socket, core) is the physical one
        cores.sort_by_key(|c| (c.socket, c.core, c.cpu));
        let mut last = None;
        for c in cores.iter_mut() {
            let key = (c.socket, c.core);
            c.is_physical_core = last != Some(key);
            last = Some(key);
        }
        cores.sort_by_key(|c| c.cpu);

        let peak = cores.iter().map(|c| c.max_mhz).fold(0.0_f64, f64::max);
        let hybrid = cores.iter().any(|c| c.max_mhz > 0.0 && c.max_mhz < peak);
        for c in cores.iter_mut() {
            // Unknown frequency (0.0) stays a P-core
            c.is_p_core = !hybrid || c.max_mhz == 0.0 || c.max_mhz >= peak;
        }

        Self { cores }
    }

    /// Every online logical CPU
    pub fn cores(&self) -> &[CoreInfo] {
        &self.cores
    }

    /// Look up a logical CPU
    pub fn core(&self, cpu: usize) -> Option<&CoreInfo> {
        self.cores.iter().find(|c| c.cpu == cpu)
    }

    /// NUMA node ids
    pub fn nodes(&self) -> Vec<usize> {
        self.cores.iter().map(|c| c.node).collect::<BTreeSet<_>>().into_iter().collect()
    }

    /// Socket ids
    pub fn sockets(&self) -> Vec<usize> {
        self.cores.iter().map(|c| c.socket).collect::<BTreeSet<_>>().into_iter().collect()
    }

    /// Physical cores only
    pub fn physical_cores(&self) -> impl Iterator<Item = &CoreInfo> {
        self.cores.iter().filter(|c| c.is_physical_core)
    }

    /// Whether both performance and efficiency cores are present
    pub fn is_hybrid(&self) -> bool {
        self.cores.iter().any(|c| !c.is_p_core)
    }

    /// Print topology summary
    pub fn print_summary(&self) {
        println!("CPU Topology:");
        println!("  Sockets:        {}", self.sockets().len());
        println!("  NUMA nodes:     {}", self.nodes().len());
        println!("  Logical CPUs:   {}", self.cores.len());
        println!("  Physical cores: {}", self.physical_cores().count());
        if self.is_hybrid() {
            let e_cores = self.cores.iter().filter(|c| !c.is_p_core).map(|c| c.cpu);
            println!("  E-cores:        {}", format_ranges(e_cores));
        }

        for node in self.nodes() {
            let physical = self
                .physical_cores()
                .filter(|c| c.node == node)
                .map(|c| c.cpu);
            let logical = self
                .cores
                .iter()
                .filter(|c| c.node == node && !c.is_physical_core)
                .map(|c| c.cpu);
            println!("  Node {}:", node);
            println!("    Physical: {}", format_ranges(physical));
            println!("    Siblings: {}", format_ranges(logical));
        }
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    std::fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

fn read_number(path: &Path) -> Option<usize> {
    read_trimmed(path)?.parse().ok()
}
