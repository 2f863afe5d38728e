//! Per-instance process construction and supervision

use crate::error::{LaunchError, Result};
use crate::launcher::LaunchPlan;
use serde::Serialize;
use std::process::{Child, Command, ExitStatus};
use tracing::{debug, info, warn};

/// Fully resolved command line for one instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceCommand {
    /// Instance index
    pub index: usize,
    /// Program to exec, either the binding tool or the workload itself
    pub program: String,
    /// Arguments following the program
    pub args: Vec<String>,
    /// Variables added to the inherited environment
    pub env: Vec<(String, String)>,
    /// CPUs the child pins itself to before exec; empty when a tool binds it
    pub pin_cpus: Vec<usize>,
}

impl InstanceCommand {
    /// Shell-like rendering for dry runs and logs
    pub fn display(&self) -> String {
        let mut line = String::new();
        for (name, value) in &self.env {
            line.push_str(&format!("{}={} ", name, value));
        }
        line.push_str(&self.program);
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        if !self.pin_cpus.is_empty() {
            pin_before_exec(&mut cmd, self.pin_cpus.clone());
        }
        cmd
    }
}

#[cfg(unix)]
fn pin_before_exec(cmd: &mut Command, cpus: Vec<usize>) {
    use crate::system::ThreadAffinity;
    use std::os::unix::process::CommandExt;

    // SAFETY: pin_to_cpus only issues sched_setaffinity and does not allocate
    unsafe {
        cmd.pre_exec(move || ThreadAffinity::pin_to_cpus(&cpus));
    }
}

#[cfg(not(unix))]
fn pin_before_exec(_cmd: &mut Command, cpus: Vec<usize>) {
    warn!(?cpus, "Native affinity is not supported on this platform");
}

/// Exit status of every instance
#[derive(Debug, Default)]
pub struct SpawnReport {
    /// `(instance index, status)` in instance order
    pub statuses: Vec<(usize, ExitStatus)>,
}

impl SpawnReport {
    /// All instances exited successfully
    pub fn is_success(&self) -> bool {
        self.statuses.iter().all(|(_, status)| status.success())
    }

    /// First instance that failed
    pub fn first_failure(&self) -> Option<(usize, ExitStatus)> {
        self.statuses.iter().copied().find(|(_, status)| !status.success())
    }

    /// Exit code for the launcher itself
    ///
    /// 0 on success, the first failing child's code otherwise, 1 when that
    /// child was killed by a signal.
    pub fn exit_code(&self) -> i32 {
        match self.first_failure() {
            None => 0,
            Some((_, status)) => status.code().unwrap_or(1),
        }
    }
}

/// Starts one workload process per planned instance
pub struct InstanceSpawner<'a> {
    plan: &'a LaunchPlan,
}

impl<'a> InstanceSpawner<'a> {
    /// Create a spawner for a plan
    pub fn new(plan: &'a LaunchPlan) -> Self {
        Self { plan }
    }

    /// Build the command line of every instance
    pub fn commands(&self, workload: &[String]) -> Result<Vec<InstanceCommand>> {
        let (program, program_args) = workload
            .split_first()
            .ok_or_else(|| LaunchError::config("no program given to launch"))?;
        let env = self.plan.child_environment();

        self.plan
            .instances
            .iter()
            .map(|instance| {
                let mut args: Vec<String> = Vec::new();
                let mut pin_cpus = Vec::new();

                let tool = match self.plan.task_manager.as_str() {
                    "numactl" => {
                        args.extend([
                            "-C".to_string(),
                            instance.cpu_list.clone(),
                            "-m".to_string(),
                            instance.node_list.clone(),
                        ]);
                        Some("numactl")
                    }
                    "taskset" => {
                        args.extend(["-c".to_string(), instance.cpu_list.clone()]);
                        Some("taskset")
                    }
                    "none" => {
                        pin_cpus = instance.cpus.clone();
                        None
                    }
                    other => {
                        return Err(LaunchError::config(format!(
                            "unsupported multi-task manager '{}'",
                            other
                        )))
                    }
                };

                let program = match tool {
                    Some(tool) => {
                        args.push(program.clone());
                        tool.to_string()
                    }
                    None => program.clone(),
                };
                args.extend(program_args.iter().cloned());

                Ok(InstanceCommand {
                    index: instance.index,
                    program,
                    args,
                    env: env.clone(),
                    pin_cpus,
                })
            })
            .collect()
    }

    /// Print every command without starting anything
    pub fn dry_run(&self, workload: &[String]) -> Result<Vec<InstanceCommand>> {
        let commands = self.commands(workload)?;
        println!("=== Dry Run Mode ===");
        println!("No processes will be started.");
        println!();
        for command in &commands {
            println!("[{}] {}", command.index, command.display());
        }
        Ok(commands)
    }

    /// Start every instance and wait for all of them
    ///
    /// If one instance cannot be started the ones already running are killed
    /// and the spawn error is returned.
    pub fn spawn_all(&self, workload: &[String]) -> Result<SpawnReport> {
        let commands = self.commands(workload)?;
        let mut children: Vec<(usize, Child)> = Vec::with_capacity(commands.len());

        for command in &commands {
            debug!(instance = command.index, "{}", command.display());
            match command.to_command().spawn() {
                Ok(child) => {
                    info!(instance = command.index, pid = child.id(), "Started instance");
                    children.push((command.index, child));
                }
                Err(e) => {
                    for (index, child) in &mut children {
                        warn!(instance = *index, "Killing instance after spawn failure");
                        let _ = child.kill();
                        let _ = child.wait();
                    }
                    return Err(LaunchError::spawn(command.program.clone(), e));
                }
            }
        }

        let mut report = SpawnReport::default();
        for (index, mut child) in children {
            let status = child
                .wait()
                .map_err(|e| LaunchError::spawn(format!("instance {}", index), e))?;
            if status.success() {
                info!(instance = index, "Instance finished");
            } else {
                warn!(instance = index, %status, "Instance failed");
            }
            report.statuses.push((index, status));
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::InstancePlan;
    use crate::system::ThreadAffinity;
    use std::collections::BTreeMap;

    fn plan(task_manager: &str, instances: Vec<InstancePlan>) -> LaunchPlan {
        let mut environment = BTreeMap::new();
        environment.insert("OMP_NUM_THREADS".to_string(), "2".to_string());
        LaunchPlan {
            memory_allocator: "default".to_string(),
            omp_runtime: "default".to_string(),
            task_manager: task_manager.to_string(),
            instances,
            ld_preload: "/opt/lib/libjemalloc.so".to_string(),
            environment,
        }
    }

    fn instance(index: usize, cpus: &[usize], node: usize) -> InstancePlan {
        InstancePlan {
            index,
            cpus: cpus.to_vec(),
            nodes: vec![node],
            cpu_list: crate::launcher::format_ranges(cpus.iter().copied()),
            node_list: node.to_string(),
        }
    }

    fn workload(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_numactl_command() {
        let plan = plan("numactl", vec![instance(0, &[0, 1], 0), instance(1, &[4, 5], 1)]);
        let commands = InstanceSpawner::new(&plan)
            .commands(&workload(&["python", "infer.py", "-b", "8"]))
            .unwrap();

        assert_eq!(commands.len(), 2);
        assert_eq!(commands[1].program, "numactl");
        assert_eq!(commands[1].args, workload(&["-C", "4-5", "-m", "1", "python", "infer.py", "-b", "8"]));
        assert!(commands[1].pin_cpus.is_empty());
    }

    #[test]
    fn test_taskset_command() {
        let plan = plan("taskset", vec![instance(0, &[0, 2, 3], 0)]);
        let commands = InstanceSpawner::new(&plan).commands(&workload(&["./bench"])).unwrap();
        assert_eq!(commands[0].program, "taskset");
        assert_eq!(commands[0].args, workload(&["-c", "0,2-3", "./bench"]));
    }

    #[test]
    fn test_native_affinity_command() {
        let plan = plan("none", vec![instance(0, &[6, 7], 1)]);
        let commands = InstanceSpawner::new(&plan).commands(&workload(&["./bench", "--fast"])).unwrap();
        assert_eq!(commands[0].program, "./bench");
        assert_eq!(commands[0].args, workload(&["--fast"]));
        assert_eq!(commands[0].pin_cpus, vec![6, 7]);
    }

    #[test]
    fn test_environment_includes_preload() {
        let plan = plan("none", vec![instance(0, &[0], 0)]);
        let commands = InstanceSpawner::new(&plan).commands(&workload(&["true"])).unwrap();
        let env = &commands[0].env;
        assert!(env.contains(&("LD_PRELOAD".to_string(), "/opt/lib/libjemalloc.so".to_string())));
        assert!(env.contains(&("OMP_NUM_THREADS".to_string(), "2".to_string())));
        assert!(commands[0].display().starts_with("OMP_NUM_THREADS=2 LD_PRELOAD="));
    }

    #[test]
    fn test_empty_workload_is_rejected() {
        let plan = plan("none", vec![instance(0, &[0], 0)]);
        let err = InstanceSpawner::new(&plan).commands(&[]).unwrap_err();
        assert!(matches!(err, LaunchError::ConfigError(_)));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_spawn_reports_first_failure() {
        let cpu = ThreadAffinity::current_cpus().unwrap()[0];
        let mut plan = plan("none", vec![instance(0, &[cpu], 0), instance(1, &[cpu], 0)]);
        plan.ld_preload.clear();

        let ok = InstanceSpawner::new(&plan)
            .spawn_all(&workload(&["sh", "-c", "exit 0"]))
            .unwrap();
        assert!(ok.is_success());
        assert_eq!(ok.exit_code(), 0);

        let failed = InstanceSpawner::new(&plan)
            .spawn_all(&workload(&["sh", "-c", "exit 3"]))
            .unwrap();
        assert!(!failed.is_success());
        assert_eq!(failed.first_failure().map(|(i, _)| i), Some(0));
        assert_eq!(failed.exit_code(), 3);
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let mut plan = plan("none", Vec::new());
        plan.instances.push(instance(0, &[], 0));
        let err = InstanceSpawner::new(&plan)
            .spawn_all(&workload(&["/nonexistent/cpulaunch-test-binary"]))
            .unwrap_err();
        assert!(matches!(err, LaunchError::Spawn { .. }));
    }
}
