//! cpulaunch CLI - Topology-Aware Launcher for CPU Workloads
//!
//! Partitions the machine's cores and starts one workload process per
//! instance with a tuned runtime environment.

use clap::Parser;
use cpulaunch::config::{CliArgs, Commands, LaunchConfig, OutputFormat};
use cpulaunch::error::{IoResultExt, Result};
use cpulaunch::launcher::{LaunchPlan, Launcher, TracingLogger};
use cpulaunch::spawn::InstanceSpawner;
use cpulaunch::system::CpuPoolList;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    // Handle result
    match run(args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            if e.is_user_error() {
                eprintln!("       cpulaunch --help for more information");
            }
            std::process::exit(1);
        }
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let default_level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: CliArgs) -> Result<i32> {
    let lscpu_txt = match &args.lscpu_file {
        Some(path) => std::fs::read_to_string(path).with_path(path)?,
        None => String::new(),
    };

    // Handle subcommands
    if let Some(command) = &args.command {
        return handle_command(command, &args, &lscpu_txt);
    }

    // Require a workload unless only the plan is wanted
    if args.program.is_empty() && !args.dry_run {
        eprintln!("Usage: cpulaunch [OPTIONS] -- <PROGRAM> [ARGS]...");
        eprintln!("       cpulaunch --help for more information");
        eprintln!("       cpulaunch topology   - Show detected CPU topology");
        return Ok(1);
    }

    // Build configuration
    let config = LaunchConfig::from_cli(&args)?;

    let mut launcher = Launcher::from_system(&lscpu_txt)?.with_logger(Arc::new(TracingLogger));
    let plan = launcher.launch(&config)?;
    let spawner = InstanceSpawner::new(&plan);

    if args.dry_run {
        match args.output_format {
            OutputFormat::Json => {
                let commands = if args.program.is_empty() {
                    Vec::new()
                } else {
                    spawner.commands(&args.program)?
                };
                let report = serde_json::json!({
                    "config": config,
                    "plan": plan,
                    "commands": commands,
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            OutputFormat::Text => {
                plan.print_summary();
                if !args.program.is_empty() {
                    println!();
                    spawner.dry_run(&args.program)?;
                }
            }
        }
        return Ok(0);
    }

    if args.verbose > 0 {
        print_plan(&plan, args.output_format)?;
    }

    let report = spawner.spawn_all(&args.program)?;
    if let Some((index, status)) = report.first_failure() {
        eprintln!("Instance {} failed: {}", index, status);
    }

    Ok(report.exit_code())
}

fn handle_command(command: &Commands, args: &CliArgs, lscpu_txt: &str) -> Result<i32> {
    match command {
        Commands::Topology => cmd_topology(lscpu_txt, args.output_format),
    }
}

fn cmd_topology(lscpu_txt: &str, format: OutputFormat) -> Result<i32> {
    let topology = if lscpu_txt.trim().is_empty() {
        CpuPoolList::detect()
    } else {
        CpuPoolList::from_lscpu(lscpu_txt)?
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&topology)?),
        OutputFormat::Text => topology.print_summary(),
    }

    Ok(0)
}

fn print_plan(plan: &LaunchPlan, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(plan)?),
        OutputFormat::Text => {
            plan.print_summary();
            println!();
        }
    }
    Ok(())
}
