//! KILLPOINT CLI
//!
//! Runs kill-point failover batches against a live cluster or a seeded
//! simulation and exits non-zero if any checkpoint fails.

#![warn(missing_docs)]
#![warn(clippy::all)]

use clap::{Args, Parser, Subcommand};
use color_eyre::Result;
use console::style;
use killpoint_cluster::{CephCli, CephConfig, CommandMount, SystemdLifecycle};
use killpoint_core::HarnessConfig;
use killpoint_harness::{BatchReport, ClusterHandles, FixtureState, ScenarioRunner};
use killpoint_sim::{FaultPlan, ScheduledFault, SimCluster, SimConfig, SimSeed};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "killpoint")]
#[command(about = "KILLPOINT - metadata daemon failover at every kill point", long_about = None)]
struct Cli {
    /// Log as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct BatchArgs {
    /// Harness configuration (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Kill points to exercise, 1..=N
    #[arg(long)]
    checkpoints: Option<u32>,
    /// Write the batch report here as JSON
    #[arg(long)]
    report: Option<PathBuf>,
    /// Batches to run back to back
    #[arg(long, default_value_t = 1)]
    rounds: u32,
}

#[derive(Subcommand)]
enum Commands {
    /// Run against a live cluster
    Run {
        #[command(flatten)]
        batch: BatchArgs,
        /// File system name
        #[arg(long)]
        fs: String,
        /// Client mount point
        #[arg(long)]
        mount_point: PathBuf,
        /// Command that mounts the client, whitespace separated
        #[arg(long)]
        mount_command: Option<String>,
        /// Command that unmounts the client, whitespace separated
        #[arg(long)]
        unmount_command: Option<String>,
        /// Admin tool binary
        #[arg(long, default_value = "ceph")]
        ceph: String,
        /// Service unit of a daemon, `{name}` is replaced
        #[arg(long, default_value = "ceph-mds@{name}")]
        unit_template: String,
        /// Fail a checkpoint if the victim process is still running after failover
        #[arg(long)]
        verify_process_death: bool,
    },
    /// Run against a seeded in-memory cluster
    Simulate {
        #[command(flatten)]
        batch: BatchArgs,
        /// Simulation seed
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Fault to inject, `<fault>@<checkpoint>` (repeatable)
        #[arg(long = "fault")]
        faults: Vec<ScheduledFault>,
        /// Write the simulation event record here as JSON
        #[arg(long)]
        record: Option<PathBuf>,
    },
    /// Print the effective configuration
    Config {
        /// Harness configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.json);

    match cli.command {
        Commands::Run {
            batch,
            fs,
            mount_point,
            mount_command,
            unmount_command,
            ceph,
            unit_template,
            verify_process_death,
        } => {
            let config = live_config(&batch, verify_process_death)?;

            let cli = Arc::new(CephCli::new(CephConfig::new(fs).with_binary(ceph)));
            let mut mount = CommandMount::new(mount_point);
            if let Some(cmd) = mount_command {
                mount = mount.with_mount_command(split_argv(&cmd));
            }
            if let Some(cmd) = unmount_command {
                mount = mount.with_unmount_command(split_argv(&cmd));
            }
            let handles = ClusterHandles {
                admin: cli.clone(),
                topology: cli,
                mount: Arc::new(mount),
                lifecycle: Arc::new(SystemdLifecycle::new().with_unit_template(unit_template)),
            };

            info!(checkpoints = config.checkpoint_count, rounds = batch.rounds, "starting live run");
            run_rounds(&ScenarioRunner::new(config, handles), &batch).await
        }
        Commands::Simulate {
            batch,
            seed,
            faults,
            record,
        } => {
            tokio::time::pause();
            let config = load_config(batch.config.as_deref(), batch.checkpoints)?;
            let cluster = Arc::new(SimCluster::with_faults(
                SimConfig::new(SimSeed::from_literal(seed)),
                FaultPlan::from_scheduled(faults),
            ));

            info!(seed, checkpoints = config.checkpoint_count, "starting simulated run");
            let runner = ScenarioRunner::new(config, ClusterHandles::shared(cluster.clone()));
            let outcome = run_rounds(&runner, &batch).await;
            if let Some(path) = record {
                std::fs::write(&path, cluster.record().to_json())?;
            }
            outcome
        }
        Commands::Config { config } => {
            println!("{}", load_config(config.as_deref(), None)?.to_json());
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("killpoint=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

fn load_config(path: Option<&Path>, checkpoints: Option<u32>) -> Result<HarnessConfig> {
    let mut config = match path {
        Some(path) => HarnessConfig::from_json_file(path)?,
        None => HarnessConfig::default(),
    };
    if let Some(count) = checkpoints {
        config = config.with_checkpoint_count(count);
    }
    config.validate()?;
    Ok(config)
}

/// The flag can only turn the process-death check on
fn live_config(batch: &BatchArgs, verify_process_death: bool) -> Result<HarnessConfig> {
    let config = load_config(batch.config.as_deref(), batch.checkpoints)?;
    let verify = config.verify_process_death || verify_process_death;
    Ok(config.with_verify_process_death(verify))
}

fn split_argv(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

/// Run `rounds` batches, threading the fixture state so it is written once.
/// Stops at the first failing batch.
async fn run_rounds(runner: &ScenarioRunner, batch: &BatchArgs) -> Result<()> {
    let mut fixture = FixtureState::Uninitialized;
    for round in 1..=batch.rounds.max(1) {
        let (report, next) = runner.run_batch(fixture).await?;
        fixture = next;
        print_summary(round, &report);
        if let Some(path) = &batch.report {
            report.write_json(path)?;
        }
        report.verdict()?;
    }
    Ok(())
}

fn print_summary(round: u32, report: &BatchReport) {
    println!(
        "{} round {} ({})",
        style("killpoint").bold(),
        round,
        report.run_id
    );
    for result in &report.results {
        let mark = if result.passed {
            style("PASS").green()
        } else {
            style("FAIL").red()
        };
        let victim = result
            .victim
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  checkpoint {:>2}  {}  victim {:<6} {}",
            result.checkpoint,
            mark,
            victim,
            style(result.reason.as_deref().unwrap_or_default()).dim()
        );
    }
    let summary = format!("{}/{} passed", report.pass_count(), report.checkpoint_count);
    if report.all_passed() {
        println!("{}", style(summary).green().bold());
    } else {
        println!("{}", style(summary).red().bold());
    }
}
