//! fleetpatch - patch orchestration for an Ansible-managed fleet
//!
//! Usage:
//!   fleetpatch migrate                      # Create or upgrade the database schema
//!   fleetpatch machines add web-1 10.0.0.5  # Register a machine
//!   fleetpatch scan 1                       # Collect upgradable packages
//!   fleetpatch update 1 --all               # Upgrade everything the last scan found

mod render;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fleetpatch_core::config::FleetConfig;
use fleetpatch_core::execution::{AnsiblePlaybookExecutor, TokioProcessExecutor};
use fleetpatch_core::models::{MachineId, RequestedVersion, RunStatus, UpdateSelection};
use fleetpatch_core::orchestration::{FleetOrchestrator, FleetStores, ScanOutcome};
use fleetpatch_core::persistence::MigrationStore;
use fleetpatch_core::sqlite::{SqliteStore, current_schema_version};

#[derive(Parser)]
#[command(name = "fleetpatch")]
#[command(about = "Scan and patch machines through Ansible", long_about = None)]
struct Cli {
    /// Configuration file (defaults to $FLEETPATCH_CONFIG, then ./fleetpatch.toml)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    Migrate,

    /// Manage the machine registry
    Machines(MachinesArgs),

    /// Register a machine reporting in, or refresh its address
    Enroll {
        hostname: String,
        ip: String,
    },

    /// Manage the Ansible inventory
    Inventory(InventoryArgs),

    /// Scan a machine for upgradable packages
    Scan {
        machine: u64,

        /// Print the playbook output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show upgradable packages from the latest scan
    Packages {
        machine: u64,

        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// List stored scans, newest first
    Scans {
        machine: u64,

        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Upgrade packages found by the latest scan
    Update(UpdateArgs),

    /// Show update history, newest first
    History {
        machine: u64,

        /// Maximum number of records
        #[arg(short = 'n', long, default_value_t = 50)]
        limit: usize,

        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },
}

#[derive(Args)]
struct MachinesArgs {
    #[command(subcommand)]
    command: MachinesSubcommand,
}

#[derive(Subcommand)]
enum MachinesSubcommand {
    /// List registered machines
    List {
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Register a machine
    Add {
        hostname: String,
        ip: String,

        /// SSH user Ansible connects as (defaults to enrollment.default_username)
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Remove a machine; its update history is kept
    #[command(alias = "rm")]
    Remove { machine: u64 },

    /// Change the SSH user for a machine
    SetUser { machine: u64, user: String },
}

#[derive(Args)]
struct InventoryArgs {
    #[command(subcommand)]
    command: InventorySubcommand,
}

#[derive(Subcommand)]
enum InventorySubcommand {
    /// Rewrite the inventory from the registry
    Sync,
}

#[derive(Args)]
struct UpdateArgs {
    machine: u64,

    /// Upgrade every package from the latest scan
    #[arg(long, conflicts_with = "packages", required_unless_present = "packages")]
    all: bool,

    /// Package to upgrade, optionally pinned to a version
    #[arg(long = "package", short, value_name = "NAME[=VERSION]")]
    packages: Vec<String>,

    /// Print the playbook output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// Machine-readable JSON
    Json,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = FleetConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Migrate => run_migrate(&config),
        command => {
            let orchestrator = open_orchestrator(&config)?;
            run_command(&orchestrator, &config, command).await
        }
    }
}

async fn run_command(
    orchestrator: &FleetOrchestrator,
    config: &FleetConfig,
    command: Commands,
) -> Result<ExitCode> {
    match command {
        Commands::Migrate => run_migrate(config),
        Commands::Machines(args) => run_machines(orchestrator, config, args.command),
        Commands::Enroll { hostname, ip } => {
            let outcome = orchestrator.enroll(&hostname, &ip)?;
            let verb = if outcome.created { "Enrolled" } else { "Re-enrolled" };
            println!(
                "{verb} {} as machine {} ({})",
                outcome.machine.hostname, outcome.machine.id, outcome.machine.ip
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Inventory(args) => match args.command {
            InventorySubcommand::Sync => {
                orchestrator.sync_inventory()?;
                println!(
                    "Inventory written to {}",
                    orchestrator.inventory().inventory_path().display()
                );
                Ok(ExitCode::SUCCESS)
            }
        },
        Commands::Scan { machine, verbose } => run_scan(orchestrator, machine, verbose).await,
        Commands::Packages { machine, format } => {
            let packages = orchestrator.latest_packages(MachineId(machine))?;
            render::packages(&packages, format)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Scans { machine, format } => {
            let scans = orchestrator.scans(MachineId(machine))?;
            render::scans(&scans, format)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Update(args) => run_update(orchestrator, args).await,
        Commands::History {
            machine,
            limit,
            format,
        } => {
            let records = orchestrator.history(MachineId(machine), limit)?;
            render::history(&records, format)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_migrate(config: &FleetConfig) -> Result<ExitCode> {
    let store = SqliteStore::new(&config.database_path);
    let before = store.current_version()?;
    store.migrate_to_latest()?;
    let after = current_schema_version();

    if before == after {
        println!(
            "Schema at {} is already at version {after}",
            config.database_path.display()
        );
    } else {
        println!(
            "Migrated {} from version {before} to {after}",
            config.database_path.display()
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn open_orchestrator(config: &FleetConfig) -> Result<FleetOrchestrator> {
    let store = Arc::new(SqliteStore::new(&config.database_path));
    store.migrate_to_latest().with_context(|| {
        format!(
            "failed to prepare database {}",
            config.database_path.display()
        )
    })?;
    tracing::debug!(
        database = %config.database_path.display(),
        inventory = %config.inventory_path.display(),
        "fleet store ready"
    );

    let playbooks = AnsiblePlaybookExecutor::new(
        Arc::new(TokioProcessExecutor),
        &config.ansible.program,
        &config.inventory_path,
    );

    Ok(FleetOrchestrator::from_config(
        config,
        FleetStores::shared(store),
        Arc::new(playbooks),
    ))
}

fn run_machines(
    orchestrator: &FleetOrchestrator,
    config: &FleetConfig,
    command: MachinesSubcommand,
) -> Result<ExitCode> {
    match command {
        MachinesSubcommand::List { format } => {
            render::machines(&orchestrator.machines()?, format)?;
        }
        MachinesSubcommand::Add { hostname, ip, user } => {
            let user = user.unwrap_or_else(|| config.enrollment.default_username.clone());
            let machine = orchestrator.add_machine(&hostname, &ip, &user)?;
            println!("Added {} as machine {}", machine.hostname, machine.id);
        }
        MachinesSubcommand::Remove { machine } => {
            orchestrator.remove_machine(MachineId(machine))?;
            println!("Removed machine {machine}");
        }
        MachinesSubcommand::SetUser { machine, user } => {
            let machine = orchestrator.set_machine_username(MachineId(machine), &user)?;
            println!(
                "Machine {} ({}) now connects as {}",
                machine.id, machine.hostname, machine.username
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_scan(orchestrator: &FleetOrchestrator, machine: u64, verbose: bool) -> Result<ExitCode> {
    match orchestrator.scan(MachineId(machine)).await? {
        ScanOutcome::Recorded {
            snapshot,
            packages,
            output,
            execution_error,
        } => {
            if verbose || execution_error.is_some() {
                println!("{output}");
            }
            println!(
                "Scan {} recorded: {} upgradable package(s)",
                snapshot.id.0,
                packages.len()
            );
            render::packages(&packages, OutputFormat::Table)?;
            Ok(match execution_error {
                Some(error) => {
                    eprintln!("Scan playbook failed ({:?})", error.kind);
                    ExitCode::FAILURE
                }
                None => ExitCode::SUCCESS,
            })
        }
        ScanOutcome::MissingReport {
            output,
            execution_error,
        } => {
            println!("{output}");
            if let Some(error) = execution_error {
                eprintln!("Scan playbook failed ({:?})", error.kind);
            }
            eprintln!("Scan finished without writing a report; nothing was stored");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn run_update(orchestrator: &FleetOrchestrator, args: UpdateArgs) -> Result<ExitCode> {
    let selection = if args.all {
        UpdateSelection::AllLatest
    } else {
        parse_package_selection(&args.packages)?
    };

    let report = orchestrator
        .update(MachineId(args.machine), &selection)
        .await?;

    if args.verbose || report.execution_error.is_some() {
        println!("{}", report.raw_output);
    }
    render::update_report(&report)?;

    Ok(match report.run.status {
        RunStatus::Success => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

fn parse_package_selection(entries: &[String]) -> Result<UpdateSelection> {
    if entries.is_empty() {
        bail!("select packages with --all or --package NAME[=VERSION]");
    }

    let mut selected = Vec::with_capacity(entries.len());
    for entry in entries {
        let (name, version) = match entry.split_once('=') {
            Some((name, version)) => (name.trim(), RequestedVersion::parse(version)),
            None => (entry.trim(), RequestedVersion::Latest),
        };
        if name.is_empty() {
            bail!("package selection '{entry}' has no package name");
        }
        selected.push((name.to_string(), version));
    }

    Ok(UpdateSelection::packages(selected))
}
