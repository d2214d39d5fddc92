use std::future::Future;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use mongodb::Database;

use digimaint::config::DbSettings;
use digimaint::db::validator::{StartupStatus, Validator};
use digimaint::db::Connection;
use digimaint::ops::backup::{self, SystemMongoTools};
use digimaint::ops::{
    base, environment, movements, products, search, stock, tenants, OpContext, OpEvent, OpOutcome,
    OpReporter, OpStatus,
};
use digimaint::platform::{PlatformOps, ShellPlatform};
use digimaint::state::{
    Dispatcher, OperationKind, OperationState, OP_BLOCKED_EXIT_CODE,
};
use digimaint::AppError;

const MAX_CONCURRENT_OPERATIONS: usize = 4;

#[derive(Debug, Parser)]
#[command(
    name = "digimaint",
    about = "Maintenance console for Digisat SuiteG6 MongoDB deployments",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Check connectivity to the deployed database and report its state.
    Status {
        /// Emit the raw JSON report instead of the text lines.
        #[arg(long)]
        json: bool,
    },
    /// Product-record maintenance.
    #[command(subcommand)]
    Products(ProductsCommand),
    /// List tax classifications for looking up a reclassification target.
    Tributations {
        /// List the federal table instead of the state one.
        #[arg(long)]
        federal: bool,
        #[arg(long)]
        json: bool,
    },
    /// Emitter-record maintenance.
    #[command(subcommand)]
    Mei(MeiCommand),
    /// Transactional-history maintenance.
    #[command(subcommand)]
    Movements(MovementsCommand),
    /// Find every collection and field holding the given identifier.
    Search {
        /// ObjectId (hex) or literal string value to look for.
        id: String,
    },
    /// Bulk stock and price resets.
    #[command(subcommand)]
    Stock(StockCommand),
    /// Destructive database-level maintenance.
    #[command(subcommand)]
    Base(BaseCommand),
    /// Database backup and restore via the MongoDB dump tools.
    #[command(subcommand)]
    Backup(BackupCommand),
    /// Host environment maintenance (processes, services, files, registry).
    #[command(subcommand)]
    Env(EnvCommand),
}

#[derive(Debug, Subcommand)]
enum ProductsCommand {
    /// Deactivate every product whose linked stock record is depleted.
    Inactivate,
    /// Re-point products at a tax classification by NCM prefix.
    Retribute {
        /// Target state tax classification id (ObjectId hex).
        #[arg(long)]
        tributation: String,
        /// NCM prefixes to match, case-insensitively.
        #[arg(required = true)]
        ncms: Vec<String>,
    },
}

#[derive(Debug, Subcommand)]
enum MeiCommand {
    /// Enable the MEI flag on every emitter record.
    Enable,
}

#[derive(Debug, Subcommand)]
enum MovementsCommand {
    /// Remove embedded person images from card-payment history documents.
    Scrub,
}

#[derive(Debug, Subcommand)]
enum StockCommand {
    /// Zero every stock quantity.
    Zero {
        #[arg(long)]
        yes: bool,
    },
    /// Zero only negative stock quantities.
    ZeroNegative,
    /// Zero every product cost and sale price.
    ZeroPrices {
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Subcommand)]
enum BaseCommand {
    /// Drop all transactional collections, keeping configuration and emitters.
    Clean {
        #[arg(long)]
        yes: bool,
    },
    /// Delete movement history older than a cutoff date.
    Purge {
        /// Cutoff date, YYYY-MM-DD; records strictly before it are removed.
        #[arg(long)]
        before: String,
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Subcommand)]
enum BackupCommand {
    /// Dump the database into a timestamped folder.
    Run {
        /// Directory the `backup_<timestamp>` folder is created in.
        #[arg(long, default_value = "Backups")]
        output_dir: PathBuf,
    },
    /// Restore a dump folder or zip archive into the database.
    Restore {
        /// Dump folder, its `DigisatServer` subfolder, or a `.zip` archive.
        path: PathBuf,
        /// Drop existing collections before restoring.
        #[arg(long)]
        drop: bool,
        #[arg(long)]
        yes: bool,
    },
    /// List the backups under a directory.
    List {
        #[arg(long, default_value = "Backups")]
        dir: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Subcommand)]
enum EnvCommand {
    /// Stop the suite, delete its config files, and recreate the data dir.
    Reset {
        #[arg(long)]
        yes: bool,
    },
    /// Remove the suite's Windows registry footprint.
    RegistryClean {
        #[arg(long)]
        yes: bool,
    },
    /// Inspect or transition the suite's Windows services.
    #[command(subcommand)]
    Services(ServicesCommand),
}

#[derive(Debug, Subcommand)]
enum ServicesCommand {
    Stop,
    Start,
    Status {
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    digimaint::logging::init();

    let cli = Cli::parse();
    match run(cli.command).await {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    }
}

async fn run(command: Commands) -> Result<i32> {
    match command {
        Commands::Status { json } => handle_status(json).await,
        Commands::Products(ProductsCommand::Inactivate) => {
            run_db_op(OperationKind::InactivateProducts, true, |ctx, db| async move {
                products::inactivate_zero_products(&ctx, &db).await
            })
            .await
        }
        Commands::Products(ProductsCommand::Retribute { tributation, ncms }) => {
            run_db_op(OperationKind::RetributeNcm, true, move |ctx, db| async move {
                products::change_tributation_by_ncm(&ctx, &db, &ncms, &tributation).await
            })
            .await
        }
        Commands::Tributations { federal, json } => handle_tributations(federal, json).await,
        Commands::Mei(MeiCommand::Enable) => {
            run_db_op(OperationKind::EnableMei, true, |ctx, db| async move {
                tenants::enable_mei(&ctx, &db).await
            })
            .await
        }
        Commands::Movements(MovementsCommand::Scrub) => {
            run_db_op(OperationKind::ScrubMovements, true, |ctx, db| async move {
                movements::scrub_payment_images(&ctx, &db).await
            })
            .await
        }
        Commands::Search { id } => {
            run_db_op(OperationKind::FindIdentifier, false, move |ctx, db| async move {
                search::find_identifier(&ctx, &db, &id).await
            })
            .await
        }
        Commands::Stock(StockCommand::Zero { yes }) => {
            if let Some(code) = refuse_without_yes(yes) {
                return Ok(code);
            }
            run_db_op(OperationKind::ZeroStock, true, |ctx, db| async move {
                stock::zero_all_stock(&ctx, &db).await
            })
            .await
        }
        Commands::Stock(StockCommand::ZeroNegative) => {
            run_db_op(OperationKind::ZeroNegativeStock, true, |ctx, db| async move {
                stock::zero_negative_stock(&ctx, &db).await
            })
            .await
        }
        Commands::Stock(StockCommand::ZeroPrices { yes }) => {
            if let Some(code) = refuse_without_yes(yes) {
                return Ok(code);
            }
            run_db_op(OperationKind::ZeroPrices, true, |ctx, db| async move {
                stock::zero_all_prices(&ctx, &db).await
            })
            .await
        }
        Commands::Base(BaseCommand::Clean { yes }) => {
            if let Some(code) = refuse_without_yes(yes) {
                return Ok(code);
            }
            run_db_op(OperationKind::CleanBase, false, |ctx, db| async move {
                base::clean_database(&ctx, &db).await
            })
            .await
        }
        Commands::Base(BaseCommand::Purge { before, yes }) => {
            if let Some(code) = refuse_without_yes(yes) {
                return Ok(code);
            }
            run_db_op(OperationKind::PurgeMovements, true, move |ctx, db| async move {
                base::purge_movements_before(&ctx, &db, &before).await
            })
            .await
        }
        Commands::Backup(BackupCommand::Run { output_dir }) => handle_backup(output_dir).await,
        Commands::Backup(BackupCommand::Restore { path, drop, yes }) => {
            if let Some(code) = refuse_without_yes(yes) {
                return Ok(code);
            }
            handle_restore(path, drop).await
        }
        Commands::Backup(BackupCommand::List { dir, json }) => handle_backup_list(dir, json),
        Commands::Env(EnvCommand::Reset { yes }) => {
            if let Some(code) = refuse_without_yes(yes) {
                return Ok(code);
            }
            run_env_op(OperationKind::ResetEnvironment, |ctx, platform| {
                environment::reset_environment(ctx, platform, &environment::ResetTargets::default())
            })
            .await
        }
        Commands::Env(EnvCommand::RegistryClean { yes }) => {
            if let Some(code) = refuse_without_yes(yes) {
                return Ok(code);
            }
            run_env_op(OperationKind::CleanRegistry, |ctx, platform| {
                environment::clean_registry(ctx, platform, &environment::RegistryTargets::default())
            })
            .await
        }
        Commands::Env(EnvCommand::Services(ServicesCommand::Stop)) => {
            run_env_op(OperationKind::Services, environment::stop_services).await
        }
        Commands::Env(EnvCommand::Services(ServicesCommand::Start)) => {
            run_env_op(OperationKind::Services, environment::start_services).await
        }
        Commands::Env(EnvCommand::Services(ServicesCommand::Status { json })) => {
            handle_service_status(json)
        }
    }
}

async fn handle_status(json: bool) -> Result<i32> {
    let settings = DbSettings::from_env().map_err(AppError::from)?;
    let conn = Connection::connect(&settings)?;
    let validator = Validator::new();
    let report = validator.startup_report(&conn).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.message);
        println!("Database     : {}", report.database);
        println!("Host         : {}:{}", settings.host, settings.port);
        println!("Generated at : {}", report.generated_at);
    }

    conn.disconnect().await;
    Ok(match report.status {
        StartupStatus::Unreachable => 1,
        _ => 0,
    })
}

async fn handle_tributations(federal: bool, json: bool) -> Result<i32> {
    let settings = DbSettings::from_env().map_err(AppError::from)?;
    let conn = Connection::connect(&settings)?;
    let validator = Validator::new();
    let report = validator.startup_report(&conn).await;
    if report.status == StartupStatus::Unreachable {
        eprintln!("{}", report.message);
        return Ok(1);
    }

    let entries = if federal {
        products::list_federal_tributations(conn.database()).await?
    } else {
        products::list_tributations(conn.database()).await?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else if entries.is_empty() {
        println!("No tax classification found in the database.");
    } else {
        println!("{:<26}  Description", "Id");
        for entry in &entries {
            println!("{:<26}  {}", entry.id, entry.description);
        }
    }

    conn.disconnect().await;
    Ok(0)
}

fn handle_service_status(json: bool) -> Result<i32> {
    let platform = ShellPlatform::new();
    let entries = environment::service_report(&platform);

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else if entries.is_empty() {
        println!("No suite service is installed on this host.");
    } else {
        println!("{:<20}  Status", "Service");
        for entry in &entries {
            println!("{:<20}  {}", entry.name, entry.status.as_str());
        }
    }
    Ok(0)
}

async fn handle_backup(output_dir: PathBuf) -> Result<i32> {
    let settings = DbSettings::from_env().map_err(AppError::from)?;
    let state = OperationState::new();
    install_ctrl_c_handler(Arc::clone(&state));
    let dispatcher = Dispatcher::new(MAX_CONCURRENT_OPERATIONS);
    let _permit = dispatcher.begin(OperationKind::BackupDatabase).await?;

    let tools = SystemMongoTools::new();
    let ctx = OpContext::new(state, line_printer());
    let outcome = backup::backup_database(&ctx, &tools, &settings, &output_dir)?;

    print_outcome(&outcome);
    Ok(exit_code_for(&outcome))
}

async fn handle_restore(path: PathBuf, drop_existing: bool) -> Result<i32> {
    let settings = DbSettings::from_env().map_err(AppError::from)?;
    let state = OperationState::new();
    install_ctrl_c_handler(Arc::clone(&state));
    let dispatcher = Dispatcher::new(MAX_CONCURRENT_OPERATIONS);
    let _permit = dispatcher.begin(OperationKind::RestoreDatabase).await?;

    let tools = SystemMongoTools::new();
    let platform = ShellPlatform::new();
    let ctx = OpContext::new(state, line_printer());
    let outcome =
        backup::restore_database(&ctx, &tools, &platform, &settings, &path, drop_existing)?;

    print_outcome(&outcome);
    Ok(exit_code_for(&outcome))
}

fn handle_backup_list(dir: PathBuf, json: bool) -> Result<i32> {
    let entries = backup::list_backups(&dir)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else if entries.is_empty() {
        println!("No backup found under {}.", dir.display());
    } else {
        println!("{:<22}  {:>10}  Path", "Timestamp", "Size (MB)");
        for entry in &entries {
            println!(
                "{:<22}  {:>10.2}  {}",
                entry.timestamp,
                entry.size_bytes as f64 / 1024.0 / 1024.0,
                entry.path.display()
            );
        }
    }
    Ok(0)
}

/// Connect, validate, gate, and run one database-backed operation.
async fn run_db_op<F, Fut>(kind: OperationKind, gate_on_empty: bool, op: F) -> Result<i32>
where
    F: FnOnce(OpContext, Database) -> Fut,
    Fut: Future<Output = digimaint::AppResult<OpOutcome>>,
{
    let settings = DbSettings::from_env().map_err(AppError::from)?;
    let conn = Connection::connect(&settings)?;
    let validator = Validator::new();
    let report = validator.startup_report(&conn).await;
    match report.status {
        StartupStatus::Unreachable => {
            eprintln!("{}", report.message);
            return Ok(1);
        }
        StartupStatus::EmptyDatabase if gate_on_empty => {
            eprintln!("{}", report.message);
            return Ok(OP_BLOCKED_EXIT_CODE);
        }
        _ => {}
    }

    let state = OperationState::new();
    install_ctrl_c_handler(Arc::clone(&state));
    let dispatcher = Dispatcher::new(MAX_CONCURRENT_OPERATIONS);
    let permit = dispatcher.begin(kind).await?;

    let ctx = OpContext::new(state, line_printer());
    let outcome = op(ctx, conn.database().clone()).await?;
    drop(permit);
    conn.disconnect().await;

    print_outcome(&outcome);
    Ok(exit_code_for(&outcome))
}

/// Gate and run one host-environment operation; no database involved.
async fn run_env_op(
    kind: OperationKind,
    op: impl FnOnce(&OpContext, &dyn PlatformOps) -> OpOutcome,
) -> Result<i32> {
    let state = OperationState::new();
    install_ctrl_c_handler(Arc::clone(&state));
    let dispatcher = Dispatcher::new(MAX_CONCURRENT_OPERATIONS);
    let _permit = dispatcher.begin(kind).await?;

    let platform = ShellPlatform::new();
    let ctx = OpContext::new(state, line_printer());
    let outcome = op(&ctx, &platform);

    print_outcome(&outcome);
    Ok(exit_code_for(&outcome))
}

fn line_printer() -> OpReporter {
    Arc::new(|event| match event {
        OpEvent::Progress(line) => println!("{line}"),
        OpEvent::Warning(line) => eprintln!("warning: {line}"),
    })
}

fn install_ctrl_c_handler(state: Arc<OperationState>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("cancellation requested; stopping before the next step");
            state.cancel_all();
        }
    });
}

fn refuse_without_yes(yes: bool) -> Option<i32> {
    if yes {
        return None;
    }
    eprintln!("This operation is destructive; re-run with --yes to confirm.");
    Some(OP_BLOCKED_EXIT_CODE)
}

fn print_outcome(outcome: &OpOutcome) {
    println!(
        "{}: {} ({} matched, {} modified, {} failed step(s), {} ms)",
        outcome.kind.as_str(),
        outcome.status.as_str(),
        outcome.matched,
        outcome.modified,
        outcome.failed_steps,
        outcome.duration_ms,
    );
}

fn exit_code_for(outcome: &OpOutcome) -> i32 {
    match outcome.status {
        OpStatus::Cancelled => OP_BLOCKED_EXIT_CODE,
        _ => 0,
    }
}
