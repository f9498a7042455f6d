//! mssql-mysql-migrate CLI - SQL Server to MySQL schema and data migration.

use clap::{Parser, Subcommand};
use mssql_mysql_migrate::{
    Config, JsonProgress, MigrateError, MigrationReport, Orchestrator, RunStatus,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "mssql-mysql-migrate")]
#[command(about = "Dependency-ordered SQL Server to MySQL migration")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file (environment variables are used when it does not exist)
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Timeout in seconds for graceful shutdown (default: 60)
    #[arg(long, default_value = "60")]
    shutdown_timeout: u64,

    /// Print progress updates as JSON lines to stderr
    #[arg(long)]
    progress: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a migration (default)
    Run {
        /// Override source schema
        #[arg(long)]
        source_schema: Option<String>,

        /// Override number of workers
        #[arg(long)]
        workers: Option<usize>,

        /// Dry run: read the schema and print the DDL without touching the target
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate row counts between source and target
    Validate,

    /// Test database connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::resolve(&cli.config)?;
    info!("Configuration hash: {}", &config.hash()[..12]);

    let command = cli.command.unwrap_or(Commands::Run {
        source_schema: None,
        workers: None,
        dry_run: false,
    });

    match command {
        Commands::Run {
            source_schema,
            workers,
            dry_run,
        } => {
            if let Some(schema) = source_schema {
                config.source.schema = schema;
            }
            if let Some(w) = workers {
                config.migration.workers = w;
            }

            let mut orchestrator = Orchestrator::new(config).await?;
            if cli.progress {
                orchestrator = orchestrator.with_progress(Arc::new(JsonProgress));
            }

            if dry_run {
                let plan = orchestrator.dry_run().await;
                orchestrator.close().await;
                let plan = plan?;

                if cli.output_json {
                    println!("{}", plan.to_json()?);
                } else {
                    println!("-- Table order: {}", plan.order.join(", "));
                    for problem in &plan.problems {
                        println!(
                            "-- {}: {} ({})",
                            problem.name,
                            problem.status,
                            problem.error.as_deref().unwrap_or("")
                        );
                    }
                    for warning in &plan.warnings {
                        println!("-- WARNING: {}", warning);
                    }
                    for statement in &plan.statements {
                        println!("{};\n", statement);
                    }
                }
                return Ok(());
            }

            let cancel_token = setup_signal_handler(cli.shutdown_timeout);
            let shutdown = Duration::from_secs(cli.shutdown_timeout);

            let result = tokio::select! {
                result = orchestrator.run(cancel_token.clone()) => result,
                _ = async {
                    cancel_token.cancelled().await;
                    tokio::time::sleep(shutdown).await;
                } => {
                    warn!("In-flight work did not finish within {}s; exiting", cli.shutdown_timeout);
                    Err(MigrateError::Cancelled)
                }
            };
            orchestrator.close().await;
            let report = result?;

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                print_report(&report);
            }

            match report.status {
                RunStatus::Completed => {}
                RunStatus::Cancelled => return Err(MigrateError::Cancelled),
                RunStatus::Incomplete | RunStatus::Running => {
                    return Err(MigrateError::Incomplete(format!(
                        "{} of {} tables did not fully migrate, {} constraints failed",
                        report.tables_total - report.tables_succeeded,
                        report.tables_total,
                        report.constraints_failed.len()
                    )));
                }
            }
        }

        Commands::Validate => {
            let orchestrator = Orchestrator::new(config).await?;
            let checks = orchestrator.validate().await;
            orchestrator.close().await;
            let checks = checks?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&checks)?);
            } else {
                println!("Row count validation:");
                for check in &checks {
                    let target = check
                        .target_rows
                        .map(|n| n.to_string())
                        .unwrap_or_else(|| "missing".to_string());
                    println!(
                        "  {} {}: source={} target={}",
                        if check.matches { "OK      " } else { "MISMATCH" },
                        check.table,
                        check.source_rows,
                        target
                    );
                }
            }

            let mismatches = checks.iter().filter(|c| !c.matches).count();
            if mismatches > 0 {
                return Err(MigrateError::Incomplete(format!(
                    "{} of {} tables have row count mismatches",
                    mismatches,
                    checks.len()
                )));
            }
        }

        Commands::HealthCheck => {
            let orchestrator = Orchestrator::new(config).await?;
            let result = orchestrator.health_check().await;
            orchestrator.close().await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source (MSSQL): {} ({}ms)",
                    if result.source.connected { "OK" } else { "FAILED" },
                    result.source.latency_ms
                );
                if let Some(ref err) = result.source.error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Target (MySQL): {} ({}ms)",
                    if result.target.connected { "OK" } else { "FAILED" },
                    result.target.latency_ms
                );
                if let Some(ref err) = result.target.error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(MigrateError::connection(
                    "health-check",
                    "one or more connections failed",
                ));
            }
        }
    }

    Ok(())
}

fn print_report(report: &MigrationReport) {
    let headline = match report.status {
        RunStatus::Completed => "Migration completed!",
        RunStatus::Cancelled => "Migration cancelled.",
        RunStatus::Incomplete | RunStatus::Running => "Migration finished with failures.",
    };
    println!("\n{}", headline);
    println!("  Run ID: {}", report.run_id);
    println!("  Database: {}", report.database);
    println!("  Duration: {:.2}s", report.duration_seconds);
    println!(
        "  Tables: {}/{}",
        report.tables_succeeded, report.tables_total
    );
    println!("  Rows: {}", report.rows_migrated);
    println!("  Deferred constraints: {}", report.constraints_applied);

    for table in report.unsuccessful_tables() {
        match &table.error {
            Some(err) => println!("  {} {}: {}", table.status, table.name, err),
            None => println!("  {} {}", table.status, table.name),
        }
    }
    for constraint in &report.constraints_failed {
        println!("  constraint failed: {}", constraint);
    }
    if !report.warnings.is_empty() {
        println!("  Warnings: {}", report.warnings.len());
    }
}

/// `RUST_LOG` takes precedence over `--verbosity`.
fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => "debug",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
fn setup_signal_handler(shutdown_timeout: u64) -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        tokio::spawn(async move {
            let mut stream = match signal(kind) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Failed to install {} handler: {}", name, e);
                    return;
                }
            };
            stream.recv().await;
            eprintln!(
                "\nReceived {}. Finishing the current table (timeout: {}s)...",
                name, shutdown_timeout
            );
            token.cancel();
        });
    }

    cancel_token
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler(shutdown_timeout: u64) -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl-C handler: {}", e);
            return;
        }
        eprintln!(
            "\nReceived Ctrl-C. Finishing the current table (timeout: {}s)...",
            shutdown_timeout
        );
        token.cancel();
    });

    cancel_token
}
