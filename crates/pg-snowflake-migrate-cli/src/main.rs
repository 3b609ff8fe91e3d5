//! pg-snowflake-migrate CLI - PostgreSQL to Snowflake migration and reconciliation.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use pg_snowflake_migrate::error::EXIT_MISMATCH;
use pg_snowflake_migrate::{
    plan, Config, ConnectionFactory, Connections, MigrateError, MigrationPipeline, SchemaCatalog,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "pg-snowflake-migrate")]
#[command(about = "PostgreSQL to Snowflake migration and reconciliation")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
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

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate every table, then publish the views
    Run {
        /// Override number of tables migrated concurrently
        #[arg(long)]
        concurrency: Option<usize>,

        /// Keep going after a table fails, skipping its dependents
        #[arg(long)]
        continue_on_error: bool,

        /// Do not publish the views after loading
        #[arg(long)]
        skip_views: bool,

        /// Reconcile source and target after the run
        #[arg(long)]
        verify: bool,

        /// Dry run: show the plan without connecting
        #[arg(long)]
        dry_run: bool,
    },

    /// Drop and reload a single table
    MigrateTable {
        /// Table name, e.g. orders
        name: String,
    },

    /// (Re)define the reporting views
    PublishViews,

    /// Compare row counts and line-item metrics between source and target
    Verify {
        /// Absolute tolerance for float metrics
        #[arg(long)]
        tolerance: Option<f64>,

        /// Exit 0 even when mismatches are found
        #[arg(long)]
        allow_mismatch: bool,
    },

    /// Test database connections
    HealthCheck,

    /// Print the load waves and the DDL a run would issue
    Plan,
}

/// Outcome of a command that ran to completion.
enum Outcome {
    Clean,
    Mismatch,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(Outcome::Clean) => ExitCode::SUCCESS,
        Ok(Outcome::Mismatch) => ExitCode::from(EXIT_MISMATCH),
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<Outcome, MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| MigrateError::Config(e.to_string()))?;

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    let catalog = Arc::new(SchemaCatalog::northwind()?);

    // Commands that never connect.
    match &cli.command {
        Commands::Plan => {
            let plan = plan(&catalog, &config.target, config.migration.load_mode)?;
            print_plan(&plan, cli.output_json)?;
            return Ok(Outcome::Clean);
        }
        Commands::Run { dry_run: true, .. } => {
            let plan = plan(&catalog, &config.target, config.migration.load_mode)?;
            print_plan(&plan, cli.output_json)?;
            return Ok(Outcome::Clean);
        }
        _ => {}
    }

    if let Commands::HealthCheck = cli.command {
        let result = ConnectionFactory::new(config).health_check().await;

        if cli.output_json {
            println!("{}", serde_json::to_string_pretty(&result)?);
        } else {
            println!("Health Check Results:");
            println!(
                "  Source (PostgreSQL): {} ({}ms)",
                if result.source_connected { "OK" } else { "FAILED" },
                result.source_latency_ms
            );
            if let Some(ref err) = result.source_error {
                println!("    Error: {}", err);
            }
            println!(
                "  Target (Snowflake): {} ({}ms)",
                if result.target_connected { "OK" } else { "FAILED" },
                result.target_latency_ms
            );
            if let Some(ref err) = result.target_error {
                println!("    Error: {}", err);
            }
            println!(
                "\n  Overall: {}",
                if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
            );
        }

        if !result.healthy {
            return Err(MigrateError::connection(
                "health check",
                "one or both databases are unreachable",
            ));
        }
        return Ok(Outcome::Clean);
    }

    // Apply overrides
    if let Commands::Run {
        concurrency,
        continue_on_error,
        skip_views,
        ..
    } = &cli.command
    {
        if let Some(n) = concurrency {
            config.migration.table_concurrency = (*n).max(1);
        }
        if *continue_on_error {
            config.migration.continue_on_error = true;
        }
        if *skip_views {
            config.migration.publish_views = false;
        }
    }
    if let Commands::Verify {
        tolerance: Some(t), ..
    } = &cli.command
    {
        config.migration.tolerance = *t;
    }

    // Setup signal handling for graceful shutdown (SIGINT and SIGTERM)
    let cancel_token = setup_signal_handler().await?;

    let conns = ConnectionFactory::new(config.clone()).open().await?;
    let outcome = execute(&cli, &config, catalog, conns.clone(), cancel_token).await;
    conns.close().await;
    outcome
}

async fn execute(
    cli: &Cli,
    config: &Config,
    catalog: Arc<SchemaCatalog>,
    conns: Connections,
    cancel_token: CancellationToken,
) -> Result<Outcome, MigrateError> {
    let pipeline = MigrationPipeline::new(catalog, conns, config.migration.clone());

    match &cli.command {
        Commands::Run { verify, .. } => {
            let mut summary = pipeline.run(cancel_token).await?;
            if *verify {
                let report = pipeline.reconcile().await?;
                summary.attach_verification(report);
            }

            if cli.output_json {
                println!("{}", summary.to_json()?);
            } else {
                print!("{}", summary);
            }

            if summary.has_mismatches() || !summary.failed_tables.is_empty() {
                return Ok(Outcome::Mismatch);
            }
            // Skipped tables only happen after a failure, covered above.
            Ok(Outcome::Clean)
        }

        Commands::MigrateTable { name } => {
            let result = pipeline.migrate_table(name).await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", result);
            }

            Ok(if result.is_ok() {
                Outcome::Clean
            } else {
                Outcome::Mismatch
            })
        }

        Commands::PublishViews => {
            let views = pipeline.publish_views().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&views)?);
            } else {
                println!("Views published: {}", views.join(", "));
            }
            Ok(Outcome::Clean)
        }

        Commands::Verify { allow_mismatch, .. } => {
            let report = pipeline.reconcile().await?;

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                print!("{}", report);
            }

            if report.is_clean() || *allow_mismatch {
                Ok(Outcome::Clean)
            } else {
                Ok(Outcome::Mismatch)
            }
        }

        Commands::HealthCheck | Commands::Plan => Ok(Outcome::Clean),
    }
}

fn print_plan(plan: &pg_snowflake_migrate::MigrationPlan, json: bool) -> Result<(), MigrateError> {
    if json {
        println!("{}", serde_json::to_string_pretty(plan)?);
    } else {
        print!("{}", plan);
    }
    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => return Err(format!("unknown verbosity '{}'", other)),
    };

    // Logs go to stderr so stdout carries only the report.
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        "json" => subscriber.json().init(),
        "text" => subscriber.init(),
        other => return Err(format!("unknown log format '{}'", other)),
    }

    Ok(())
}

/// Cancel the returned token on SIGINT (Ctrl-C) or SIGTERM.
#[cfg(unix)]
async fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => eprintln!("\nReceived SIGINT. Finishing in-flight tables..."),
            _ = sigterm.recv() => eprintln!("\nReceived SIGTERM. Finishing in-flight tables..."),
        }
        token.cancel();
    });

    Ok(cancel_token)
}

/// Cancel the returned token on Ctrl-C.
#[cfg(not(unix))]
async fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Finishing in-flight tables...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}
