//! payment-engine operator entry point.
//!
//! Usage: `payment-engine [audit|reconcile|summary|metrics]`

use payment_engine::config::EngineConfig;
use payment_engine::services::store::StorageUsage;
use payment_engine::services::views::PaymentSummary;
use payment_engine::services::{get_metrics, init_metrics};
use payment_engine::startup::Engine;
use serde::Serialize;
use service_core::error::AppError;
use service_core::observability::init_tracing;

#[derive(Debug, Clone, Copy)]
enum Command {
    Audit,
    Reconcile,
    Summary,
    Metrics,
}

impl Command {
    fn parse(arg: Option<&str>) -> Result<Self, String> {
        match arg.unwrap_or("audit") {
            "audit" => Ok(Command::Audit),
            "reconcile" => Ok(Command::Reconcile),
            "summary" => Ok(Command::Summary),
            "metrics" => Ok(Command::Metrics),
            other => Err(format!(
                "unknown command '{}'; expected audit, reconcile, summary or metrics",
                other
            )),
        }
    }
}

#[derive(Serialize)]
struct SummaryReport {
    payments: PaymentSummary,
    storage: StorageUsage,
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(engine: &Engine, command: Command) -> Result<(), AppError> {
    match command {
        Command::Audit => {
            let audit = engine.validator.validate_all()?;
            tracing::info!("{}", audit.summary());
            print_json(&audit)
        }
        Command::Reconcile => {
            let outcomes = engine.reconciler.reconcile_all()?;
            print_json(&outcomes)
        }
        Command::Summary => {
            let storage = engine.storage_usage()?;
            tracing::info!(
                used_bytes = storage.used_bytes,
                available_bytes = ?storage.available_bytes(),
                "Storage usage"
            );
            print_json(&SummaryReport {
                payments: engine.summary()?,
                storage,
            })
        }
        Command::Metrics => {
            print!("{}", get_metrics());
            Ok(())
        }
    }
}

fn main() -> std::io::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let command = Command::parse(args.get(1).map(String::as_str)).map_err(|e| {
        eprintln!("{}", e);
        std::io::Error::other(e)
    })?;

    // Load configuration
    let config = EngineConfig::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    init_tracing(&config.service_name, &config.log_level, config.common.log_format);
    init_metrics();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        command = ?command,
        backend = ?config.storage.backend,
        data_dir = %config.storage.data_dir.display(),
        "Starting payment-engine"
    );

    let engine = Engine::build(&config).map_err(|e| {
        tracing::error!(error = %e, "Failed to build engine");
        std::io::Error::other(format!("Engine build error: {}", e))
    })?;

    run(&engine, command).map_err(|e| {
        tracing::error!(error = %e, error_type = e.error_type(), "Command failed");
        std::io::Error::other(e.to_string())
    })
}
