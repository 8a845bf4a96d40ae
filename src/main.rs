//! Phasegate CLI
//!
//! Runs the configured test phases and exits 0 only if every attempted
//! phase passed.

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use phasegate::report::format_secs;
use phasegate::{CliArgs, Orchestrator, RunConfiguration, RunOutcome, SystemRunner};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .init();

    let config = match RunConfiguration::resolve(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    let cancel = CancellationToken::new();
    tokio::spawn(forward_interrupts(cancel.clone()));

    let orchestrator =
        Orchestrator::new(config, Arc::new(SystemRunner::new())).with_cancellation(cancel);

    match orchestrator.run().await {
        Ok(outcome) => {
            print_summary(&outcome);
            std::process::exit(outcome.exit_code());
        }
        Err(e) => {
            eprintln!("Run failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Cancels `token` on SIGINT or SIGTERM.
async fn forward_interrupts(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "could not install SIGTERM handler");
                if tokio::signal::ctrl_c().await.is_ok() {
                    token.cancel();
                }
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
    }

    tracing::warn!("interrupt received, stopping after the active subprocess terminates");
    token.cancel();
}

fn print_summary(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Completed { result, reports } => {
            println!("\n{}", "=".repeat(60));
            println!("Test Run Complete: {}", result.run_id);
            println!("{}", "=".repeat(60));
            println!();
            println!("Status: {}", result.overall_status.to_string().to_uppercase());
            println!("Duration: {}", format_secs(result.total_duration_ms()));
            if result.cancelled {
                println!("Interrupted: results are partial");
            }
            println!();
            println!("Phases:");
            for phase in &result.phases {
                println!(
                    "  {:<14} {:<8} {}",
                    phase.name,
                    phase.status.to_string(),
                    format_secs(phase.duration_ms)
                );
            }
            println!();
            match &result.coverage {
                Some(summary) => {
                    println!("Coverage:");
                    for (dimension, metric) in &summary.dimensions {
                        println!("  {:<14} {:.2}%", dimension.to_string(), metric.pct);
                    }
                }
                None => println!("Coverage: not measured"),
            }
            println!();
            println!("Reports:");
            for path in reports {
                println!("  {}", path.display());
            }
        }
        RunOutcome::Aborted { report, path } => {
            println!("\n{}", "=".repeat(60));
            println!("Test Run Aborted");
            println!("{}", "=".repeat(60));
            println!();
            println!("Reason: {}", report.message);
            for warning in &report.warnings {
                println!("Warning: {}", warning);
            }
            if let Some(path) = path {
                println!("Failure report: {}", path.display());
            }
        }
    }
}
