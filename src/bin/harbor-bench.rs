use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use harbor::cli::BenchCli;
use harbor::loadgen;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = BenchCli::parse();

    // stdout carries the summary
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log));
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid arguments");
            return Err(e.into());
        }
    };

    tracing::info!(
        url = %config.target.url(),
        requests = config.requests,
        mode = %config.mode,
        "Sending requests"
    );
    let report = loadgen::run(config).await?;
    println!("{}", report);

    if report.failed > 0 {
        tracing::warn!(
            failed = report.failed,
            first_error = report.first_error.as_deref().unwrap_or("unknown"),
            "Some requests got no response"
        );
    }

    if !cli.no_csv {
        report
            .append_csv(&cli.output)
            .await
            .with_context(|| format!("Failed to write {}", cli.output.display()))?;
    }
    Ok(())
}
