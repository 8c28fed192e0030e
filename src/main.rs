//! tradeguard - paper trading driver
//!
//! Reads JSON lines from stdin: price samples and manual commands. Every
//! command produces one JSON result line on stdout. Logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use tradeguard::config::AppConfig;
use tradeguard::execution::{
    CoordinatorHandle, ExecutionGuard, PaperSigner, PaperSubmitter, SampleBuffer,
    TradeCoordinator,
};
use tradeguard::{Command, Position, PriceSample, TradeError};

/// CLI arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Optional TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seed for execution jitter (random when omitted)
    #[arg(long)]
    seed: Option<u64>,

    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Mode {
    /// Paper trade against JSON lines on stdin (default)
    Run,
    /// Load and validate the configuration, print it, and exit
    CheckConfig,
}

/// One line of input
#[derive(Debug)]
enum Input {
    Command(Command),
    /// A command line that did not parse, with its rendered result
    Rejected(String),
    Sample(PriceSample),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
}

/// One line of output
#[derive(Debug, Serialize)]
struct Output<'a> {
    command: &'a str,
    asset: &'a str,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    position: Option<&'a Position>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unrealized_pnl_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let args = Args::parse();
    let config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    match args.mode.unwrap_or(Mode::Run) {
        Mode::CheckConfig => {
            let rendered =
                serde_json::to_string_pretty(&config).context("Failed to render configuration")?;
            println!("{}", rendered);
            Ok(())
        }
        Mode::Run => run(config, args.seed).await,
    }
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tradeguard=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(config: AppConfig, seed: Option<u64>) -> Result<()> {
    tracing::info!("🚀 tradeguard starting (paper trading)");

    let samples = SampleBuffer::new(config.engine.sample_buffer);
    let rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let guard = ExecutionGuard::new(
        config.guard.clone(),
        Arc::new(PaperSubmitter::new(samples.clone())),
        Arc::new(PaperSigner),
        samples.clone(),
        rng,
    )
    .context("Failed to build execution guard")?;

    let (coordinator, handle) = TradeCoordinator::new(
        &config.engine,
        config.risk.clone(),
        config.breakers.clone(),
        Arc::new(guard),
        samples,
    );
    let coordinator_task = coordinator.spawn();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let rendered = match parse_line(line)? {
            Some(Input::Sample(sample)) => {
                handle
                    .push_price(sample)
                    .await
                    .context("Coordinator stopped while feeding prices")?;
                continue;
            }
            Some(Input::Command(command)) => run_command(&handle, command).await?,
            Some(Input::Rejected(rendered)) => rendered,
            None => continue,
        };

        stdout.write_all(rendered.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    let positions = handle.list().await.context("Failed to list positions")?;
    for position in &positions {
        tracing::info!(
            asset = %position.asset,
            status = ?position.status,
            quantity = position.quantity,
            realized_pnl = position.realized_pnl,
            "Final position"
        );
    }

    handle.shutdown().await.context("Failed to stop coordinator")?;
    coordinator_task
        .await
        .context("Coordinator task panicked")?;

    tracing::info!("tradeguard stopped");
    Ok(())
}

/// Classify one input line; `None` means the line is skipped
///
/// Anything carrying a `command` key is a command, and a malformed one
/// still gets a result line.
fn parse_line(line: &str) -> Result<Option<Input>> {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Skipping unparseable line: {} ({})", line, e);
            return Ok(None);
        }
    };

    if value.get("command").is_some() {
        return match serde_json::from_value::<Command>(value.clone()) {
            Ok(command) => Ok(Some(Input::Command(command))),
            Err(e) => {
                let name = value["command"].as_str().unwrap_or("unknown");
                let asset = value["asset"].as_str().unwrap_or_default();
                let error = TradeError::Validation(format!("malformed command: {}", e));
                render(name, asset, &Err(error)).map(|r| Some(Input::Rejected(r)))
            }
        };
    }

    match serde_json::from_value::<PriceSample>(value) {
        Ok(sample) => Ok(Some(Input::Sample(sample))),
        Err(e) => {
            tracing::warn!("Skipping line that is neither command nor sample: {} ({})", line, e);
            Ok(None)
        }
    }
}

async fn run_command(handle: &CoordinatorHandle, command: Command) -> Result<String> {
    let name = command.name();
    let asset = command.asset().to_string();

    let result = handle.execute(command).await;
    if let Err(TradeError::Channel(reason)) = &result {
        anyhow::bail!("Coordinator unavailable: {}", reason);
    }

    render(name, &asset, &result)
}

fn render(name: &str, asset: &str, result: &tradeguard::Result<Position>) -> Result<String> {
    let output = match result {
        Ok(position) => Output {
            command: name,
            asset,
            ok: true,
            position: Some(position),
            unrealized_pnl_pct: position.unrealized_pnl_pct(),
            error: None,
        },
        Err(e) => Output {
            command: name,
            asset,
            ok: false,
            position: None,
            unrealized_pnl_pct: None,
            error: Some(ErrorBody {
                kind: e.kind(),
                message: e.to_string(),
            }),
        },
    };

    serde_json::to_string(&output).context("Failed to render result")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOL: &str = "So11111111111111111111111111111111111111112";

    fn rejected(line: &str) -> Value {
        match parse_line(line).unwrap() {
            Some(Input::Rejected(rendered)) => serde_json::from_str(&rendered).unwrap(),
            other => panic!("expected a rejected command, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_commands_still_produce_a_result() {
        let bad_amount = rejected(&format!(
            r#"{{"command":"buy","asset":"{}","amount":"lots"}}"#,
            SOL
        ));
        assert_eq!(bad_amount["ok"], false);
        assert_eq!(bad_amount["command"], "buy");
        assert_eq!(bad_amount["asset"], SOL);
        assert_eq!(bad_amount["error"]["kind"], "ValidationError");

        let no_asset = rejected(r#"{"command":"sell"}"#);
        assert_eq!(no_asset["ok"], false);
        assert_eq!(no_asset["command"], "sell");
        assert_eq!(no_asset["error"]["kind"], "ValidationError");
    }

    #[test]
    fn test_samples_and_commands_are_classified() {
        let line = format!(
            r#"{{"asset":"{}","price":1.5,"timestamp":"2024-01-01T00:00:00Z"}}"#,
            SOL
        );
        assert!(matches!(parse_line(&line).unwrap(), Some(Input::Sample(_))));

        let line = format!(r#"{{"command":"status","asset":"{}"}}"#, SOL);
        assert!(matches!(parse_line(&line).unwrap(), Some(Input::Command(_))));

        assert!(parse_line("not json").unwrap().is_none());
        assert!(parse_line(r#"{"price":1.0}"#).unwrap().is_none());
    }
}
