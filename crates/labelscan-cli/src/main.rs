// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Labelscan — Smart Scan for supplement labels
//
// Entry point. Initialises logging, loads the configuration, wires the
// controller to the recognition backend and runs one scan.

mod services;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use labelscan_core::error::Result;
use labelscan_core::human_errors::humanize;
use labelscan_core::types::{BarcodeFormat, EngineStrategy, ResultAuthority, ScanSession, ScanStep};
use labelscan_engine::{ScanController, ScanRequest};
use labelscan_vision::ImageSource;
use tokio_util::sync::CancellationToken;

use services::data_dir;
use services::passthrough::{PassthroughAnalyzer, PassthroughSearcher};

#[derive(Debug, Parser)]
#[command(name = "labelscan", version, about = "Read a supplement label by barcode or OCR")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scan an image file.
    Scan(ScanArgs),
    /// Show configuration.
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
struct ScanArgs {
    /// Image to scan (PNG, JPEG, ...).
    image: PathBuf,

    /// Run OCR even when a barcode is found.
    #[arg(long)]
    force_ocr: bool,

    /// Barcode engine: auto, linear, rqrr or cascade.
    #[arg(long)]
    engine: Option<EngineStrategy>,

    /// Comma-separated barcode formats, e.g. EAN13,QR.
    #[arg(long, value_delimiter = ',')]
    formats: Vec<BarcodeFormat>,

    /// Configuration file; defaults to $XDG_CONFIG_HOME/labelscan/config.json.
    #[arg(long)]
    config: Option<PathBuf>,

    /// OCR language.
    #[arg(long)]
    language: Option<String>,

    /// Text to confirm if the scan stops for manual correction.
    #[arg(long)]
    confirm: Option<String>,

    /// Print the session and stage snapshot as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct ConfigArgs {
    /// Print the built-in defaults instead of the effective configuration.
    #[arg(long)]
    print_default: bool,

    /// Print where the configuration file is looked up.
    #[arg(long)]
    path: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Scan(args) => scan(args).await,
        Command::Config(args) => config(args),
    }
}

fn config(args: ConfigArgs) -> Result<()> {
    if args.path {
        println!("{}", data_dir::config_path().display());
        return Ok(());
    }
    let config = if args.print_default {
        labelscan_core::ScanConfig::default()
    } else {
        data_dir::load_or_default(None)?
    };
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

async fn scan(args: ScanArgs) -> Result<()> {
    std::fs::metadata(&args.image)?;

    let mut config = data_dir::load_or_default(args.config.as_deref())?;
    if let Some(strategy) = args.engine {
        config.barcode.strategy = strategy;
    }
    if !args.formats.is_empty() {
        config.barcode.formats = args.formats.clone();
    }
    if let Some(language) = &args.language {
        config.ocr.language = language.clone();
    }
    config.validate()?;

    let factory = services::recognizer::factory(&config.ocr);
    let mut controller = ScanController::from_config(
        config,
        factory,
        Arc::new(PassthroughAnalyzer),
        Arc::new(PassthroughSearcher),
    );

    let housekeeping = CancellationToken::new();
    let sweeper = controller.pool().spawn_sweeper(housekeeping.clone());

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted; aborting scan");
            on_interrupt.cancel();
        }
    });

    let request = ScanRequest::upload(ImageSource::Path(args.image.clone()))
        .with_force_ocr(args.force_ocr);
    let mut session = controller.run(request, &cancel).await;
    if session.step == ScanStep::ManualCorrection {
        if let Some(text) = args.confirm.clone() {
            session = controller.confirm_manual(text, &cancel).await;
        }
    }
    let snapshot = controller.subscribe().borrow().clone();

    housekeeping.cancel();
    if let Err(err) = sweeper.await {
        tracing::warn!(%err, "Idle sweeper did not stop cleanly");
    }
    controller.pool().shutdown();

    if args.json {
        let report = serde_json::json!({ "session": session, "snapshot": snapshot });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&session);
    }
    Ok(())
}

fn print_summary(session: &ScanSession) {
    match session.step {
        ScanStep::Done => {
            if let Some(input) = session.accepted_input() {
                let origin = match input.origin {
                    ResultAuthority::Barcode => "barcode",
                    ResultAuthority::Ocr => "text",
                    ResultAuthority::Manual => "corrected text",
                };
                match input.format {
                    Some(format) => println!("{origin} ({format}): {}", input.text),
                    None => println!("{origin} ({:.0}%): {}", input.confidence * 100.0, input.text),
                }
            }
        }
        ScanStep::ManualCorrection => {
            println!(
                "Low-confidence read; confirm with --confirm \"<text>\":\n{}",
                session.manual_text.as_deref().unwrap_or_default()
            );
        }
        _ => {
            if let Some(code) = session.error_code {
                let human = humanize(code);
                println!("{} ({code})", human.message);
                if !human.suggestion.is_empty() {
                    println!("{}", human.suggestion);
                }
                if let Some(detail) = &session.error_message {
                    println!("detail: {detail}");
                }
            } else {
                println!("Scan ended in {}", session.step);
            }
        }
    }
}
