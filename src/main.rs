//! ChurnForge: churn prediction and customer segmentation CLI
//!
//! `train` fits every artifact from a CSV, `predict` scores one customer
//! record and `serve` exposes the same pipeline over HTTP.

use anyhow::{Context, Result};
use churnforge::cli::{Args, Command, PredictArgs, ServeArgs, TrainArgs};
use churnforge::config::AppConfig;
use churnforge::{load_training_data, pipeline, server, telemetry, train, viz, TrainedArtifacts};
use clap::Parser;
use std::sync::Arc;
use std::time::Instant;

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load()?;
    if args.verbose {
        config.telemetry.log_level = "debug".to_string();
    }
    telemetry::init(&config.telemetry)?;

    match args.command {
        Command::Train(train_args) => run_training(&train_args, args.verbose),
        Command::Predict(predict_args) => run_prediction(&predict_args, &config),
        Command::Serve(serve_args) => run_server(serve_args, config),
    }
}

/// Fit and save every artifact, then print the evaluation report
fn run_training(args: &TrainArgs, verbose: bool) -> Result<()> {
    println!("=== Training Pipeline ===\n");
    let start_time = Instant::now();

    if verbose {
        println!("Step 1: Loading training data");
        println!("  Input file: {}", args.input.display());
    }
    let data = load_training_data(&args.input)?;
    println!(
        "✓ Data loaded: {} customers, {} features",
        data.n_rows(),
        data.feature_names.len()
    );

    let config = args.training_config();
    if verbose {
        println!("\nStep 2: Fitting models");
        println!("  Segments: {}", config.n_segments);
        println!("  Trees: {}", config.n_trees);
        println!("  Seed: {}", config.seed);
    }
    let fit_start = Instant::now();
    let (artifacts, report) = train(&data, &config)?;
    println!("✓ Models fitted");
    if verbose {
        println!("  Fitting time: {:.2}s", fit_start.elapsed().as_secs_f64());
    }

    artifacts
        .save(&args.output)
        .with_context(|| format!("Failed to write artifacts to {}", args.output.display()))?;
    println!("✓ Artifacts written to {}", args.output.display());

    viz::print_training_report(&report);

    if let Some(plot) = &args.plot {
        viz::churn_by_segment_chart(&report, plot)?;
        println!("\nChurn chart saved to: {}", plot.display());
    }

    println!("\n=== Pipeline Complete ===");
    println!(
        "Total processing time: {:.2}s",
        start_time.elapsed().as_secs_f64()
    );
    Ok(())
}

/// Score one record and print the JSON response
fn run_prediction(args: &PredictArgs, config: &AppConfig) -> Result<()> {
    let dir = args.artifacts.as_ref().unwrap_or(&config.artifacts_dir);
    let artifacts = TrainedArtifacts::load(dir)?;

    let record = args.parse_record()?;
    let prediction = pipeline::run_json(&artifacts, record, args.model)?;
    println!("{}", serde_json::to_string_pretty(&prediction)?);
    Ok(())
}

/// Load artifacts, then bind and serve until stopped
fn run_server(mut args: ServeArgs, mut config: AppConfig) -> Result<()> {
    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }
    if let Some(dir) = args.artifacts.take() {
        config.artifacts_dir = dir;
    }

    let addr = config.server.socket_addr()?;
    let artifacts = Arc::new(TrainedArtifacts::load(&config.artifacts_dir)?);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime.block_on(server::run(artifacts, addr))
}
