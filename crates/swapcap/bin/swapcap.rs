//! swapcap binary entry point.
//!
//! A thin wrapper around the swapcap library that:
//! 1. Parses command-line arguments
//! 2. Initializes logging
//! 3. Runs a capture or inspects a capture file
//!
//! For library usage, see the swapcap crate documentation.

use anyhow::{Context, Result, ensure};
use swapcap::inspect::{describe, inspect_with, read};
use swapcap::{
    Capture, CaptureError, CliArgs, Command, InspectArgs, RecordSource, RunArgs, RunOptions,
    SourceKind, StdinSource, SyntheticSource, run_until_signal,
};
use swapcap_core::FileSink;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::from_args();

    // RUST_LOG wins over --debug
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.default_log_level()));
    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    match &args.command {
        Command::Run(run) => capture(run, args.debug).await,
        Command::Inspect(inspect) => inspect_capture(inspect),
    }
}

async fn capture(run: &RunArgs, debug: bool) -> Result<()> {
    let config = run
        .to_capture_config(debug)
        .context("Invalid capture configuration")?;

    let sink = FileSink::create(&config.output).map_err(|source| CaptureError::SinkOpen {
        path: config.output.clone(),
        source,
    })?;

    let stdin = StdinSource::stdin();
    let (source, min_size, max_size, limit) = (run.source, run.min_size, run.max_size, run.records);
    let sources = move |id: u32| -> Box<dyn RecordSource> {
        match source {
            SourceKind::Synthetic => {
                let synthetic = SyntheticSource::new(id, min_size, max_size);
                match limit {
                    Some(records) => Box::new(synthetic.with_limit(records)),
                    None => Box::new(synthetic),
                }
            }
            SourceKind::Stdin => Box::new(stdin.clone()),
        }
    };

    let options = RunOptions {
        duration: run.duration(),
        stats_interval: run.stats_interval(),
    };

    tracing::info!(
        source = ?run.source,
        duration = ?options.duration,
        "swapcap starting"
    );

    let capture = Capture::new(config)?;
    let report = run_until_signal(capture, sink, sources, options)
        .await
        .context("Capture failed")?;

    if run.stats_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        tracing::info!(
            output = %report.output.display(),
            records = report.committed(),
            stats = %report.stats,
            "capture written"
        );
    }

    Ok(())
}

fn inspect_capture(args: &InspectArgs) -> Result<()> {
    let data = read(&args.file)?;

    let report = inspect_with(&data, args.framing.into(), |record| {
        if args.dump {
            println!("{}", describe(record));
        }
    })
    .with_context(|| format!("Failed to inspect {}", args.file.display()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }

    ensure!(
        report.is_consistent(),
        "{} is truncated or out of order",
        args.file.display()
    );
    Ok(())
}
