//! Main entry point for the ryt-decipher CLI

use anyhow::{bail, Context};
use clap::Parser;
use ryt_decipher::cli::Args;
use ryt_decipher::{Cipher, FileScriptFetcher, FormatDescriptor, HttpScriptFetcher, ScriptFetcher};
use serde::Serialize;
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(&args)?;
    debug!("Starting ryt-decipher with args: {:?}", args);

    if args.formats.is_none() && args.sig.is_none() && args.n.is_none() {
        bail!("nothing to do: pass --formats, --sig or --n");
    }

    let fetcher: Arc<dyn ScriptFetcher> = if args.is_local_script() {
        Arc::new(FileScriptFetcher::new())
    } else {
        Arc::new(HttpScriptFetcher::with_config(args.fetch_config())?)
    };
    let cipher = Cipher::new(fetcher)?;

    if let Some(signature) = &args.sig {
        let deciphered = cipher
            .decipher_signature(&args.script, signature)
            .await
            .map_err(|err| report(err, &args.script))?;
        println!("{}", deciphered);
    }

    if let Some(n) = &args.n {
        let transformed = cipher
            .transform_n(&args.script, n)
            .await
            .map_err(|err| report(err, &args.script))?;
        println!("{}", transformed);
    }

    if args.formats.is_some() {
        let formats = read_formats(&args)?;
        let total = formats.len();
        let resolved = cipher.decipher_formats(formats, &args.script).await;
        info!("Resolved {} of {} formats", resolved.len(), total);
        print_json(&resolved, args.pretty)?;
    }

    Ok(())
}

/// Read the formats array from a file or stdin
fn read_formats(args: &Args) -> anyhow::Result<Vec<FormatDescriptor>> {
    let mut text = String::new();
    match &args.formats {
        Some(_) if args.formats_from_stdin() => {
            std::io::stdin()
                .read_to_string(&mut text)
                .context("failed to read formats from stdin")?;
        }
        Some(path) => {
            text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
        }
        None => return Ok(Vec::new()),
    }

    serde_json::from_str(&text).context("formats must be a JSON array of format objects")
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> anyhow::Result<()> {
    let output = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", output);
    Ok(())
}

fn report(err: ryt_decipher::DecipherError, script: &str) -> anyhow::Error {
    if err.is_retryable() {
        error!("Transient failure fetching {}, try again later", script);
    }
    if let Some(kind) = err.routine() {
        debug!("Failure in {} routine", kind);
    }
    anyhow::Error::new(err).context(format!("failed to process {}", script))
}

/// Initialize logging system
fn init_logging(args: &Args) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(args.log_filter()));

    // stdout carries the results
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .try_init()?;

    Ok(())
}
