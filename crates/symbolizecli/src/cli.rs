//! Exposes the command line application.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use symbolizer_service::config::Config;
use symbolizer_service::logging;
use symbolizer_service::metrics;
use symbolizer_service::profile::Profile;
use symbolizer_service::symbolication::Symbolizer;

/// Symbolizer commands.
#[derive(Subcommand)]
enum Command {
    /// Symbolize the native frames of a pprof profile.
    Symbolize {
        /// The profile to read, optionally gzip compressed. `-` reads from stdin.
        input: PathBuf,

        /// Where to write the symbolized profile. Defaults to stdout.
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

/// Command line interface parser.
#[derive(Parser)]
#[command(name = "symbolizecli", version)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config.as_deref()).context("failed loading config")?;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        ..Default::default()
    });

    // SAFETY: The runtime is not started yet, so this is still single-threaded.
    unsafe { logging::init_logging(&config) };

    if let Some(ref statsd) = config.metrics.statsd {
        metrics::configure_statsd(
            &config.metrics.prefix,
            statsd.as_str(),
            config.metrics.custom_tags.clone(),
        )
        .context("failed to configure statsd")?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("symbolizer-worker")
        .enable_all()
        .build()
        .context("failed to start the runtime")?;

    match cli.command {
        Command::Symbolize { input, output } => {
            runtime.block_on(symbolize(&config, &input, output.as_deref()))
        }
    }
}

async fn symbolize(config: &Config, input: &Path, output: Option<&Path>) -> Result<()> {
    let symbolizer = Symbolizer::from_config(config)?;

    let data = read_input(input).await?;
    let mut profile = Profile::decode_bytes(&data).context("failed to decode profile")?;
    tracing::info!(
        locations = profile.location.len(),
        mappings = profile.mapping.len(),
        "symbolizing {}",
        input.display()
    );

    symbolizer
        .symbolize_pprof(&mut profile)
        .await
        .context("failed to symbolize profile")?;

    let encoded = profile.encode_gzip().context("failed to encode profile")?;
    match output {
        Some(path) => tokio::fs::write(path, &encoded)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&encoded).await?;
            stdout.flush().await?;
        }
    }

    Ok(())
}

async fn read_input(input: &Path) -> Result<Vec<u8>> {
    if input == Path::new("-") {
        let mut data = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut data)
            .await
            .context("failed to read stdin")?;
        return Ok(data);
    }

    tokio::fs::read(input)
        .await
        .with_context(|| format!("failed to read {}", input.display()))
}
