use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use itertools::Itertools;
use spa_pack_rs::{BuildConfig, BuildEnvironment, Builder, DEFAULT_CONFIG_FILE};
use spa_pack_server::DevServerOptions;
use tracing_subscriber::EnvFilter;

/// spa-pack: builds browser single-page applications and serves them during
/// development
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build the project once and write the output directory
    Build {
        /// Path to the JSON config file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: String,

        /// Build mode (development or production). Overrides the config file
        /// and NODE_ENV
        #[arg(short, long)]
        mode: Option<BuildEnvironment>,

        /// Print the build report as JSON instead of the written file list
        #[arg(long)]
        json: bool,
    },

    /// Run a development build, then serve the output and proxy rules
    Serve {
        /// Path to the JSON config file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: String,

        /// Interface to bind. Defaults to devServer.host
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on. Defaults to devServer.port
        #[arg(short, long)]
        port: Option<u16>,
    },
}

fn init_logging() -> Result<()> {
    tracing_log::LogTracer::init().context("failed to forward log records to tracing")?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("failed to install the tracing subscriber")
}

fn load_config(path: &str, mode: Option<BuildEnvironment>) -> Result<BuildConfig> {
    let expanded = shellexpand::tilde(path);
    BuildConfig::from_path(Path::new(expanded.as_ref()), mode)
        .with_context(|| format!("failed to load config `{expanded}`"))
}

fn display_path(path: &Path, base: &Path) -> PathBuf {
    path.strip_prefix(base).map(Path::to_path_buf).unwrap_or_else(|_| path.to_path_buf())
}

fn build(config: &str, mode: Option<BuildEnvironment>, json: bool) -> Result<()> {
    let config = load_config(config, mode)?;
    let context = config.context.clone();
    let report = Builder::new(config).build().context("build failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{}",
            report
                .files
                .iter()
                .map(|file| display_path(file, &context).display().to_string())
                .join("\n")
        );
    }
    Ok(())
}

async fn serve(config: &str, host: Option<String>, port: Option<u16>) -> Result<()> {
    let config = load_config(config, Some(BuildEnvironment::Development))?;
    let options = DevServerOptions::from_config(&config);
    let host = host.unwrap_or_else(|| config.dev_server.host.clone());
    let port = port.unwrap_or(config.dev_server.port);

    let report = tokio::task::spawn_blocking(move || Builder::new(config).build())
        .await
        .context("build task panicked")?
        .context("build failed")?;
    tracing::info!("Built {} files", report.files.len());

    let listener = spa_pack_server::bind(&host, port).await?;
    spa_pack_server::serve(listener, &options).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging()?;

    match cli.command {
        Commands::Build { config, mode, json } => build(&config, mode, json),
        Commands::Serve { config, host, port } => serve(&config, host, port).await,
    }
}
