mod cmd;
mod output;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hotpatch_lib::config::Config;
use tracing_subscriber::EnvFilter;

use cmd::ConnectOptions;

/// hotpatch - Push changed code units from a build server into live sessions
#[derive(Parser)]
#[command(name = "hotpatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Path to the configuration file
  #[arg(short, long, global = true, default_value = "hotpatch.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Serve build output and announce completed builds to connected clients
  Serve {
    /// Address to listen on (overrides the config)
    #[arg(short, long)]
    listen: Option<String>,

    /// Build output directory to serve (overrides the config)
    #[arg(short, long)]
    assets: Option<PathBuf>,
  },

  /// Boot a bundle from a build server and keep it hot-patched
  Connect {
    /// Base URL of the build server (overrides the config)
    #[arg(short, long)]
    url: Option<String>,

    /// Path of the bundle script on the server
    #[arg(long, default_value = "bundle.lua")]
    bundle: String,

    /// Module to load once the bundle has registered its factories
    #[arg(long, default_value = "main")]
    entry: String,

    /// Fetch timeout, e.g. "500ms" or "10s"
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Reload the whole session on every build instead of patching it
    #[arg(long)]
    no_hot: bool,
  },

  /// Report a finished build to a running server
  Notify {
    /// Base URL of the build server (overrides the config)
    #[arg(short, long)]
    url: Option<String>,

    /// Identifier of the build
    #[arg(long)]
    hash: Option<String>,

    /// Report the build as failed
    #[arg(long)]
    failed: bool,

    /// Error message of a failed build (repeatable)
    #[arg(long = "error")]
    errors: Vec<String>,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "info" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .without_time()
    .with_writer(std::io::stderr)
    .init();

  let mut config = Config::load(&cli.config).context("Failed to load config")?;
  config.apply_env().context("Invalid environment override")?;

  match cli.command {
    Commands::Serve { listen, assets } => {
      if let Some(listen) = listen {
        config.server.listen = listen;
      }
      if let Some(assets) = assets {
        config.server.asset_dir = assets;
      }
      cmd::cmd_serve(&config.server)
    }
    Commands::Connect {
      url,
      bundle,
      entry,
      timeout,
      no_hot,
    } => {
      if let Some(url) = url {
        config.client.base_url = url;
      }
      if let Some(timeout) = timeout {
        config.client.fetch_timeout_ms = timeout.as_millis() as u64;
      }
      if no_hot {
        config.client.hot = false;
      }
      cmd::cmd_connect(&config.client, ConnectOptions { bundle, entry })
    }
    Commands::Notify {
      url,
      hash,
      failed,
      errors,
    } => {
      let base_url = url.unwrap_or(config.client.base_url);
      cmd::cmd_notify(&base_url, hash, failed, errors)
    }
  }
}
