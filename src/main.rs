use clap::Parser;
use color_eyre::Result;
use hemolab::{commands, Config, LabClient};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hemolab")]
#[command(about = "A resilient client for a clinical laboratory and blood bank API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/hemolab/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hemolab=warn")))
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  let client = LabClient::from_config(&config)?;
  client.start_background();

  commands::run(args.command, &client).await
}
