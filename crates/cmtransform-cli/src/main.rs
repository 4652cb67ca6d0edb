//! cmtransform CLI
//!
//! Runs the ConfigMap transform controller against a local manifest directory.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod local_cluster;

/// cmtransform - keep base64-encoded copies of ConfigMaps in sync
#[derive(Parser)]
#[command(name = "cmtransform")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file or directory
    #[arg(short, long, env = "CMTRANSFORM_CONFIG", default_value = "cmtransform.yaml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new controller directory with an example transform
    Init {
        /// Directory to initialize (defaults to current directory)
        #[arg(default_value = ".")]
        path: String,

        /// Controller name (defaults to directory name)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Validate a ConfigMapTransform manifest
    Validate {
        /// Path to the manifest
        file: String,
    },

    /// Render the target ConfigMap for a source without touching any state
    Render {
        /// Source ConfigMap manifest
        #[arg(short, long)]
        source: String,

        /// ConfigMapTransform manifest
        #[arg(short, long)]
        transform: String,
    },

    /// Run the controller
    Run {
        /// Reconcile the current manifests once and exit
        #[arg(long)]
        once: bool,
    },

    /// Show transforms and their last applied source version
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Init { path, name } => {
            commands::init::run(&path, name.as_deref()).await?;
        }
        Commands::Validate { file } => {
            commands::validate::run(&file).await?;
        }
        Commands::Render { source, transform } => {
            commands::render::run(&source, &transform).await?;
        }
        Commands::Run { once } => {
            commands::run::run(&cli.config, once).await?;
        }
        Commands::Status => {
            commands::status::run(&cli.config).await?;
        }
    }

    Ok(())
}
