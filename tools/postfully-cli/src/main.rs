//! Postfully CLI: export story videos with an overlay card.
//!
//! Usage:
//!   postfully export [OPTIONS]     Render a story video
//!   postfully still --at <SECS>    Render a single frame as PNG
//!   postfully check                Check encoders and background clips
//!   postfully config [--init]      Show or write the configuration

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use postfully_project_model::export::{BackgroundKind, ExitAnimation, ExportFormat};

mod commands;

#[derive(Parser)]
#[command(
    name = "postfully",
    about = "Composite a post card over an animated background and export it",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a story video
    Export {
        #[command(flatten)]
        render: RenderArgs,

        /// Container format: webm, mp4 or y4m (defaults to the configured format)
        #[arg(long)]
        format: Option<ExportFormat>,

        /// Output directory (defaults to the configured output_dir)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Render the frame at one timestamp as PNG
    Still {
        #[command(flatten)]
        render: RenderArgs,

        /// Timestamp in seconds
        #[arg(long, default_value = "2.5")]
        at: f64,

        /// Write only the overlay card, without a background
        #[arg(long)]
        overlay_only: bool,

        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check encoders and background clips
    Check,

    /// Show the effective configuration
    Config {
        /// Write the configuration file if it does not exist yet
        #[arg(long)]
        init: bool,
    },
}

/// Options shared by every rendering command.
#[derive(Args, Debug, Clone)]
pub struct RenderArgs {
    /// Background theme: minecraft or subway-surfers
    #[arg(short, long, default_value = "minecraft")]
    pub background: BackgroundKind,

    /// Rendered post card (PNG)
    #[arg(long)]
    pub overlay: Option<PathBuf>,

    /// Total clip length in seconds
    #[arg(long, default_value = "10")]
    pub duration: f64,

    /// When the card appears, in seconds
    #[arg(long, default_value = "2")]
    pub start: f64,

    /// How long the card stays visible, in seconds
    #[arg(long, default_value = "6")]
    pub visible: f64,

    /// Exit animation: fade, slide or none
    #[arg(long, default_value = "fade")]
    pub exit: ExitAnimation,

    /// Export the background only
    #[arg(long)]
    pub no_overlay: bool,

    /// Keep the card on screen until the end
    #[arg(long)]
    pub persist: bool,

    /// Card offset from centre, in pixels
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    pub offset_x: f64,

    /// Card offset from centre, in pixels
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    pub offset_y: f64,

    /// Card zoom factor
    #[arg(long, default_value = "1")]
    pub scale: f64,

    /// Canvas width (defaults to the configured width)
    #[arg(long)]
    pub width: Option<u32>,

    /// Canvas height (defaults to the configured height)
    #[arg(long)]
    pub height: Option<u32>,

    /// Skip background clips and use the generated animation
    #[arg(long)]
    pub procedural: bool,

    /// Loop length of the generated animation, in seconds
    #[arg(long)]
    pub loop_secs: Option<f64>,

    /// Animation phase seed for the generated background
    #[arg(long, default_value = "0")]
    pub seed: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let app_config = postfully_common::config::AppConfig::load();

    // Initialize logging
    let mut logging = app_config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    postfully_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Export {
            render,
            format,
            output,
        } => commands::export::run(&app_config, render, format, output).await,
        Commands::Still {
            render,
            at,
            overlay_only,
            output,
        } => commands::still::run(&app_config, render, at, overlay_only, output).await,
        Commands::Check => commands::check::run(&app_config),
        Commands::Config { init } => commands::config::run(&app_config, init),
    }
}
