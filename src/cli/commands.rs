use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "bridgebot")]
#[command(author, version, about = "Chat bridge for a text backend and an image backend", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to config/$CONFIG_ENV)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Talk to the bot from the terminal; each line replies to the previous answer
    Console {
        /// Destination key used for template routing
        #[arg(short, long)]
        destination: Option<String>,

        /// Where generated images are written
        #[arg(short, long, default_value = "./bridgebot-output")]
        output_dir: PathBuf,
    },

    /// Send a single line to the text backend and print the answer
    Generate { prompt: String },

    /// Serve only the unload/reload control endpoints
    Control,

    /// Show the model and adapters loaded in the text backend
    ModelInfo,
}
