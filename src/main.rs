use anyhow::Result;
use bridgebot::cli::{console, Cli, Commands};
use bridgebot::core::TextGenerator;
use bridgebot::prompt::PromptAssembler;
use bridgebot::{control, utils, BridgeState, Settings};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::new()?,
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Ctrl-C received, shutting down");
                shutdown.cancel();
            }
        });
    }

    match cli.command {
        Commands::Console {
            destination,
            output_dir,
        } => console::run_console(&settings, destination, &output_dir, shutdown).await,
        Commands::Generate { prompt } => handle_generate(&settings, &prompt, shutdown).await,
        Commands::Control => handle_control(&settings, shutdown).await,
        Commands::ModelInfo => handle_model_info(&settings, shutdown).await,
    }
}

async fn handle_generate(settings: &Settings, input: &str, shutdown: CancellationToken) -> Result<()> {
    let state = BridgeState::new(shutdown);
    let client = state.text_client(settings)?;
    let assembler = PromptAssembler::new(settings);

    let prompt = format!(
        "{}{}: {}\n{}{}:",
        settings.bot.speaker_prefix,
        settings.bot.user_name_default,
        input,
        settings.bot.speaker_prefix,
        settings.bot.name
    );

    utils::print_info("Sending request...");
    let answer = client
        .generate(&prompt, None, assembler.base_params())
        .await?;
    let first_line = answer.trim().lines().next().unwrap_or_default();

    utils::print_bot(&settings.bot.name, first_line);
    Ok(())
}

async fn handle_control(settings: &Settings, shutdown: CancellationToken) -> Result<()> {
    let state = BridgeState::new(shutdown.clone());
    let client = Arc::new(state.text_client(settings)?);
    control::serve(&settings.control.bind, client, shutdown).await
}

async fn handle_model_info(settings: &Settings, shutdown: CancellationToken) -> Result<()> {
    let state = BridgeState::new(shutdown);
    let client = state.text_client(settings)?;
    let model = client.identify_loaded_model().await?;

    utils::print_header("Text backend");
    utils::print_success(&format!("Model: {}", model.name));
    if model.adapters.is_empty() {
        utils::print_info("Adapters: none");
    } else {
        utils::print_info(&format!("Adapters: {}", model.adapters.join(", ")));
    }
    Ok(())
}
