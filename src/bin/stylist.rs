// stylist - compose a subject photo with item images using an AI image model

use anyhow::{Context, bail};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use stylist::StylistConfig;
use stylist::generation::{Base64Encoder, GeminiClient, GenerationController, Upload, export};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Generate a composite image from a subject photo and item images", long_about = None)]
struct Args {
    /// Subject (person) image
    #[arg(short, long)]
    person: PathBuf,

    /// Item image to composite onto the subject (repeatable)
    #[arg(short, long = "item")]
    items: Vec<PathBuf>,

    /// Free text instruction, e.g. "put the person on a beach at sunset"
    #[arg(long, default_value = "")]
    prompt: String,

    /// Output file path (PNG format). Defaults to the configured filename.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Configuration file (default: ./stylist.toml, then the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured model
    #[arg(short, long)]
    model: Option<String>,

    /// Also print the result as a data URI
    #[arg(long)]
    data_uri: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (for GEMINI_API_KEY)
    let dotenv = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("stylist={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match dotenv {
        Ok(path) => tracing::debug!("Loaded .env file from {}", path.display()),
        Err(e) => tracing::debug!("No .env file loaded: {}", e),
    }

    let mut config = StylistConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    if let Some(model) = args.model {
        config.gemini.model = model;
    }
    if config.gemini.api_key.is_none() {
        bail!("no API key: set GEMINI_API_KEY or gemini.api_key in {}", stylist::config::CONFIG_FILE_NAME);
    }

    let output = args.output.unwrap_or_else(|| config.export.filename.clone());

    tracing::info!("Model: {}", config.gemini.model);
    tracing::info!("Subject: {}", args.person.display());
    tracing::info!("Items: {}", args.items.len());

    let client = GeminiClient::with_config(config.gemini)?;
    let controller = Arc::new(GenerationController::new(
        Arc::new(Base64Encoder::new()),
        Arc::new(client),
    ));

    controller.set_person(Upload::from_path(args.person));
    controller.add_items(args.items.into_iter().map(Upload::from_path));
    controller.set_instruction(args.prompt);

    let mut states = controller.subscribe();
    let watcher = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let phase = states.borrow_and_update().as_str().to_string();
            println!("→ {}", phase);
        }
    });

    let result = controller.generate().await;
    let state = controller.state();

    let image = match result {
        Ok(image) => image,
        Err(e) => {
            drop(controller);
            let _ = watcher.await;
            bail!(state.error().map(str::to_string).unwrap_or_else(|| e.user_message()));
        }
    };

    controller.export(&output)?;
    drop(controller);
    let _ = watcher.await;

    if args.data_uri {
        println!("{}", export::data_uri(&image));
    }
    println!("Image saved to: {}", output.display());

    Ok(())
}
