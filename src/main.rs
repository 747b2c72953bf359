use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use geomap_agent::prompt::{compose_question, parse_choice};
use geomap_agent::{Config, Copilot, CopilotModes, QuestionType};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "geomap")]
#[command(version, about = "Digitize geologic maps and answer questions about them")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate the configuration
    Check,
    /// Digitize a map image and print its meta document
    Digitize {
        image: PathBuf,
    },
    /// Answer a question about a map image
    Ask {
        image: PathBuf,
        #[arg(short, long)]
        question: String,
        /// Question type, e.g. reasoning-fault_existence
        #[arg(short = 't', long = "type")]
        question_type: String,
        /// Comma-separated stages: HIE, DKI, PEQA
        #[arg(short, long, default_value = "HIE,DKI,PEQA")]
        modes: String,
        /// Multiple-choice option as KEY=text, repeatable
        #[arg(short, long = "choice", value_parser = parse_choice)]
        choices: Vec<(String, String)>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load();

    // RUST_LOG wins over the configured level
    let level = config
        .as_ref()
        .map(|c| c.geomap.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", level)).init();

    let config = config?;
    log::info!("Configuration loaded successfully");

    match cli.command {
        Command::Check => {
            println!("Configuration OK");
            println!("Dataset source: {}", config.geomap.dataset_source);
            println!("Model: {}", config.model_identity());
            println!("Cache root: {}", config.cache_root().display());
        }
        Command::Digitize { image } => {
            let copilot = Copilot::build(&config)?;
            let meta = copilot
                .digitize(&image)
                .await
                .with_context(|| format!("Failed to digitize {}", image.display()))?;
            println!("{}", serde_json::to_string_pretty(&meta)?);
        }
        Command::Ask {
            image,
            question,
            question_type,
            modes,
            choices,
        } => {
            let question_type: QuestionType = question_type.parse()?;
            let modes: CopilotModes = modes.parse()?;
            let question = compose_question(&question, &choices);
            let copilot = Copilot::build(&config)?;
            log::info!("Asking {} question with modes {}", question_type, modes);
            let answer = copilot
                .ask(&image, &question, question_type, modes)
                .await
                .with_context(|| format!("Failed to answer question on {}", image.display()))?;
            println!("Question: {}\nAnswer: {}", question, answer);
        }
    }

    Ok(())
}
