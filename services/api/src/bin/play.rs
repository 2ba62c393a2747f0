//! services/api/src/bin/play.rs
//!
//! Plays one scenario in the terminal against the configured LLM, with in-memory
//! stores. Type a line to speak, `/done` to finish the attempt, `/quit` to abandon.
//!
//! Exit codes: 0 success, 1 configuration or usage error, 2 dependency failure.

use api_lib::{
    adapters::{load_content, OllamaAdapter, PiperTtsAdapter},
    config::Config,
    error::ApiError,
    telemetry::init_tracing,
    web::state::{AppState, Repositories},
};
use clap::Parser;
use futures::StreamExt;
use sprachwelt_core::{CoreError, TurnEvent};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use uuid::Uuid;

#[derive(Parser)]
#[command(about = "Play a Sprachwelt scenario in the terminal")]
struct Args {
    /// Scenario to play.
    #[arg(required_unless_present = "list")]
    scenario: Option<String>,

    /// List the available scenarios and exit.
    #[arg(long)]
    list: bool,

    /// Content directory, overriding CONTENT_PATH.
    #[arg(long)]
    content: Option<PathBuf>,

    /// Play as this user instead of a fresh one.
    #[arg(long)]
    user: Option<Uuid>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::from(1);
        }
    };
    if let Some(content) = args.content.clone() {
        config.content_path = content;
    }
    // The transcript owns stdout; keep logs to warnings unless asked otherwise.
    if std::env::var("RUST_LOG").is_err() {
        config.log_filter = "warn".to_string();
    }
    init_tracing(&config.log_filter, config.log_format);

    match play(args, Arc::new(config)).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            exit_code(&e)
        }
    }
}

fn exit_code(err: &ApiError) -> ExitCode {
    match err {
        ApiError::Core(core) if core.is_transient() => ExitCode::from(2),
        ApiError::Core(_) => ExitCode::from(1),
        e if e.is_configuration() => ExitCode::from(1),
        _ => ExitCode::from(2),
    }
}

async fn play(args: Args, config: Arc<Config>) -> Result<(), ApiError> {
    let content = Arc::new(load_content(&config.content_path)?);
    let llm = Arc::new(
        OllamaAdapter::new(config.ollama_base_url.clone(), config.ollama_model.clone())
            .map_err(|e| ApiError::Internal(e.to_string()))?,
    );
    let tts = Arc::new(
        PiperTtsAdapter::new(
            config.piper_base_url.clone(),
            config.tts_default_voice.clone(),
            config.tts_probe_ttl,
        )
        .map_err(|e| ApiError::Internal(e.to_string()))?,
    );
    let app = AppState::new(config, content, llm, tts, Repositories::in_memory())?;

    if args.list {
        for scenario in app.content.scenarios(None, None).await? {
            println!(
                "{:<20} {:<12} {:<8} {}",
                scenario.id,
                scenario.category,
                scenario.difficulty.as_str(),
                scenario.name
            );
        }
        return Ok(());
    }

    let scenario_id = args
        .scenario
        .ok_or_else(|| ApiError::BadRequest("a scenario id is required".into()))?;
    let user_id = args.user.unwrap_or_else(Uuid::new_v4);
    let started = app.engine.start(user_id, &scenario_id).await?;
    let name = started.character.name.clone();
    println!("{} ({}): {}", name, started.character.role, started.greeting);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" => {
                app.engine.abandon(user_id, started.state_id).await?;
                println!("Scenario abandoned.");
                break;
            }
            "/done" => {
                let state = app.engine.complete(user_id, started.state_id).await?;
                println!("Scenario complete. Score: {}", state.score);
                break;
            }
            _ => {}
        }

        print!("{name}:");
        let mut events = app.engine.turn_stream(user_id, started.state_id, line.to_string());
        let mut finished = false;
        while let Some(event) = events.next().await {
            match event {
                Ok(TurnEvent::Delta(delta)) => {
                    print!("{delta}");
                    std::io::stdout().flush()?;
                }
                Ok(TurnEvent::Done(summary)) => {
                    println!();
                    if let Some(feedback) = &summary.grammar_feedback {
                        println!("  Tipp: {} ({})", feedback.corrected, feedback.explanation);
                    }
                    for objective in &summary.completed_objective_ids {
                        println!("  Ziel erreicht: {objective}");
                    }
                    if summary.scenario_complete {
                        println!("Scenario complete. Score: {}", summary.score);
                        finished = true;
                    }
                }
                Err(CoreError::InvalidUtterance(reason)) => {
                    println!();
                    println!("  ({reason})");
                }
                Err(CoreError::StateFrozen(_)) => {
                    println!();
                    println!("The scenario is over.");
                    finished = true;
                }
                Err(e) => {
                    println!();
                    return Err(e.into());
                }
            }
        }
        if finished {
            break;
        }
    }

    let stats = app.progress.stats(user_id).await?;
    println!("XP: {} (level {})", stats.total_xp, stats.level);
    Ok(())
}
