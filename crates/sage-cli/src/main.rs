//! sage - tool-augmented question answering agent CLI

mod config;
mod tools;

use anyhow::Context as _;
use clap::Parser;
use config::Config;
use sage_agent::{
    Agent, AgentConfig, AgentEvent, ConversationState, ProviderClient, RetryConfig,
    SessionHandle, SessionOutcome, Termination, ToolRegistry,
};
use sage_ai::{Model, Provider, models};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tools::ToolSettings;
use tracing_subscriber::EnvFilter;

/// Characters of tool output shown in progress lines
const PREVIEW_CHARS: usize = 200;

/// sage - answer questions with web, code, database, spreadsheet, chess and text tools
#[derive(Parser, Debug)]
#[command(name = "sage")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model to use (default: gemini-2.0-flash)
    #[arg(short, long)]
    model: Option<String>,

    /// Provider (google, openai, groq, openrouter, ollama)
    #[arg(short, long)]
    provider: Option<String>,

    /// Maximum model steps per question
    #[arg(long)]
    max_turns: Option<u32>,

    /// Answer a single question and exit
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// List the available tools and exit
    #[arg(long)]
    list_tools: bool,

    /// List the built-in model catalogue and exit
    #[arg(long)]
    list_models: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        Some(EnvFilter::new("sage=debug"))
    } else {
        EnvFilter::try_from_default_env().ok()
    };
    if let Some(filter) = filter {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Pick the model for a provider, or look the id up in the catalogue
fn resolve_model(provider: Option<&str>, model_id: &str) -> anyhow::Result<Model> {
    match provider {
        Some(id) => {
            let provider = Provider::from_id(id).with_context(|| {
                format!(
                    "Unknown provider '{}' (expected google, openai, groq, openrouter, ollama)",
                    id
                )
            })?;
            Ok(models::resolve(provider, model_id))
        }
        None => Ok(models::get_model_by_id(model_id)
            .unwrap_or_else(|| Model::custom(Provider::Google, model_id))),
    }
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

/// Print tool activity to stderr until the session ends
fn spawn_event_printer(
    mut receiver: broadcast::Receiver<AgentEvent>,
    verbose: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match receiver.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            };

            match &event {
                AgentEvent::ToolExecutionStart {
                    tool_name,
                    arguments,
                    ..
                } => {
                    if verbose {
                        eprintln!("[Running {} {}]", tool_name, arguments);
                    } else {
                        eprintln!("[Running {}...]", tool_name);
                    }
                }
                AgentEvent::ToolExecutionEnd {
                    tool_name,
                    result,
                    is_error,
                    ..
                } => {
                    if *is_error {
                        eprintln!("[{} failed: {}]", tool_name, preview(result));
                    } else if verbose {
                        eprintln!("[{}: {}]", tool_name, preview(result));
                    }
                }
                AgentEvent::Error { message } => {
                    eprintln!("Error: {}", message);
                }
                AgentEvent::SessionEnd {
                    total_turns,
                    total_usage,
                    ..
                } if verbose => {
                    eprintln!(
                        "[Steps: {} | Tokens: {} in, {} out]",
                        total_turns, total_usage.input, total_usage.output
                    );
                }
                _ => {}
            }

            if event.is_terminal() {
                break;
            }
        }
    })
}

/// Run one question to completion; Ctrl-C cancels it
async fn run_session(agent: &Agent, input: &str, verbose: bool) -> SessionOutcome {
    let handle = SessionHandle::new();
    let printer = spawn_event_printer(handle.subscribe(), verbose);

    let interrupt = {
        let handle = handle.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n[Cancelling...]");
                handle.cancel();
            }
        })
    };

    let outcome = agent
        .run_with_handle(ConversationState::new(input), &handle)
        .await;

    interrupt.abort();
    let _ = printer.await;
    outcome
}

async fn run_command(agent: &Agent, command: &str, verbose: bool) -> anyhow::Result<()> {
    let outcome = run_session(agent, command, verbose).await;
    println!("{}", outcome.answer());

    match outcome.termination {
        Termination::Answered => Ok(()),
        Termination::Cancelled => std::process::exit(130),
        Termination::ModelFailed | Termination::TurnLimit => std::process::exit(1),
    }
}

async fn run_interactive(agent: &Agent, verbose: bool) -> anyhow::Result<()> {
    if std::io::IsTerminal::is_terminal(&std::io::stderr()) {
        let model = &agent.config().model;
        eprintln!(
            "sage ({}, {} tools) - type 'quit' to exit",
            model.id,
            agent.registry().len()
        );
        eprintln!();
    }

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        stdout.write_all(b"You: ").await?;
        stdout.flush().await?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        // EOF or Ctrl-C at the prompt
        let Some(line) = line else {
            println!();
            break;
        };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if matches!(input.to_lowercase().as_str(), "quit" | "exit" | "q") {
            break;
        }

        // Each question starts from a fresh conversation
        let outcome = run_session(agent, input, verbose).await;
        println!("\nAgent: {}\n", outcome.answer());
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_tracing(args.verbose);

    if args.init_config {
        let path = Config::init()?;
        println!("Config file: {}", path.display());
        return Ok(());
    }

    if args.list_models {
        for model in models::get_all_models() {
            println!("{:<12} {:<40} {}", model.provider.name(), model.id, model.name);
        }
        return Ok(());
    }

    let config = Config::load();

    let settings = ToolSettings {
        data_dir: config.data_dir(),
        python: config.python.clone().unwrap_or_else(|| "python3".to_string()),
        tavily_api_key: config.tavily_api_key(),
    };
    let registry = Arc::new(ToolRegistry::register(tools::builtin_tools(&settings)?)?);

    if args.list_tools {
        for tool in registry.iter() {
            println!("{:<30} {}", tool.name(), tool.description());
        }
        return Ok(());
    }

    let provider = args.provider.as_deref().or(config.provider.as_deref());
    let model_id = args.model.as_deref().unwrap_or(config.model_id());
    let model = resolve_model(provider, model_id)?;

    let mut client = match config.get_api_key(model.provider) {
        Some(key) => ProviderClient::with_api_key(key),
        None => {
            if let Some(var) = model.provider.api_key_env_var() {
                anyhow::bail!(
                    "{} not found. Set it in the environment, a .env file, or the [api_keys] section of {}",
                    var,
                    Config::config_path().display()
                );
            }
            ProviderClient::new()
        }
    };
    if let Some(max_retries) = config.max_retries {
        client = client.with_retry_config(RetryConfig {
            max_retries,
            ..RetryConfig::default()
        });
    }

    let mut agent_config = AgentConfig::new(model);
    if let Some(max_turns) = args.max_turns.or(config.max_turns) {
        agent_config.max_turns = Some(max_turns);
    }
    agent_config.parallel_tools = config.parallel_tools.unwrap_or(false);
    agent_config.temperature = config.temperature;

    tracing::debug!(
        model = %agent_config.model.id,
        provider = agent_config.model.provider.name(),
        tools = registry.len(),
        "starting"
    );
    let agent = Agent::new(agent_config, registry, Arc::new(client));

    if let Some(command) = args.command {
        run_command(&agent, &command, args.verbose).await
    } else {
        run_interactive(&agent, args.verbose).await
    }
}
