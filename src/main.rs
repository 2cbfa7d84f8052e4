use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::error::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use confab::core::config::Config;
use confab::core::engine::{run_cancellable, ChatEngine};
use confab::mcp::error::EngineError;

#[derive(Parser)]
#[command(name = "confab")]
#[command(about = "Chat with a local LLM that can call tools on MCP servers")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive chat; the model may call tools between answers
    Chat {
        /// Session to continue; reuse an id to keep conversation history
        #[arg(short, long, default_value = "default")]
        session: String,
    },
    /// Show configured MCP servers and their connection status
    Servers,
    /// List the tools one server advertises
    Tools { server: String },
    /// Call one tool directly, bypassing the model
    Call {
        server: String,
        tool: String,
        /// Arguments as a JSON object
        #[arg(default_value = "{}")]
        arguments: String,
    },
    /// List the resources one server exposes
    Resources { server: String },
    /// Read one resource by URI
    Resource { server: String, uri: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load_or_init()?;
    if config.servers.is_empty() {
        warn!(
            "no MCP servers configured; edit {} to add some",
            Config::config_path()?.display()
        );
    }
    let engine = ChatEngine::from_config(&config)?;
    let result = run(&engine, args.command).await;
    engine.shutdown().await;
    result
}

async fn run(engine: &ChatEngine, command: Command) -> Result<(), Box<dyn Error>> {
    match command {
        Command::Chat { session } => chat_repl(engine, &session).await,
        Command::Servers => {
            for summary in engine.list_servers().await {
                match summary.tool_count {
                    Some(count) => {
                        println!("{}: {} ({} tools)", summary.name, summary.status, count)
                    }
                    None => println!("{}: {}", summary.name, summary.status),
                }
            }
            Ok(())
        }
        Command::Tools { server } => {
            for tool in engine.list_tools(&server).await? {
                match tool.description {
                    Some(description) => println!("{}: {}", tool.name, description),
                    None => println!("{}", tool.name),
                }
            }
            Ok(())
        }
        Command::Call {
            server,
            tool,
            arguments,
        } => {
            let arguments = parse_arguments(&arguments)?;
            let result = engine.call_tool(&server, &tool, arguments).await?;
            if result.is_error {
                eprintln!("tool reported an error");
            }
            println!("{}", result.content);
            Ok(())
        }
        Command::Resources { server } => {
            for resource in engine.list_resources(&server).await? {
                match resource.description {
                    Some(description) => {
                        println!("{} ({}): {}", resource.uri, resource.name, description)
                    }
                    None => println!("{} ({})", resource.uri, resource.name),
                }
            }
            Ok(())
        }
        Command::Resource { server, uri } => {
            let contents = engine.get_resource(&server, &uri).await?;
            println!("{contents}");
            Ok(())
        }
    }
}

fn parse_arguments(raw: &str) -> Result<Map<String, Value>, Box<dyn Error>> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        _ => Err("tool arguments must be a JSON object".into()),
    }
}

/// Line-based chat loop. Ctrl+C cancels the in-flight request (or exits at
/// the prompt); the conversation lives as long as the session id.
async fn chat_repl(engine: &ChatEngine, session: &str) -> Result<(), Box<dyn Error>> {
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if message == "/quit" {
            break;
        }

        match run_cancellable(engine.start_or_continue_chat(session, message), &cancel).await {
            Ok(outcome) => {
                println!("{}", outcome.answer);
                if outcome.truncated {
                    println!("[stopped after {} model turns]", outcome.model_turns);
                }
            }
            Err(EngineError::Cancelled) => break,
            Err(err) => eprintln!("error: {err}"),
        }
    }

    println!("bye");
    Ok(())
}
