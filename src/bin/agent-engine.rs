//! agent-engine command line
//!
//! Offline front end for the engine: chunk and search documents, answer
//! questions with retrieval, and chat with a tool-using agent.

use std::path::{Path, PathBuf};

use agent_engine::agent::{AgentEvent, AgentSpec};
use agent_engine::knowledge::{apply_rag, Document, ProcessorRegistry, QueryRequest, Retriever};
use agent_engine::provider::ModelSettings;
use agent_engine::{Config, Engine, RequestContext, HASHING_MODEL};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// agent-engine - tool-using agents with retrieval-augmented generation
#[derive(Parser)]
#[command(
    name = "agent-engine",
    author,
    version,
    about = "Tool-using LLM agents with retrieval-augmented generation",
    long_about = r#"
Examples:
  agent-engine info
  agent-engine chunk notes.md --chunk-size 500 --overlap 50
  agent-engine search "what color is the sky" --doc sky.txt
  agent-engine ask "what color is the sky" --doc sky.txt
  agent-engine chat --stream
  agent-engine tools
"#
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Display version and build information
    Info,

    /// Split a document into chunks and print them
    Chunk(ChunkArgs),

    /// Ingest documents and print the chunks closest to a query
    Search(SearchArgs),

    /// Answer a question from documents through an agent
    Ask(AskArgs),

    /// Start an interactive chat with the builtin tools
    #[command(alias = "console", alias = "repl")]
    Chat(ChatArgs),

    /// Print the registered tool specifications as JSON
    Tools,
}

#[derive(Args)]
struct ChunkArgs {
    file: PathBuf,

    #[arg(long)]
    chunk_size: Option<usize>,

    #[arg(long)]
    overlap: Option<usize>,
}

#[derive(Args)]
struct SearchArgs {
    query: String,

    /// Documents to ingest before searching
    #[arg(short, long = "doc", required = true)]
    docs: Vec<PathBuf>,

    #[arg(short = 'k', long, default_value = "5")]
    top_k: usize,
}

#[derive(Args)]
struct AgentArgs {
    /// Provider name
    #[arg(long, default_value = "echo")]
    provider: String,

    /// Model name passed to the provider
    #[arg(long, default_value = "echo-1")]
    model: String,
}

#[derive(Args)]
struct AskArgs {
    question: String,

    #[arg(short, long = "doc", required = true)]
    docs: Vec<PathBuf>,

    #[command(flatten)]
    agent: AgentArgs,
}

#[derive(Args)]
struct ChatArgs {
    #[command(flatten)]
    agent: AgentArgs,

    /// Print text as it is generated
    #[arg(short, long)]
    stream: bool,

    /// Print agent lifecycle events to stderr as JSON
    #[arg(short, long)]
    events: bool,
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_json_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(Config::default()),
    }
}

/// Create a transient knowledge base holding `docs`; returns its id.
async fn ingest(engine: &Engine, ctx: &RequestContext, docs: &[PathBuf]) -> Result<String> {
    let kb = engine
        .knowledge()
        .create_knowledge_base("cli", "documents given on the command line", HASHING_MODEL)
        .await?;
    for path in docs {
        let doc = engine
            .knowledge()
            .add_document(ctx, &kb.id, path)
            .await
            .with_context(|| format!("failed to ingest {}", path.display()))?;
        tracing::info!(document = %doc.name, "Ingested");
    }
    Ok(kb.id)
}

fn print_info() {
    println!("agent-engine");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Features:");
    #[cfg(feature = "embedding")]
    println!("  - Embedding models (fastembed)");
    #[cfg(not(feature = "embedding"))]
    println!("  - Embedding models: hashing only");
    #[cfg(feature = "vector")]
    println!("  - HNSW vector store (usearch)");
    #[cfg(not(feature = "vector"))]
    println!("  - HNSW vector store: disabled");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Info => print_info(),

        Commands::Chunk(args) => {
            let processors = ProcessorRegistry::with_defaults(
                args.chunk_size.unwrap_or(config.chunk_size),
                args.overlap.unwrap_or(config.chunk_overlap),
            )?;
            let document = Document::from_file("cli", &args.file).await?;
            let chunks = processors.process_document(&document)?;
            for chunk in &chunks {
                println!(
                    "--- chunk {} ({} bytes) ---",
                    chunk.metadata.chunk_index,
                    chunk.content.len()
                );
                println!("{}", chunk.content);
            }
            println!("{} chunks", chunks.len());
        }

        Commands::Search(args) => {
            let engine = Engine::new(config).await?;
            let ctx = RequestContext::new();
            let kb_id = ingest(&engine, &ctx, &args.docs).await?;
            let response = engine
                .retriever()
                .retrieve(
                    &ctx,
                    QueryRequest {
                        knowledge_base_id: kb_id,
                        query: args.query,
                        top_k: args.top_k,
                    },
                )
                .await?;
            for (rank, result) in response.results.iter().enumerate() {
                let source = result
                    .metadata
                    .get("source")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown");
                println!("{}. [{:.4}] {}", rank + 1, result.score, source);
                println!("   {}", result.content.replace('\n', " "));
            }
        }

        Commands::Ask(args) => {
            let engine = Engine::new(config).await?;
            let ctx = RequestContext::new();
            let kb_id = ingest(&engine, &ctx, &args.docs).await?;
            let agent = engine.factory().create_agent(
                "default_conversation",
                &AgentSpec::new("ask", &args.agent.model, &args.agent.provider),
                None,
            )?;
            let answer = apply_rag(
                &ctx,
                engine.retriever().as_ref(),
                &kb_id,
                &args.question,
                &agent,
            )
            .await?;
            println!("{}", answer);
        }

        Commands::Chat(args) => {
            let engine = Engine::new(config).await?;
            let tool_names: Vec<String> = engine
                .tools()
                .list_tools()
                .into_iter()
                .filter(|t| t.is_builtin)
                .map(|t| t.name)
                .collect();
            let prompt = engine
                .factory()
                .get_template("default_workflow")?
                .system_prompt;
            let mut agent = engine.factory().create_custom_agent(
                &AgentSpec::new("console", &args.agent.model, &args.agent.provider),
                &prompt,
                &tool_names,
                ModelSettings::new(0.3, 2000),
            )?;
            agent.set_streaming(args.stream);
            if args.events {
                agent.add_callback(|event: &AgentEvent| {
                    if let Ok(line) = serde_json::to_string(event) {
                        eprintln!("{}", line);
                    }
                });
            }
            agent_engine::cli::console::run(agent).await?;
        }

        Commands::Tools => {
            let engine = Engine::new(config).await?;
            println!("{}", engine.tools().export_tool_specifications()?);
        }
    }

    Ok(())
}
