use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use mcp::{ServerIdentity, Session, ToolHost, ToolRegistry};
use runtime::{AgentConfig, RetryingBackend};
use tools::rag::Embedder;
use tools::{HashingEmbedder, RagPipeline, TavilySearch, TeiEmbedder, YahooFinance};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cli::config::Config;
use cli::error::Result;
use cli::http;
use cli::service::{AgentService, ChatService, resolve_endpoint};

const CONFIG_FILE: &str = "toolwire.toml";

#[derive(Parser)]
#[command(name = "toolwire")]
#[command(about = "Tool hosts and a tool-using agent over MCP", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve a tool catalogue over stdio, or on a socket with --listen
    Host {
        catalog: Catalog,
        /// Accept connections on this address instead of using stdio
        #[arg(short, long)]
        listen: Option<String>,
        /// Speak streamable HTTP on the listen address instead of line-framed TCP
        #[arg(long, requires = "listen")]
        http: bool,
    },
    /// List the tools a host offers
    Tools {
        /// Configured server name (default: the first one)
        #[arg(short, long)]
        server: Option<String>,
    },
    /// Answer one query with the agent
    Ask {
        query: String,
        /// Configured server name (default: the first one)
        #[arg(short, long)]
        server: Option<String>,
        /// Override the agent's step budget
        #[arg(long)]
        max_steps: Option<u32>,
    },
    /// Run the HTTP chat facade
    Serve {
        /// Configured server name (default: the first one)
        #[arg(short, long)]
        server: Option<String>,
        /// Address to bind (default: from config)
        #[arg(short, long)]
        bind: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Catalog {
    Math,
    Finance,
    Research,
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Logs go to stderr; stdout may be carrying protocol frames.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let mut config = Config::load_or_default(&cli.config)?;
    config.apply_env(|var| std::env::var(var).ok());

    match cli.command {
        Commands::Host {
            catalog,
            listen,
            http: over_http,
        } => cmd_host(&config, catalog, listen.as_deref(), over_http).await,
        Commands::Tools { server } => cmd_tools(&config, server.as_deref()).await,
        Commands::Ask {
            query,
            server,
            max_steps,
        } => cmd_ask(&config, &query, server.as_deref(), max_steps).await,
        Commands::Serve { server, bind } => cmd_serve(&config, server.as_deref(), bind).await,
    }
}

async fn cmd_host(
    config: &Config,
    catalog: Catalog,
    listen: Option<&str>,
    over_http: bool,
) -> Result<()> {
    let (identity, registry) = match catalog {
        Catalog::Math => (ServerIdentity::new("Math Tools"), tools::math_registry()?),
        Catalog::Finance => (
            ServerIdentity::new("Yahoo Finance MCP Server")
                .with_instructions("Use ticker symbols such as AAPL or MSFT."),
            tools::finance_registry(Arc::new(YahooFinance::new()?))?,
        ),
        Catalog::Research => (ServerIdentity::new("MCP-RAG-APP"), research_registry(config).await?),
    };
    info!(server = %identity.name, tools = registry.len(), "Starting tool host");
    let host = ToolHost::new(identity, Arc::new(registry));

    match listen {
        Some(addr) if over_http => {
            let server = host.bind_http(addr).await?;
            info!(addr = %server.local_addr()?, path = mcp::HTTP_PATH, "Listening for sessions");
            server.serve().await?;
        }
        Some(addr) => {
            let tcp = host.bind(addr).await?;
            info!(addr = %tcp.local_addr()?, "Listening for sessions");
            tcp.serve().await?;
        }
        None => host.serve_stdio().await?,
    }
    Ok(())
}

async fn research_registry(config: &Config) -> Result<ToolRegistry> {
    let search = TavilySearch::new(config.search.tavily_api_key.clone());

    let embedder: Arc<dyn Embedder> = match &config.rag.tei_url {
        Some(url) => Arc::new(TeiEmbedder::new(url)),
        None => {
            info!("TEI_URL not set, using hashing embeddings");
            Arc::new(HashingEmbedder::default())
        }
    };
    let backend = RetryingBackend::new(config.backend(), config.retry());
    let rag = RagPipeline::new(backend, embedder, config.rag.pipeline.clone());

    // A host without documents still serves web_search.
    match rag.ingest_dir(&config.rag.data_dir).await {
        Ok(chunks) => info!(chunks, dir = %config.rag.data_dir.display(), "Ingested documents"),
        Err(e) => warn!(error = %e, "Document ingestion failed"),
    }

    Ok(tools::research_registry(Arc::new(search), Arc::new(rag))?)
}

async fn cmd_tools(config: &Config, server: Option<&str>) -> Result<()> {
    let endpoint = resolve_endpoint(config, server)?;
    let mut session = Session::connect(&endpoint)
        .await?
        .with_timeout(config.session.request_timeout());
    let info = session.initialize().await?;
    println!("{} v{}", info.server_info.name, info.server_info.version);

    for tool in session.list_tools().await? {
        match tool.description {
            Some(description) => println!("  {:<20} {description}", tool.name),
            None => println!("  {}", tool.name),
        }
    }
    session.close().await?;
    Ok(())
}

async fn cmd_ask(
    config: &Config,
    query: &str,
    server: Option<&str>,
    max_steps: Option<u32>,
) -> Result<()> {
    let mut agent = config.agent.clone();
    if let Some(max_steps) = max_steps {
        agent.max_steps = max_steps;
    }
    let service = agent_service(config, agent, server)?;
    let answer = service.answer(query).await?;
    println!("{answer}");
    Ok(())
}

async fn cmd_serve(config: &Config, server: Option<&str>, bind: Option<String>) -> Result<()> {
    let service = agent_service(config, config.agent.clone(), server)?;
    let bind = bind.unwrap_or_else(|| config.http.bind.clone());
    http::serve(&bind, Arc::new(service)).await
}

fn agent_service(config: &Config, agent: AgentConfig, server: Option<&str>) -> Result<AgentService> {
    let service = AgentService::new(config, agent, resolve_endpoint(config, server)?);
    info!(server = %service.endpoint().name(), "Using tool host");
    Ok(service)
}
