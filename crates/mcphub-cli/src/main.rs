//! # mcphub-cli
//!
//! Command-line interface for mcphub.

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mcphub_core::Config;
use mcphub_mcp::{ConfigLoader, McpHost, ServerConfig, ToolFormat};

mod commands;

/// Application context shared by the commands.
pub struct AppContext {
    pub config: Config,
    pub servers: BTreeMap<String, ServerConfig>,
}

impl AppContext {
    /// Build a host for the configured servers. Nothing is connected yet.
    pub fn host(&self) -> McpHost {
        McpHost::from_config(self.servers.clone(), &self.config)
    }
}

/// mcphub - connect to MCP servers and use their tools
#[derive(Parser)]
#[command(name = "mcphub")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Application config file (defaults to the layered config)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// MCP servers file (JSON or TOML)
    #[arg(short, long, value_name = "FILE")]
    servers: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to every server and show its status
    Servers,
    /// List the tools of every connected server
    Tools {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// List the resources of every connected server
    Resources,
    /// List the prompts of every connected server
    Prompts,
    /// Call a tool by its namespaced name
    Call {
        /// Tool name as `server__tool`
        name: String,
        /// Arguments as a JSON object
        #[arg(default_value = "{}")]
        args: String,
    },
    /// Validate the servers file without connecting
    Check,
    /// Show version information
    Version,
}

/// How `tools` prints the catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Human-readable list
    Text,
    /// OpenAI function specifications
    Openai,
    /// Anthropic tool specifications
    Anthropic,
    /// Generic JSON specifications
    Json,
}

impl OutputFormat {
    fn tool_format(self) -> Option<ToolFormat> {
        match self {
            OutputFormat::Text => None,
            OutputFormat::Openai => Some(ToolFormat::OpenAi),
            OutputFormat::Anthropic => Some(ToolFormat::Anthropic),
            OutputFormat::Json => Some(ToolFormat::Generic),
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Config {
    let loaded = match path {
        Some(path) => Config::load_with_file(path),
        None => Config::load(),
    };

    loaded.unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        Config::default()
    })
}

fn init_logging(config: &Config, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_ref());
    if let Some(ref servers) = cli.servers {
        config.general.servers_file = Some(servers.clone());
    }

    init_logging(&config, cli.verbose);

    if let Err(e) = config.check() {
        anyhow::bail!(mcphub_core::error::format_error_with_suggestion(&e));
    }

    if let Commands::Version = cli.command {
        println!("mcphub {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let servers = ConfigLoader::load_for(&config).map_err(|e| {
        let e: mcphub_core::Error = e.into();
        anyhow::anyhow!(mcphub_core::error::format_error_with_suggestion(&e))
    })?;
    let ctx = AppContext { config, servers };

    match cli.command {
        Commands::Servers => commands::servers::status(&ctx).await?,
        Commands::Tools { format } => commands::catalog::tools(&ctx, format.tool_format()).await?,
        Commands::Resources => commands::catalog::resources(&ctx).await?,
        Commands::Prompts => commands::catalog::prompts(&ctx).await?,
        Commands::Call { name, args } => {
            let ok = commands::call::run(&ctx, &name, &args).await?;
            if !ok {
                std::process::exit(1);
            }
        }
        Commands::Check => {
            let ok = commands::servers::check(&ctx);
            if !ok {
                std::process::exit(1);
            }
        }
        Commands::Version => {}
    }

    Ok(())
}
