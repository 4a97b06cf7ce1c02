//! ollama-proxy - CORS-enabled chat proxy for a local Ollama server
//!
//! Sits between a browser front end and Ollama, adds the site's system prompt
//! to every conversation, and relays replies as JSON or server-sent events.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ollama_proxy::Config;

#[derive(Parser)]
#[command(name = "ollama-proxy")]
#[command(about = "CORS-enabled chat proxy for a local Ollama server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the proxy server
    Serve {
        /// Path to configuration file (defaults plus environment when omitted)
        #[arg(short, long)]
        config: Option<String>,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration and print the effective settings
    Check {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ollama_proxy=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            tracing::info!(config = ?config, "Loading configuration");
            let mut config = Config::load(config.as_deref())?;

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                config.server.listen = addr;
            }

            ollama_proxy::proxy::run_server(config).await
        }

        Commands::Check { config } => {
            let config = Config::load(config.as_deref())?;
            let prompt = config.prompt.resolve()?;
            let _ = ollama_proxy::proxy::cors_layer(&config.cors)?;

            println!("Configuration OK");
            println!("  listen:        {}", config.server.listen);
            println!("  backend:       {}", config.backend.base_url());
            println!("  model:         {}", config.backend.model);
            println!(
                "  timeouts:      request {}s, connect {}s, stream idle {}s",
                config.backend.request_timeout_secs,
                config.backend.connect_timeout_secs,
                config.backend.stream_idle_timeout_secs
            );
            println!("  cors origins:  {}", config.cors.allowed_origins.join(", "));
            println!("  system prompt: {} chars", prompt.chars().count());
            Ok(())
        }
    }
}
