mod config;
mod serve;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use crate::config::{split_list, ServeConfig};

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Lumen real-time progress synchronization.
#[derive(Parser)]
#[command(name = "lumen", version, about = "Lumen real-time progress sync server")]
struct Cli {
    /// Log format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the sync server (WebSocket at /ws plus the admin HTTP API)
    Serve {
        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,
        /// Address to bind
        #[arg(long)]
        bind: Option<String>,
        /// Comma-separated child ids accepted by subscribe (default: any)
        #[arg(long)]
        children: Option<String>,
        /// Path to TLS certificate PEM file (requires --tls-key)
        #[arg(long)]
        tls_cert: Option<PathBuf>,
        /// Path to TLS private key PEM file (requires --tls-cert)
        #[arg(long)]
        tls_key: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML and exit
    Config {
        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Serve {
            config,
            port,
            bind,
            children,
            tls_cert,
            tls_key,
        } => {
            // Validate TLS flags: both must be provided or neither
            if tls_cert.is_some() != tls_key.is_some() {
                eprintln!("error: --tls-cert and --tls-key must both be provided");
                process::exit(1);
            }
            let mut settings = load_config(config.as_deref());
            if let Some(port) = port {
                settings.port = port;
            }
            if let Some(bind) = bind {
                settings.bind = bind;
            }
            if let Some(children) = children {
                settings.children = split_list(&children);
            }

            let rt = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    eprintln!("error: failed to create tokio runtime: {}", e);
                    process::exit(1);
                }
            };
            if let Err(e) = rt.block_on(serve::start_server(settings, tls_cert, tls_key)) {
                tracing::error!(error = %e, "server error");
                process::exit(1);
            }
        }
        Commands::Config { config } => {
            let settings = load_config(config.as_deref());
            match toml::to_string_pretty(&settings) {
                Ok(rendered) => print!("{}", rendered),
                Err(e) => {
                    eprintln!("error: could not render configuration: {}", e);
                    process::exit(1);
                }
            }
        }
    }
}

/// File and environment layers. Exits on an unreadable file.
fn load_config(path: Option<&std::path::Path>) -> ServeConfig {
    let mut settings = match ServeConfig::load(path) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };
    settings.apply_env(|key| std::env::var(key).ok());
    settings
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
