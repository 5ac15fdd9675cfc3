//! presence: drive a rich-presence session from the command line.
//!
//! ## Subcommands
//!
//! - `run`: Start a session and control it with line commands on stdin
//! - `endpoints`: List the IPC endpoints this platform would try
//! - `webhook`: Post a one-off message to the configured chat webhook

mod driver;
mod logging;
mod webhook;

use clap::{Parser, Subcommand};
use std::io;
use std::path::PathBuf;

use presence_core::{load_config, platform_transport, PresenceConfig, PresenceSession};

#[derive(Parser)]
#[command(name = "presence")]
#[command(about = "Rich-presence IPC client")]
#[command(version)]
struct Cli {
    /// Config file (defaults to $PRESENCE_CONFIG or the user config dir)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a session and read commands from stdin until `stop` or EOF
    Run {
        /// Initial details line, overriding the config file
        #[arg(long)]
        details: Option<String>,

        /// Initial state line, overriding the config file
        #[arg(long)]
        state: Option<String>,
    },

    /// List candidate IPC endpoints in the order they are tried
    Endpoints,

    /// Send one webhook message
    Webhook {
        /// Webhook URL (defaults to `webhook_url` from config)
        #[arg(long)]
        url: Option<String>,

        #[arg(long)]
        content: Option<String>,

        #[arg(long)]
        username: Option<String>,

        /// Embed title
        #[arg(long)]
        title: Option<String>,

        /// Embed description
        #[arg(long)]
        description: Option<String>,

        /// Embed color: #RRGGBB, 0xRRGGBB, or decimal
        #[arg(long, value_parser = webhook::parse_color)]
        color: Option<u32>,
    },
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { details, state } => {
            let mut config = load_or_exit(cli.config.as_ref());
            if details.is_some() {
                config.details = details;
            }
            if state.is_some() {
                config.state = state;
            }

            let session = match PresenceSession::new(config) {
                Ok(session) => session,
                Err(e) => {
                    tracing::error!(error = %e, "Cannot start presence session");
                    std::process::exit(1);
                }
            };
            if let Err(e) = driver::run(&session, io::stdin().lock()) {
                tracing::error!(error = %e, "Reading commands failed");
                session.stop();
                std::process::exit(1);
            }
        }
        Commands::Endpoints => {
            let transport = platform_transport();
            for endpoint in transport.candidates() {
                let marker = if endpoint.path().exists() { "*" } else { " " };
                println!("{} {}", marker, endpoint);
            }
        }
        Commands::Webhook {
            url,
            content,
            username,
            title,
            description,
            color,
        } => {
            let config = load_or_exit(cli.config.as_ref());
            let args = webhook::WebhookArgs {
                url,
                content,
                username,
                title,
                description,
                color,
            };
            if let Err(e) = webhook::run(&args, config.webhook_url) {
                tracing::error!(error = %e, "Webhook failed");
                std::process::exit(1);
            }
        }
    }
}

fn load_or_exit(path: Option<&PathBuf>) -> PresenceConfig {
    match load_config(path.map(PathBuf::as_path)) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load presence config");
            std::process::exit(1);
        }
    }
}
